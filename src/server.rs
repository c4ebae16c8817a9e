use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::cluster::{Coordinator, ReplicaClient, ReplicaInfo, Response};
use crate::db::Stats;
use crate::error::Error;
use crate::types::Cell;

/// Present on replica-to-replica calls: serve locally, don't fan out.
pub const REPLICA_HOP_HEADER: &str = "x-replica-hop";
/// Node that sent a replica hop. Informational.
pub const ORIGIN_NODE_HEADER: &str = "x-origin-node";
/// Timestamp of the version in a 200 reply.
pub const GENERATION_HEADER: &str = "generation";
/// Set to `true` when the version in a 200 reply is a tombstone.
pub const TOMBSTONE_HEADER: &str = "tombstone";

struct AppState<C: ReplicaClient> {
    coordinator: Arc<Coordinator<C>>,
}

impl<C: ReplicaClient> Clone for AppState<C> {
    fn clone(&self) -> Self {
        AppState {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

pub fn router<C: ReplicaClient>(coordinator: Arc<Coordinator<C>>) -> Router {
    Router::new()
        .route("/v0/status", get(status::<C>))
        .route(
            "/v0/entity",
            get(get_entity::<C>)
                .put(put_entity::<C>)
                .delete(delete_entity::<C>),
        )
        .route("/v0/entities", get(entities::<C>))
        .with_state(AppState { coordinator })
}

#[derive(Debug, Deserialize)]
struct EntityParams {
    id: Option<String>,
    replicas: Option<String>,
    timestamp: Option<u64>,
}

impl EntityParams {
    fn key(&self) -> Result<&[u8], Response> {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id.as_bytes()),
            _ => Err(Response::BadRequest("missing or empty id".into())),
        }
    }

    fn replicas(&self) -> Result<Option<ReplicaInfo>, Response> {
        self.replicas
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e| Response::BadRequest(format!("{e}")))
    }
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start: Option<String>,
    end: Option<String>,
}

fn is_replica_hop(headers: &HeaderMap) -> bool {
    headers.contains_key(REPLICA_HOP_HEADER)
}

async fn status<C: ReplicaClient>(State(state): State<AppState<C>>) -> Json<Stats> {
    Json(state.coordinator.db().stats())
}

async fn get_entity<C: ReplicaClient>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Query(params): Query<EntityParams>,
) -> HttpResponse {
    let key = match params.key() {
        Ok(key) => key,
        Err(response) => return into_http(response),
    };
    let response = if is_replica_hop(&headers) {
        state.coordinator.get_local(key).await
    } else {
        match params.replicas() {
            Ok(replicas) => state.coordinator.get(key, replicas).await,
            Err(response) => response,
        }
    };
    into_http(response)
}

async fn put_entity<C: ReplicaClient>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Query(params): Query<EntityParams>,
    body: Bytes,
) -> HttpResponse {
    let key = match params.key() {
        Ok(key) => key,
        Err(response) => return into_http(response),
    };
    let response = if is_replica_hop(&headers) {
        state
            .coordinator
            .put_local(key, body.to_vec(), params.timestamp)
            .await
    } else {
        match params.replicas() {
            Ok(replicas) => state.coordinator.put(key, body.to_vec(), replicas).await,
            Err(response) => response,
        }
    };
    into_http(response)
}

async fn delete_entity<C: ReplicaClient>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Query(params): Query<EntityParams>,
) -> HttpResponse {
    let key = match params.key() {
        Ok(key) => key,
        Err(response) => return into_http(response),
    };
    let response = if is_replica_hop(&headers) {
        state.coordinator.delete_local(key, params.timestamp).await
    } else {
        match params.replicas() {
            Ok(replicas) => state.coordinator.delete(key, replicas).await,
            Err(response) => response,
        }
    };
    into_http(response)
}

/// Node-local range scan, streamed as one `key '\n' value` chunk per cell.
async fn entities<C: ReplicaClient>(
    State(state): State<AppState<C>>,
    Query(params): Query<RangeParams>,
) -> HttpResponse {
    let Some(start) = params.start.filter(|start| !start.is_empty()) else {
        return into_http(Response::BadRequest("missing or empty start".into()));
    };
    let end = params.end;
    let db = Arc::clone(state.coordinator.db());

    let (tx, rx) = mpsc::channel::<Result<Bytes, Error>>(64);
    tokio::task::spawn_blocking(move || {
        let scan = match db.range(start.as_bytes(), end.as_deref().map(str::as_bytes)) {
            Ok(scan) => scan,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        for item in scan {
            let chunk = item.map(|cell| encode_chunk(&cell));
            let failed = chunk.is_err();
            if tx.blocking_send(chunk).is_err() || failed {
                break;
            }
        }
    });

    let chunks = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    (StatusCode::OK, Body::from_stream(chunks)).into_response()
}

fn encode_chunk(cell: &Cell) -> Bytes {
    let payload = cell.value.payload().unwrap_or_default();
    let mut chunk = Vec::with_capacity(cell.key.len() + 1 + payload.len());
    chunk.extend_from_slice(&cell.key);
    chunk.push(b'\n');
    chunk.extend_from_slice(payload);
    Bytes::from(chunk)
}

fn into_http(response: Response) -> HttpResponse {
    let status =
        StatusCode::from_u16(response.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response {
        Response::Found(value) => {
            let mut headers = HeaderMap::new();
            headers.insert(GENERATION_HEADER, HeaderValue::from(value.timestamp()));
            if value.is_tombstone() {
                headers.insert(TOMBSTONE_HEADER, HeaderValue::from_static("true"));
            }
            (status, headers, value.into_payload().unwrap_or_default()).into_response()
        }
        Response::BadRequest(message) | Response::InternalError(message) => {
            (status, message).into_response()
        }
        Response::NotFound | Response::Created | Response::Accepted | Response::NotEnoughReplicas => {
            status.into_response()
        }
    }
}

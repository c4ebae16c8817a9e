use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::cluster::{NodeId, ReplicaClient, ReplicaError};
use crate::server::{GENERATION_HEADER, ORIGIN_NODE_HEADER, REPLICA_HOP_HEADER, TOMBSTONE_HEADER};
use crate::types::VersionedValue;

/// Replica client speaking the node's own HTTP API.
///
/// Every request is marked as a replica hop, so the receiving node serves
/// it from local storage. Writes carry the exact timestamp to store.
pub struct HttpReplicaClient {
    http: reqwest::Client,
    origin: NodeId,
}

impl HttpReplicaClient {
    pub fn new(origin: NodeId, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpReplicaClient { http, origin })
    }

    fn entity_url(node: &NodeId) -> String {
        format!("{}/v0/entity", node.as_str().trim_end_matches('/'))
    }
}

fn key_param<'a>(node: &NodeId, key: &'a [u8]) -> Result<&'a str, ReplicaError> {
    std::str::from_utf8(key).map_err(|_| ReplicaError::Protocol {
        node: node.clone(),
        message: "key is not valid UTF-8".into(),
    })
}

fn transport_error(node: &NodeId, e: reqwest::Error) -> ReplicaError {
    ReplicaError::Transport {
        node: node.clone(),
        message: e.to_string(),
    }
}

#[async_trait]
impl ReplicaClient for HttpReplicaClient {
    async fn get(&self, node: &NodeId, key: &[u8]) -> Result<Option<VersionedValue>, ReplicaError> {
        let response = self
            .http
            .get(Self::entity_url(node))
            .query(&[("id", key_param(node, key)?)])
            .header(REPLICA_HOP_HEADER, "true")
            .header(ORIGIN_NODE_HEADER, self.origin.as_str())
            .send()
            .await
            .map_err(|e| transport_error(node, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let timestamp = response
                    .headers()
                    .get(GENERATION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| ReplicaError::Protocol {
                        node: node.clone(),
                        message: format!("missing or bad {GENERATION_HEADER} header"),
                    })?;
                let tombstone = response
                    .headers()
                    .get(TOMBSTONE_HEADER)
                    .is_some_and(|v| v.as_bytes() == b"true");
                if tombstone {
                    return Ok(Some(VersionedValue::tombstone(timestamp)));
                }
                let body = response.bytes().await.map_err(|e| transport_error(node, e))?;
                Ok(Some(VersionedValue::value(timestamp, body.to_vec())))
            }
            status => Err(ReplicaError::UnexpectedStatus {
                node: node.clone(),
                status: status.as_u16(),
            }),
        }
    }

    async fn write(&self, node: &NodeId, key: &[u8], value: &VersionedValue) -> Result<(), ReplicaError> {
        let url = Self::entity_url(node);
        let (request, expected) = match value.payload() {
            Some(payload) => (self.http.put(url).body(payload.to_vec()), StatusCode::CREATED),
            None => (self.http.delete(url), StatusCode::ACCEPTED),
        };
        let timestamp = value.timestamp().to_string();

        let response = request
            .query(&[("id", key_param(node, key)?), ("timestamp", timestamp.as_str())])
            .header(REPLICA_HOP_HEADER, "true")
            .header(ORIGIN_NODE_HEADER, self.origin.as_str())
            .send()
            .await
            .map_err(|e| transport_error(node, e))?;

        if response.status() == expected {
            Ok(())
        } else {
            Err(ReplicaError::UnexpectedStatus {
                node: node.clone(),
                status: response.status().as_u16(),
            })
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::cluster::quorum::{self, Verdict};
use crate::cluster::response::{self, Response};
use crate::cluster::{HashRing, NodeId, ReplicaClient, ReplicaError, ReplicaInfo, repair};
use crate::db::DB;
use crate::error::Error;
use crate::types::{VersionedValue, is_valid_timestamp};

pub const DEFAULT_REPLICA_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
enum Call {
    Get,
    Write(VersionedValue),
}

#[derive(Debug)]
enum Reply {
    Read(Option<VersionedValue>),
    Written,
}

type ReplyReceiver = mpsc::Receiver<(NodeId, Result<Reply, ReplicaError>)>;

/// Sends one call to one replica: the local engine directly, anything else
/// through the replica client under a timeout.
struct Dispatcher<C> {
    local: NodeId,
    db: Arc<DB>,
    client: Arc<C>,
    timeout: Duration,
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Dispatcher {
            local: self.local.clone(),
            db: Arc::clone(&self.db),
            client: Arc::clone(&self.client),
            timeout: self.timeout,
        }
    }
}

impl<C: ReplicaClient> Dispatcher<C> {
    async fn call(&self, node: &NodeId, key: Arc<[u8]>, call: Call) -> Result<Reply, ReplicaError> {
        if *node == self.local {
            self.call_local(key, call).await
        } else {
            self.call_remote(node, &key, call).await
        }
    }

    async fn call_local(&self, key: Arc<[u8]>, call: Call) -> Result<Reply, ReplicaError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || apply_local(&db, &key, call))
            .await
            .map_err(|e| ReplicaError::Storage(format!("local replica task failed: {e}")))?
    }

    async fn call_remote(&self, node: &NodeId, key: &[u8], call: Call) -> Result<Reply, ReplicaError> {
        let request = async {
            match call {
                Call::Get => self.client.get(node, key).await.map(Reply::Read),
                Call::Write(value) => self.client.write(node, key, &value).await.map(|()| Reply::Written),
            }
        };
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ReplicaError::Timeout {
                node: node.clone(),
                timeout: self.timeout,
            })?
    }
}

/// Storage errors become a failed-replica vote here, never a crash.
fn apply_local(db: &DB, key: &[u8], call: Call) -> Result<Reply, ReplicaError> {
    match call {
        Call::Get => match db.get(key) {
            Ok(value) => Ok(Reply::Read(Some(value))),
            Err(Error::NotFound) => Ok(Reply::Read(None)),
            Err(e) => Err(ReplicaError::Storage(e.to_string())),
        },
        Call::Write(value) => db
            .apply(key, value)
            .map(|()| Reply::Written)
            .map_err(|e| ReplicaError::Storage(e.to_string())),
    }
}

/// Serves client requests against the replicas the ring picks for a key.
///
/// 1. Resolve: `from` distinct nodes for the key; `ack` above the cluster
///    size fails fast with `NotEnoughReplicas`.
/// 2. Dispatch: one task per replica, local or remote, all concurrent.
/// 3. Collect until `ack` successes or enough failures to rule them out.
/// 4. Merge the successes.
/// 5. GET only: the remaining replies are drained in the background and
///    every replica that disagrees with the newest version is rewritten.
///
/// Dispatch and repair tasks belong to the coordinator's `TaskTracker`;
/// `shutdown` waits for all of them.
pub struct Coordinator<C: ReplicaClient> {
    ring: Arc<HashRing>,
    dispatcher: Dispatcher<C>,
    tasks: TaskTracker,
}

impl<C: ReplicaClient> Coordinator<C> {
    pub fn new(ring: Arc<HashRing>, db: Arc<DB>, client: Arc<C>) -> Self {
        let dispatcher = Dispatcher {
            local: ring.local().clone(),
            db,
            client,
            timeout: DEFAULT_REPLICA_TIMEOUT,
        };
        Coordinator {
            ring,
            dispatcher,
            tasks: TaskTracker::new(),
        }
    }

    /// Per-replica timeout for remote calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher.timeout = timeout;
        self
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn db(&self) -> &Arc<DB> {
        &self.dispatcher.db
    }

    pub async fn get(&self, key: &[u8], replicas: Option<ReplicaInfo>) -> Response {
        let (nodes, ack) = match self.plan(key, replicas) {
            Ok(plan) => plan,
            Err(response) => return response,
        };
        let key: Arc<[u8]> = Arc::from(key);

        let mut results = self.dispatch(&nodes, &key, Call::Get);
        let collected = quorum::collect(&mut results, ack, nodes.len()).await;

        let reads: Vec<(NodeId, Option<VersionedValue>)> = collected
            .successes
            .into_iter()
            .filter_map(|(node, reply)| match reply {
                Reply::Read(read) => Some((node, read)),
                Reply::Written => None,
            })
            .collect();
        let merged = response::merge_get(reads.iter().map(|(_, read)| read.as_ref()), ack);
        debug!(
            replicas = nodes.len(),
            ack,
            failures = collected.failures,
            status = merged.status_code(),
            "get"
        );

        if collected.verdict == Verdict::Reached {
            self.spawn_read_repair(key, reads, results);
        }
        merged
    }

    /// Store `payload` on the key's replicas under one coordinator timestamp.
    pub async fn put(&self, key: &[u8], payload: Vec<u8>, replicas: Option<ReplicaInfo>) -> Response {
        let value = VersionedValue::value(self.dispatcher.db.next_timestamp(), payload);
        self.replicate(key, value, replicas, Response::Created).await
    }

    pub async fn delete(&self, key: &[u8], replicas: Option<ReplicaInfo>) -> Response {
        let value = VersionedValue::tombstone(self.dispatcher.db.next_timestamp());
        self.replicate(key, value, replicas, Response::Accepted).await
    }

    async fn replicate(
        &self,
        key: &[u8],
        value: VersionedValue,
        replicas: Option<ReplicaInfo>,
        expected: Response,
    ) -> Response {
        let (nodes, ack) = match self.plan(key, replicas) {
            Ok(plan) => plan,
            Err(response) => return response,
        };
        let key: Arc<[u8]> = Arc::from(key);

        let mut results = self.dispatch(&nodes, &key, Call::Write(value));
        let collected = quorum::collect(&mut results, ack, nodes.len()).await;

        let replies = collected.successes.iter().map(|_| expected.clone());
        let merged = response::merge_write(replies, ack, expected.clone());
        debug!(
            replicas = nodes.len(),
            ack,
            failures = collected.failures,
            status = merged.status_code(),
            "write"
        );
        merged
    }

    /// Replica hop: newest local version, tombstones included.
    pub async fn get_local(&self, key: &[u8]) -> Response {
        if key.is_empty() {
            return Response::BadRequest("empty id".into());
        }
        match self.dispatcher.call_local(Arc::from(key), Call::Get).await {
            Ok(Reply::Read(Some(value))) => Response::Found(value),
            Ok(Reply::Read(None)) => Response::NotFound,
            Ok(Reply::Written) => Response::InternalError("unexpected write reply".into()),
            Err(e) => local_failure(e),
        }
    }

    /// Replica hop: store a value locally, at `timestamp` if given.
    pub async fn put_local(&self, key: &[u8], payload: Vec<u8>, timestamp: Option<u64>) -> Response {
        let timestamp = match self.hop_timestamp(timestamp) {
            Ok(timestamp) => timestamp,
            Err(response) => return response,
        };
        self.write_local(key, VersionedValue::value(timestamp, payload), Response::Created)
            .await
    }

    /// Replica hop: store a tombstone locally, at `timestamp` if given.
    pub async fn delete_local(&self, key: &[u8], timestamp: Option<u64>) -> Response {
        let timestamp = match self.hop_timestamp(timestamp) {
            Ok(timestamp) => timestamp,
            Err(response) => return response,
        };
        self.write_local(key, VersionedValue::tombstone(timestamp), Response::Accepted)
            .await
    }

    /// The version a replica hop writes at. Hops arrive over the wire, so
    /// the timestamp is checked before it reaches the engine clock.
    fn hop_timestamp(&self, timestamp: Option<u64>) -> Result<u64, Response> {
        match timestamp {
            Some(ts) if !is_valid_timestamp(ts) => {
                Err(Response::BadRequest(format!("invalid timestamp {ts}")))
            }
            Some(ts) => Ok(ts),
            None => Ok(self.dispatcher.db.next_timestamp()),
        }
    }

    async fn write_local(&self, key: &[u8], value: VersionedValue, expected: Response) -> Response {
        if key.is_empty() {
            return Response::BadRequest("empty id".into());
        }
        match self.dispatcher.call_local(Arc::from(key), Call::Write(value)).await {
            Ok(_) => expected,
            Err(e) => local_failure(e),
        }
    }

    /// Wait for every background dispatch and repair started so far.
    pub async fn wait_background(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Stop accepting background work and wait for what is running.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        info!("coordinator background tasks drained");
    }

    fn plan(&self, key: &[u8], replicas: Option<ReplicaInfo>) -> Result<(Vec<NodeId>, usize), Response> {
        if key.is_empty() {
            return Err(Response::BadRequest("empty id".into()));
        }
        let nodes = self.ring.node_count();
        let info = replicas.unwrap_or_else(|| ReplicaInfo::default_for(nodes));
        if info.ack > nodes {
            warn!(%info, nodes, "ack exceeds cluster size");
            return Err(Response::NotEnoughReplicas);
        }
        Ok((self.ring.nodes_for_key(key, info.from), info.ack))
    }

    fn dispatch(&self, nodes: &[NodeId], key: &Arc<[u8]>, call: Call) -> ReplyReceiver {
        let (tx, rx) = mpsc::channel(nodes.len().max(1));
        for node in nodes {
            let dispatcher = self.dispatcher.clone();
            let tx = tx.clone();
            let node = node.clone();
            let key = Arc::clone(key);
            let call = call.clone();
            self.tasks.spawn(async move {
                let result = dispatcher.call(&node, key, call).await;
                let _ = tx.send((node, result)).await;
            });
        }
        rx
    }

    fn spawn_read_repair(
        &self,
        key: Arc<[u8]>,
        mut reads: Vec<(NodeId, Option<VersionedValue>)>,
        mut stragglers: ReplyReceiver,
    ) {
        let dispatcher = self.dispatcher.clone();
        self.tasks.spawn(async move {
            while let Some((node, result)) = stragglers.recv().await {
                if let Ok(Reply::Read(read)) = result {
                    reads.push((node, read));
                }
            }

            let Some(winner) = response::newest(reads.iter().map(|(_, read)| read.as_ref())).cloned() else {
                return;
            };
            for node in repair::stale_replicas(&winner, &reads) {
                match dispatcher.call(&node, Arc::clone(&key), Call::Write(winner.clone())).await {
                    Ok(_) => info!(node = %node, timestamp = winner.timestamp(), "read repair applied"),
                    Err(e) => warn!(node = %node, "read repair failed: {e}"),
                }
            }
        });
    }
}

fn local_failure(e: ReplicaError) -> Response {
    error!("local storage failure: {e}");
    Response::InternalError(e.to_string())
}

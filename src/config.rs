use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::cluster::NodeId;
use crate::cluster::coordinator::DEFAULT_REPLICA_TIMEOUT;
use crate::cluster::ring::DEFAULT_VIRTUAL_NODES;
use crate::db::Options;
use crate::wal::SyncPolicy;

/// Everything one node needs to start.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the HTTP server binds.
    pub listen: SocketAddr,
    /// How peers reach this node; also its ring identity.
    pub local: NodeId,
    /// Every node of the cluster. The local node is added if missing.
    pub cluster: Vec<NodeId>,
    pub data_dir: PathBuf,
    pub flush_threshold: usize,
    pub sync_policy: SyncPolicy,
    pub replica_timeout: Duration,
    pub virtual_nodes: usize,
}

impl NodeConfig {
    /// Single-node defaults for `listen`, reachable at `http://<listen>`.
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            local: NodeId::new(format!("http://{listen}")),
            cluster: Vec::new(),
            data_dir: PathBuf::from("./data"),
            flush_threshold: Options::default().flush_threshold,
            sync_policy: SyncPolicy::default(),
            replica_timeout: DEFAULT_REPLICA_TIMEOUT,
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
        }
    }

    pub fn local(mut self, node: NodeId) -> Self {
        self.local = node;
        self
    }

    pub fn cluster(mut self, nodes: Vec<NodeId>) -> Self {
        self.cluster = nodes;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes;
        self
    }

    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn replica_timeout(mut self, timeout: Duration) -> Self {
        self.replica_timeout = timeout;
        self
    }

    pub fn virtual_nodes(mut self, count: usize) -> Self {
        self.virtual_nodes = count;
        self
    }

    /// Storage engine settings for this node.
    pub fn db_options(&self) -> Options {
        Options::new(&self.data_dir)
            .flush_threshold(self.flush_threshold)
            .sync_policy(self.sync_policy)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SyncMode {
    /// fsync after every write.
    Always,
    /// fsync every 128 writes.
    Batch,
    /// Leave it to the OS.
    Never,
}

impl From<SyncMode> for SyncPolicy {
    fn from(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Always => SyncPolicy::EveryWrite,
            SyncMode::Batch => SyncPolicy::EveryNWrites(128),
            SyncMode::Never => SyncPolicy::Never,
        }
    }
}

/// Command line of the `quorumkv` binary.
#[derive(Parser, Debug)]
#[command(name = "quorumkv", about = "Replicated key-value node")]
pub struct Args {
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// URL peers use to reach this node (default: http://<listen>).
    #[arg(long)]
    pub node: Option<String>,

    /// Comma-separated URLs of every cluster node.
    #[arg(long, value_delimiter = ',')]
    pub cluster: Vec<String>,

    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Memtable size (bytes) that triggers a flush.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    pub flush_threshold: usize,

    #[arg(long, value_enum, default_value = "never")]
    pub sync: SyncMode,

    /// Per-replica timeout (ms).
    #[arg(long, default_value_t = 1000)]
    pub replica_timeout_ms: u64,

    /// Ring positions per node.
    #[arg(long, default_value_t = DEFAULT_VIRTUAL_NODES)]
    pub virtual_nodes: usize,
}

impl From<Args> for NodeConfig {
    fn from(args: Args) -> Self {
        let mut config = NodeConfig::new(args.listen)
            .cluster(args.cluster.into_iter().map(NodeId::from).collect())
            .data_dir(args.data_dir)
            .flush_threshold(args.flush_threshold)
            .sync_policy(args.sync.into())
            .replica_timeout(Duration::from_millis(args.replica_timeout_ms))
            .virtual_nodes(args.virtual_nodes);
        if let Some(node) = args.node {
            config = config.local(NodeId::from(node));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_build_node_config() {
        let args = Args::parse_from([
            "quorumkv",
            "--listen",
            "127.0.0.1:9001",
            "--cluster",
            "http://127.0.0.1:9001,http://127.0.0.1:9002",
            "--data-dir",
            "/tmp/node1",
            "--sync",
            "always",
        ]);
        let config = NodeConfig::from(args);
        assert_eq!(config.local, NodeId::from("http://127.0.0.1:9001"));
        assert_eq!(config.cluster.len(), 2);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/node1"));
        assert_eq!(config.sync_policy, SyncPolicy::EveryWrite);
        assert_eq!(config.replica_timeout, Duration::from_secs(1));
        assert_eq!(config.virtual_nodes, DEFAULT_VIRTUAL_NODES);
    }

    #[test]
    fn explicit_node_url_wins() {
        let args = Args::parse_from(["quorumkv", "--node", "http://kv-1:8080"]);
        assert_eq!(NodeConfig::from(args).local, NodeId::from("http://kv-1:8080"));
    }

    #[test]
    fn db_options_follow_node_config() {
        let options = NodeConfig::new("127.0.0.1:8080".parse().unwrap())
            .data_dir("/var/lib/kv")
            .flush_threshold(1024)
            .db_options();
        assert_eq!(options.dir, PathBuf::from("/var/lib/kv"));
        assert_eq!(options.flush_threshold, 1024);
        assert!(options.wal);
    }
}

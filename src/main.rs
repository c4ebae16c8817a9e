use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use quorumkv::cluster::{Coordinator, HashRing};
use quorumkv::config::{Args, NodeConfig};
use quorumkv::db::DB;
use quorumkv::server;
use quorumkv::transport::HttpReplicaClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = NodeConfig::from(Args::parse());

    let options = config.db_options();
    let db = tokio::task::spawn_blocking(move || DB::open(options))
        .await?
        .with_context(|| format!("opening {}", config.data_dir.display()))?;
    let db = Arc::new(db);

    let ring = Arc::new(HashRing::new(
        config.local.clone(),
        config.cluster.iter().cloned(),
        config.virtual_nodes,
    ));
    tracing::info!(
        node = %config.local,
        nodes = ring.node_count(),
        "joined ring"
    );

    let client = Arc::new(HttpReplicaClient::new(config.local.clone(), config.replica_timeout)?);
    let coordinator = Arc::new(
        Coordinator::new(ring, Arc::clone(&db), client).with_timeout(config.replica_timeout),
    );

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!("listening on {}", config.listen);

    axum::serve(listener, server::router(Arc::clone(&coordinator)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    coordinator.shutdown().await;
    tokio::task::spawn_blocking(move || db.close()).await??;
    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use clap::Parser;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use para_follower::adapter::RpcMainChainClient;
use para_follower::bus::RocksDbBus;
use para_follower::caught_up::CaughtUpFlag;
use para_follower::commit_tracker::{CommitTracker, NoopCommitMsgSubmitter};
use para_follower::config::{get_follower_config, get_rpc_settings, load_config, load_config_from};
use para_follower::filter::PrefixExecNameFilter;
use para_follower::follower::{run_follower_loop, FollowerContext};
use para_follower::metrics;
use para_follower::telemetry::{init_tracing, TelemetryConfig};

const LOCAL_DB_CF: &str = "local_db";

#[derive(Parser, Debug)]
#[command(name = "para-follower", about = "Parachain follower engine")]
struct Cli {
    /// Path to config.toml; defaults to ./config.toml per the `config` crate's File source.
    #[arg(long)]
    config: Option<String>,

    /// Bind address for the /metrics endpoint.
    #[arg(long, default_value = "0.0.0.0:9616")]
    metrics_addr: String,
}

async fn serve_metrics(addr: SocketAddr) {
    let app = Router::new().route("/metrics", get(|| async { metrics::gather_metrics() }));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind metrics listener");
            return;
        }
    };
    info!(%addr, "metrics server listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "metrics server failed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_tracing(TelemetryConfig::default())?;

    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let follower_config = get_follower_config(&config)?;
    let rpc_settings = get_rpc_settings(&config)?;
    let db_path = shellexpand::tilde(&config.get_string("paths.db_path")?).into_owned();

    metrics::init_metrics()?;

    let mut cf_descriptors = vec![ColumnFamilyDescriptor::new("default", Options::default())];
    cf_descriptors.push(ColumnFamilyDescriptor::new(LOCAL_DB_CF, Options::default()));

    let mut db_options = Options::default();
    db_options.create_if_missing(true);
    db_options.create_missing_column_families(true);

    let db = DB::open_cf_descriptors(&db_options, &db_path, cf_descriptors)?;
    let db = Arc::new(db);

    let bus = Arc::new(RocksDbBus::new(db.clone(), LOCAL_DB_CF));
    let adapter = Arc::new(RpcMainChainClient::new(
        rpc_settings.endpoint,
        rpc_settings.user,
        rpc_settings.password,
    ));
    let filter = Arc::new(PrefixExecNameFilter);
    let caught_up = CaughtUpFlag::new();
    let commit_tracker = CommitTracker::new(
        Arc::new(NoopCommitMsgSubmitter),
        adapter.clone(),
        caught_up.clone(),
        follower_config.title.clone(),
    );

    let ctx = Arc::new(FollowerContext::new(bus, adapter, filter, commit_tracker, follower_config));

    let cancel = CancellationToken::new();
    let metrics_addr: SocketAddr = cli.metrics_addr.parse()?;
    let metrics_task = tokio::spawn(serve_metrics(metrics_addr));

    let follower_cancel = cancel.clone();
    let follower_ctx = ctx.clone();
    let follower_task = tokio::spawn(async move {
        run_follower_loop(follower_ctx, follower_cancel).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cancel.cancel();

    let _ = follower_task.await;
    metrics_task.abort();

    Ok(())
}

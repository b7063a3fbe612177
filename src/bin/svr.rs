use std::{net::IpAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::info;

use redis_lite::{
    conf::Configuration,
    net::{Dispatcher, Server},
    storage::{DashMapStorage, FileSnapshotStore},
    telemetry::{get_subscriber, init_subscriber},
};

/// A minimal Redis-like key-value server.
#[derive(Parser, Debug)]
#[clap(name = "svr", version, author, long_about = None)]
struct Cli {
    /// Path to a configuration file.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Host address to listen on.
    #[clap(long)]
    host: Option<IpAddr>,

    /// Port number to listen on.
    #[clap(long)]
    port: Option<u16>,

    /// Path of the snapshot file that is loaded at start-up and written by SAVE.
    #[clap(long)]
    snapshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("svr".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber)?;

    let cli = Cli::parse();
    let mut conf =
        Configuration::get(cli.config.as_deref()).context("could not read configuration")?;
    if let Some(host) = cli.host {
        conf.server.host = host;
    }
    if let Some(port) = cli.port {
        conf.server.port = port;
    }
    if let Some(path) = cli.snapshot {
        conf.storage.snapshot_path = path;
    }
    info!(?conf, "starting server");

    let snapshots = FileSnapshotStore::new(&conf.storage.snapshot_path);
    let storage = DashMapStorage::open(&snapshots);
    let dispatcher = Dispatcher::new(Arc::new(snapshots));

    let listener = conf
        .server
        .bind()
        .await
        .with_context(|| format!("could not bind to {}:{}", conf.server.host, conf.server.port))?;
    let server = Server::new(listener, storage, dispatcher, signal::ctrl_c()).limits(&conf.server);
    server.run().await;

    Ok(())
}

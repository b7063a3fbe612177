use std::net::IpAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};

use redis_lite::{
    net::Client,
    telemetry::{get_subscriber, init_subscriber},
    DEFAULT_PORT,
};

/// A minimal client for the key-value server.
#[derive(Parser)]
#[clap(name = "cli", version, author, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    cmd: Commands,

    /// The host address of the server.
    #[clap(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// The port number of the server.
    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is alive.
    Ping,

    /// Get key's value.
    Get {
        #[clap(name = "KEY")]
        key: String,
    },

    /// Set key's value.
    Set {
        #[clap(name = "KEY")]
        key: String,
        #[clap(name = "VALUE")]
        value: String,
        /// Expire the key after this many seconds.
        #[clap(long)]
        ex: Option<u64>,
    },

    /// Delete keys.
    Del {
        #[clap(name = "KEY", required = true)]
        keys: Vec<String>,
    },

    /// Increment the integer stored at key.
    Incr {
        #[clap(name = "KEY")]
        key: String,
    },

    /// Decrement the integer stored at key.
    Decr {
        #[clap(name = "KEY")]
        key: String,
    },

    /// Persist a snapshot of the server's storage.
    Save,

    /// Send any command as is.
    Raw {
        #[clap(name = "ARGS", required = true)]
        args: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("cli".into(), "warn".into(), std::io::stderr);
    init_subscriber(subscriber)?;

    let cli = Cli::parse();

    let addr = format!("{}:{}", cli.host, cli.port);
    let mut client = Client::connect(&addr)
        .await
        .with_context(|| format!("could not connect to {}", addr))?;
    let reply = match cli.cmd {
        Commands::Ping => client.ping().await?,
        Commands::Get { key } => client.get(&key).await?,
        Commands::Set { key, value, ex } => match ex {
            Some(seconds) => client.set_ex(&key, &value, seconds).await?,
            None => client.set(&key, &value).await?,
        },
        Commands::Del { keys } => client.del(&keys).await?,
        Commands::Incr { key } => client.send(&["INCR", key.as_str()]).await?,
        Commands::Decr { key } => client.send(&["DECR", key.as_str()]).await?,
        Commands::Save => client.save().await?,
        Commands::Raw { args } => client.send(&args).await?,
    };
    println!("{}", reply);

    Ok(())
}

//! Proton server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage, default certificates in the working directory
//! proton-server --bind 127.0.0.1:6666
//!
//! # Persistent storage and explicit secrets
//! PROTON_SECRET_KEY=... PROTON_SALT=... \
//!     proton-server --cert server.pem --key server.key --client-ca client.pem --db proton.redb
//! ```

use std::time::Duration;

use clap::Parser;
use proton_server::{
    DEFAULT_PEER_IDENTITY, DriverConfig, MemoryStorage, RedbStorage, Server, ServerRuntimeConfig,
    Storage,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Proton request/response server
#[derive(Parser, Debug)]
#[command(name = "proton-server")]
#[command(about = "Proton mutually-authenticated request/response server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:6666")]
    bind: String,

    /// Path to the server certificate chain (PEM format)
    #[arg(short, long, default_value = "server.pem")]
    cert: String,

    /// Path to the server private key (PEM format)
    #[arg(short, long, default_value = "server.key")]
    key: String,

    /// CA bundle client certificates must chain to (PEM format)
    #[arg(long, default_value = "client.pem")]
    client_ca: String,

    /// Common name client certificates must carry
    #[arg(long, default_value = DEFAULT_PEER_IDENTITY)]
    peer_identity: String,

    /// Persist records to this redb file instead of memory
    #[arg(long)]
    db: Option<String>,

    /// Secret the password-cipher key is derived from
    #[arg(long, env = "PROTON_SECRET_KEY", default_value = "SECRET_KEY", hide_env_values = true)]
    secret_key: String,

    /// Salt for the password-cipher key derivation
    #[arg(long, env = "PROTON_SALT", default_value = "SALT", hide_env_values = true)]
    salt: String,

    /// Session token lifetime in seconds (sliding)
    #[arg(long, default_value = "900")]
    token_ttl_secs: u64,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Proton server starting");
    tracing::info!("Binding to {}", args.bind);

    if args.secret_key == "SECRET_KEY" || args.salt == "SALT" {
        tracing::warn!("Using the built-in secret key or salt");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        client_ca_path: args.client_ca,
        secret_key: args.secret_key,
        salt: args.salt,
        driver: DriverConfig {
            max_connections: args.max_connections,
            expected_identity: args.peer_identity,
            token_ttl: Duration::from_secs(args.token_ttl_secs),
            ..Default::default()
        },
    };

    match args.db {
        Some(path) => {
            tracing::info!("Persisting to {}", path);
            serve(config, RedbStorage::open(&path)?).await
        },
        None => {
            tracing::warn!("Using in-memory storage - records are lost on exit");
            serve(config, MemoryStorage::new()).await
        },
    }
}

async fn serve<S: Storage>(
    config: ServerRuntimeConfig,
    storage: S,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config, storage).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}

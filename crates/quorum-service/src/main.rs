use clap::{Parser, ValueEnum};
use quorum_core::StorageConfig;
use quorum_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "quorumd", version, about = "Quorum approval workflow service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8094
    #[arg(long, default_value = "127.0.0.1:8094")]
    listen: SocketAddr,
    /// Workflow persistence backend. `auto` picks postgres when a database
    /// url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "QUORUM_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for workflow and vote persistence.
    #[arg(long, env = "QUORUM_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "QUORUM_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Directory fixture file (templates, memberships, roles).
    #[arg(long, env = "QUORUM_DIRECTORY")]
    directory: Option<PathBuf>,
    /// Expiry horizon applied when neither a request nor its template
    /// names one.
    #[arg(long, default_value_t = 72, env = "QUORUM_DEFAULT_EXPIRES_IN_HOURS")]
    default_expires_in_hours: i64,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                StorageConfig::postgres(database_url, cli.pg_max_connections)
            } else {
                StorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "quorum_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let storage = resolve_storage(&cli)?;
    let config = ServiceConfig {
        storage,
        directory_path: cli.directory,
        default_expires_in_hours: cli.default_expires_in_hours,
    };

    let state = ServiceState::bootstrap(config).await?;
    info!(
        storage_backend = state.backend_label(),
        "quorum engine bootstrapped"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("quorum-service REST listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

use clap::{Parser, Subcommand};
use reviews::config::AppConfig;
use reviews::marketplace::{refresh_marketplace_images, RefreshOptions, StubProvider};
use reviews::{app, auth, storage};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser)]
#[command(name = "reviews", about = "Affiliate review catalog with click tracking and analytics")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create an operator account for the admin API
    CreateOperator {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Grant admin rights (can manage every operator's tokens)
        #[arg(long)]
        admin: bool,
    },
    /// Fetch marketplace image URLs for products with an ASIN
    RefreshImages {
        /// Only products without a marketplace image
        #[arg(long)]
        only_missing: bool,
        /// Process at most N products (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reviews=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config))?;

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    // Setup SQLite pool
    let pool = storage::sqlite::create_pool(&config.database)?;
    storage::sqlite::init_pool(&pool).await?;
    tracing::info!(db = %config.database.path.display(), "database initialized");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await,
        Command::CreateOperator {
            username,
            password,
            admin,
        } => {
            let operator =
                auth::operators::create_operator(&pool, &username, &password, admin).await?;
            tracing::info!(
                operator_id = %operator.id,
                username = %operator.username,
                is_admin = operator.is_admin,
                "operator created"
            );
            Ok(())
        }
        Command::RefreshImages {
            only_missing,
            limit,
        } => {
            let report = refresh_marketplace_images(
                &pool,
                &StubProvider,
                RefreshOptions {
                    only_missing,
                    limit,
                },
            )
            .await?;
            tracing::info!(
                updated = report.updated,
                skipped = report.skipped,
                "marketplace image refresh done"
            );
            Ok(())
        }
    }
}

async fn serve(
    config: AppConfig,
    pool: deadpool_sqlite::Pool,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        trusted_proxies = config.server.trusted_proxies.len(),
        "starting reviews"
    );

    // Spawn session cleanup
    let cleanup_pool = pool.clone();
    tokio::spawn(async move {
        auth::session::session_cleanup_loop(cleanup_pool).await;
    });

    let app = app::build_router(&config, pool)?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}

use batch_node::api::create_router;
use batch_node::config::Config;
use batch_node::executor::{ProcessRunner, TokioProcessRunner};
use batch_node::git::{ForkSettings, GitHubHost, RemoteHost, RepositoryClient};
use batch_node::paths::{self, DataLayout};
use batch_node::repository::{SqliteCommandStore, establish_connection};
use batch_node::services::{EngineDeps, EngineSettings, ExecutionEngine, FileLogSink, ZipArchiver};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn run_server<F>(shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batch_node=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting batch_node with config: {:?}", config);

    let layout = DataLayout::under(&paths::data_dir()?);
    layout.create_all()?;

    if let Some(path) = config.database_url.strip_prefix("sqlite:") {
        let path = std::path::Path::new(path.split('?').next().unwrap_or(path));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Establish database connection
    let db_pool = establish_connection(&config.database_url).await?;
    tracing::info!("Database connected: {}", config.database_url);

    // Collaborators
    let store = Arc::new(SqliteCommandStore::new(db_pool));
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let remote: Arc<dyn RemoteHost> = Arc::new(GitHubHost::new(
        config.github_token.clone(),
        config.github_api_base.clone(),
    ));
    let repos = RepositoryClient::new(
        runner.clone(),
        remote,
        ForkSettings {
            owner: config.fork_owner.clone(),
            ssh: config.use_ssh,
            poll_attempts: config.fork_poll_attempts,
            poll_interval: Duration::from_secs(config.fork_poll_interval_secs),
        },
        config.git_timeout(),
    );

    let deps = EngineDeps {
        store,
        repos,
        runner,
        log: Arc::new(FileLogSink::new(&layout.logs_dir)),
        archiver: Arc::new(ZipArchiver::new(&layout.archive_dir)),
    };
    let settings = EngineSettings {
        work_dir: layout.work_dir.clone(),
        tool_program: config.tool_program.clone(),
        tool_timeout: config.tool_timeout(),
    };

    let (engine, _worker) = ExecutionEngine::start(deps, settings);
    let recovery = engine.init_check().await?;
    tracing::info!(
        "Recovery finished: {} failed, {} requeued",
        recovery.failed.len(),
        recovery.requeued.len()
    );

    // Create router
    let app = create_router(engine);
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let addr = addr.parse::<SocketAddr>()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_server(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", err);
        }
        tracing::info!("Shutdown signal received");
    })
    .await
}

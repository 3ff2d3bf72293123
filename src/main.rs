mod cli;

use clap::Parser;
use cli::{Cli, Commands, DbCommands, TxCommands};
use payment_intake::config::{Config, LogFormat};
use payment_intake::gateways::GatewayRegistry;
use payment_intake::AppState;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_info = Config::from_env()?;

    // Setup logging
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config_info.config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
    tracing::info!(
        profile = config_info.profile.as_str(),
        overrides = ?config_info.overrides,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config_info.config).await,
        Commands::Config => cli::handle_config_validate(&config_info),
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config_info.config).await,
        Commands::Tx(command) => {
            let state = build_state(config_info.config).await?;
            match command {
                TxCommands::Resolve { tx_id } => cli::handle_tx_resolve(&state, tx_id).await,
                TxCommands::Sweep => cli::handle_tx_sweep(&state).await,
            }
        }
    }
}

async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let store = payment_intake::db::connect_ledger(&config).await?;
    let registry = GatewayRegistry::from_config(&config);
    Ok(AppState::new(config, store, registry)?)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let state = build_state(config).await?;

    let worker = state.reconciliation.clone();
    let settings = state.config.reconcile.clone();
    tokio::spawn(async move {
        worker.run_worker(settings).await;
    });

    let app = payment_intake::create_app(state);

    tracing::info!("listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

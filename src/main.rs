use anyhow::Result;
use clap::Parser;
use room_restyle::ledger::{CreditLedger, SqliteCreditLedger};
use room_restyle::models::Config;
use room_restyle::orchestrator::GenerationOrchestrator;
use room_restyle::server::{self, AppState};
use room_restyle::status::StatusReporter;
use room_restyle::storage::Database;
use room_restyle::store::{JobStore, SqliteJobStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "room-restyle")]
#[command(about = "Serve credit-backed AI room restyling")]
struct CliArgs {
    /// Address to listen on (overrides BIND_ADDR).
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Open a profile at startup, as USER:CREDITS. Repeatable.
    #[arg(long = "seed-profile", value_name = "USER:CREDITS", value_parser = parse_seed_profile)]
    seed_profiles: Vec<(String, u32)>,
}

fn parse_seed_profile(input: &str) -> std::result::Result<(String, u32), String> {
    let invalid = || format!("Invalid profile '{}'. Expected format: USER:CREDITS", input);

    let (user, credits) = input.rsplit_once(':').ok_or_else(invalid)?;
    let user = user.trim();
    if user.is_empty() {
        return Err(invalid());
    }
    let credits = credits.trim().parse::<u32>().map_err(|_| invalid())?;
    Ok((user.to_string(), credits))
}

async fn build_state(config: &Config, seed_profiles: &[(String, u32)]) -> Result<AppState> {
    let db = Arc::new(Database::open(&config.database_path)?);
    info!("Using database at {}", config.database_path.display());

    let ledger: Arc<dyn CreditLedger> = Arc::new(SqliteCreditLedger::new(Arc::clone(&db)));
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db));

    for (user_id, credits) in seed_profiles {
        ledger.open_account(user_id, *credits).await?;
    }

    let orchestrator =
        GenerationOrchestrator::from_config(config, Arc::clone(&ledger), Arc::clone(&store))?;

    Ok(AppState {
        orchestrator: Arc::new(orchestrator),
        status: StatusReporter::new(store),
        ledger,
        starting_credits: config.starting_credits,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_restyle=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting room-restyle");

    let args = CliArgs::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let addr = args.bind.unwrap_or(config.bind_addr);

    match build_state(&config, &args.seed_profiles).await {
        Ok(state) => match server::serve(addr, state).await {
            Ok(_) => {
                info!("Server stopped");
                Ok(())
            }
            Err(e) => {
                error!("Server failed: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!("Failed to initialize service: {}", e);
            std::process::exit(1);
        }
    }
}

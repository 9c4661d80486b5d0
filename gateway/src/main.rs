mod api;
mod bindings;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, error, warn, Level};
use tower_http::trace::TraceLayer;
use std::sync::Arc;
use std::time::Duration;

// Internal imports
use crate::api::{AnalyzeRequest, ApiError, RoleSummary};
use crate::bindings::BindingStore;
use riskflow_core::{
    catalog::ToolCatalog,
    config::OrchestratorConfig,
    llm::{AssistantRuns, Brain},
    registry::RoleRegistry,
    runtime::RunController,
    sequencer::{Subject, WorkflowReport, WorkflowSequencer},
    tool_client::HttpToolClient,
};

#[derive(Parser)]
#[command(name = "riskflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs the merchant ML/TL review chain", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve POST /analyze over HTTP
    Serve {
        #[arg(long, env = "RISKFLOW_ADDR", default_value = "0.0.0.0:3000")]
        addr: String,
    },

    /// Analyze merchants one after another and print each report
    Analyze {
        /// Merchant IDs, e.g. M1005 M1012
        #[arg(required = true)]
        merchant_ids: Vec<String>,

        /// Analysis window in days (overrides RISKFLOW_ANALYSIS_DAYS)
        #[arg(short, long)]
        days: Option<i64>,

        /// Pause between merchants
        #[arg(long, default_value_t = 5)]
        pause_secs: u64,
    },
}

// 1. Application State
// Everything here is read-only once startup finishes.
#[derive(Clone)]
struct AppState {
    sequencer: Arc<WorkflowSequencer>,
    registry: Arc<RoleRegistry>,
    analysis_days: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // 2. Logging Setup
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .compact()
        .init();

    info!("riskflow initializing...");
    let config = OrchestratorConfig::from_env()?;
    let state = bootstrap(&config).await?;

    match cli.command {
        Commands::Serve { addr } => serve(state, &addr).await,
        Commands::Analyze {
            merchant_ids,
            days,
            pause_secs,
        } => analyze_batch(state, merchant_ids, days, Duration::from_secs(pause_secs)).await,
    }
}

// Any error in here is fatal: bad config must not reach a workflow.
async fn bootstrap(config: &OrchestratorConfig) -> Result<AppState> {
    // 3. Load The Catalog (The Menu)
    info!("Loading tool catalog from {}...", config.tool_service_url);
    let http = reqwest::Client::builder()
        .timeout(config.tool_timeout)
        .build()?;
    let catalog = ToolCatalog::fetch(&http, &config.tool_service_url)
        .await
        .context("Is the tool service running?")?;
    let catalog = Arc::new(catalog);
    info!("Loaded {} tools.", catalog.len());

    // 4. Load and validate the roles
    let registry = match &config.roles_path {
        Some(path) => RoleRegistry::load(path).await?,
        None => RoleRegistry::standard(),
    };
    registry
        .validate(&catalog)
        .context("Role configuration does not match the tool catalog")?;
    info!("Validated {} roles.", registry.roles().len());

    // 5. Initialize The Brain and bind each role to an assistant
    info!("Connecting to OpenAI Brain...");
    let brain = Brain::new()?;
    match brain.say_hello().await {
        Ok(msg) => info!("Brain Status: {}", msg),
        Err(e) => warn!("Brain is online but unresponsive: {}", e),
    }
    let mut store = BindingStore::load(&config.bindings_path).await?;
    let bindings = store.resolve(&brain, &registry, &catalog).await?;

    // 6. Wire controller + sequencer
    let model = Arc::new(AssistantRuns::new(brain, bindings));
    let tools = Arc::new(HttpToolClient::with_client(
        http,
        &config.tool_service_url,
        catalog.clone(),
    ));
    let controller = RunController::new(model, tools).with_poll_policy(config.poll.clone());
    let sequencer = WorkflowSequencer::new(Arc::new(controller), config.run_deadline);

    Ok(AppState {
        sequencer: Arc::new(sequencer),
        registry: Arc::new(registry),
        analysis_days: config.analysis_days,
    })
}

async fn serve(state: AppState, addr: &str) -> Result<()> {
    // 7. Define Routes
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/roles", get(list_roles))
        .route("/analyze", post(submit_analysis))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // 8. Start Server
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Gateway listening on {}...", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn analyze_batch(
    state: AppState,
    merchant_ids: Vec<String>,
    days: Option<i64>,
    pause: Duration,
) -> Result<()> {
    let roles = state.registry.roles().to_vec();
    let days = days.unwrap_or(state.analysis_days);

    for (i, merchant_id) in merchant_ids.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(pause).await;
        }

        info!("Starting analysis for merchant {}", merchant_id);
        let subject =
            Subject::trailing_days(merchant_id.as_str(), days).context("Invalid --days")?;
        let report = state.sequencer.run_workflow(&subject, &roles).await;
        log_outcome(&report);

        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn log_outcome(report: &WorkflowReport) {
    match report.failure() {
        None => info!("Analysis complete for merchant {}", report.subject_id),
        Some(entry) => error!(
            "Workflow stopped for merchant {} at '{}'",
            report.subject_id, entry.role_name
        ),
    }
}

// --- HANDLERS ---

async fn health_check() -> &'static str {
    "riskflow gateway: operational"
}

async fn list_roles(State(state): State<AppState>) -> Json<Vec<RoleSummary>> {
    Json(state.registry.roles().iter().map(RoleSummary::from).collect())
}

async fn submit_analysis(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<WorkflowReport>, ApiError> {
    let merchant_id = payload.merchant_id.trim();
    if merchant_id.is_empty() {
        return Err(ApiError::bad_request("merchant_id must not be empty"));
    }

    let days = payload.days.unwrap_or(state.analysis_days);
    let subject = Subject::trailing_days(merchant_id, days)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    // Default: the full pipeline in registry order
    let roles = match &payload.roles {
        Some(names) => state
            .registry
            .sequence(names)
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => state.registry.roles().to_vec(),
    };

    info!("Analysis requested for merchant {} ({} roles, {} days)", merchant_id, roles.len(), days);
    let report = state.sequencer.run_workflow(&subject, &roles).await;
    log_outcome(&report);

    Ok(Json(report))
}

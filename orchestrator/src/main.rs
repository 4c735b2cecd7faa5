use std::sync::Arc;

use tracing::{info, warn};
use warp::Filter;

use trip_orchestrator::agents::{register_travel_agents, IntentRouter, TRAVEL_SKILLS};
use trip_orchestrator::config::{Config, StoreBackend};
use trip_orchestrator::llm::{ChatCompletionClient, TextCompletion};
use trip_orchestrator::protocol::Broker;
use trip_orchestrator::redis_client::RedisClient;
use trip_orchestrator::store::{MemoryPlanStore, PgPlanStore, PlanStore};
use trip_orchestrator::workflow::{PipelineExecutor, WorkflowManager};
use trip_orchestrator::{api, db, metrics, middleware};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so .env can carry RUST_LOG / LOG_LEVEL
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!("Starting trip planning orchestrator");

    // Plan store
    let store: Arc<dyn PlanStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let db_pool = db::create_pool(&config.database_url).await?;
            info!("Database connection pool created");
            db::run_migrations(&db_pool).await?;
            info!("Database migrations applied");
            Arc::new(PgPlanStore::new(db_pool))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory plan store; plans are lost on restart");
            Arc::new(MemoryPlanStore::new())
        }
    };

    // Optional Redis status mirror
    let mirror = if config.redis_url.is_empty() {
        None
    } else {
        let client = RedisClient::new(&config.redis_url).await?;
        info!("Redis connection established");
        Some(client)
    };

    let llm: Arc<dyn TextCompletion> = Arc::new(ChatCompletionClient::from_config(&config)?);

    // Agents
    let broker = Broker::new_shared(config.request_timeout());
    let agents = register_travel_agents(&broker, llm.clone(), TRAVEL_SKILLS, config.agent_max_concurrency)?;
    info!(agents = agents.len(), "Agents registered");

    let mut router = IntentRouter::for_skills(broker.clone(), TRAVEL_SKILLS);
    if config.router_use_model {
        router = router.with_classifier(llm.clone());
    }

    let stages = TRAVEL_SKILLS.iter().map(|s| s.name.to_string()).collect();
    let executor = PipelineExecutor::new(broker.clone(), stages, llm).with_deadline(config.pipeline_deadline());
    let manager = WorkflowManager::new(Arc::new(executor), store).with_mirror(mirror, config.status_ttl_secs);

    // Build API routes
    let api_routes = api::routes(Arc::new(manager), Arc::new(router))
        .with(warp::log("api"))
        .with(middleware::cors());

    // Health check route
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({"status": "healthy"})));

    // Metrics route
    let metrics = warp::path("metrics").and(warp::get()).map(|| {
        let (buffer, content_type) = metrics::render();
        warp::reply::with_header(buffer, "Content-Type", content_type)
    });

    let routes = health.or(metrics).or(api_routes);

    // Start server
    let addr = ([0, 0, 0, 0], config.port);
    info!("Server listening on {}", addr.1);

    warp::serve(routes).run(addr).await;

    Ok(())
}

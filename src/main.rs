use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::Extension, routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use tracing_subscriber::{fmt, EnvFilter};

use scan_host::config;
use scan_host::envstore::EnvStore;
use scan_host::orchestrator::ScanOrchestrator;
use scan_host::platform::{PlatformApi, PlatformClient};
use scan_host::routes::api_routes;
use scan_host::runner::{
    docker::ContainerSettings, ContainerRunner, JobServiceRunner, ScanRunner,
};
use scan_host::scand::ScandManagerClient;
use scan_host::terminal::TerminalRegistry;

async fn root() -> &'static str {
    "Conformance Scan Host API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    let connection = config::platform_connection_from_env();
    let timings = config::scan_timings_from_env();
    let env_store = Arc::new(EnvStore::from_env_file()?);

    // Both runners hand this endpoint to the scan workload; refuse to start
    // without one rather than fail every run later.
    let platform_service = connection
        .resolved_services()
        .ok_or("platform services endpoint could not be resolved; set PLATFORM_SERVICES")?;

    let platform: Arc<dyn PlatformApi> =
        Arc::new(PlatformClient::new(connection.clone(), timings.clone())?);

    let runner: Arc<dyn ScanRunner> = match config::SCAN_RUNTIME.as_str() {
        "scand-manager" => {
            let scand = Arc::new(ScandManagerClient::new(config::scand_manager_from_env())?);
            Arc::new(JobServiceRunner::new(
                scand,
                Arc::clone(&env_store),
                platform_service,
                config::SCAN_IMAGE.clone(),
                timings.job_interval,
                timings.job_deadline,
            ))
        }
        _ => Arc::new(ContainerRunner::new(
            Arc::clone(&env_store),
            Arc::new(TerminalRegistry::new()),
            ContainerSettings {
                scan_image: config::SCAN_IMAGE.clone(),
                platform_service,
                use_host_network: *config::USE_HOST_NETWORK,
                target_platform: *config::TARGET_PLATFORM,
            },
        )),
    };

    let orchestrator = Arc::new(ScanOrchestrator::new(platform, runner, timings));

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(orchestrator));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

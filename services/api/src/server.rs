use crate::cli::ServeArgs;
use crate::infra::{allocation_service, hydrated_store, AppState, DEFAULT_CONFIG_ID};
use crate::routes::with_allocation_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use dorm_alloc::config::AppConfig;
use dorm_alloc::error::AppError;
use dorm_alloc::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = hydrated_store(&args.roster)?;
    let service = allocation_service(&store, config.engine);

    let app = with_allocation_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        config_id = DEFAULT_CONFIG_ID,
        algorithm = %args.roster.algorithm,
        workers = config.engine.worker_pool_size,
        "dormitory allocation service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

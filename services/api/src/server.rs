use crate::cli::ServeArgs;
use crate::infra::{in_memory_wiring, AppState, LoggingNotifier};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use fonds_argile::config::AppConfig;
use fonds_argile::error::AppError;
use fonds_argile::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    if config.simulation.generated_key {
        warn!("RGA_ENCRYPTION_KEY not set; simulator hand-offs will not survive a restart");
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let wiring = in_memory_wiring(&config, Arc::new(LoggingNotifier));

    let app = with_service_routes(wiring.api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "fonds prévention argile service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

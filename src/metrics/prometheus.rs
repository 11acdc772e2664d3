//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::header::CONTENT_TYPE;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "backup_claim_operator_reconciliations_total",
        "Total number of reconciliations",
        &["kind"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "backup_claim_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["kind"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "backup_claim_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 60.0, 300.0]
    ).unwrap();

    /// Claim status transitions by resulting status
    pub static ref CLAIM_STATUS_UPDATES: CounterVec = register_counter_vec!(
        "backup_claim_operator_status_updates_total",
        "Claim status updates by status and outcome",
        &["status", "outcome"]
    ).unwrap();

    /// Destination pods created for claims
    pub static ref DESTINATIONS_CREATED: CounterVec = register_counter_vec!(
        "backup_claim_operator_destinations_created_total",
        "Destination pods created for claims",
        &["namespace"]
    ).unwrap();

    /// Cold-tier restore requests issued
    pub static ref THAW_REQUESTS: CounterVec = register_counter_vec!(
        "backup_claim_operator_thaw_requests_total",
        "Cold-tier restore requests issued",
        &["bucket"]
    ).unwrap();

    /// Transfers by kind and outcome
    pub static ref TRANSFERS_TOTAL: CounterVec = register_counter_vec!(
        "backup_claim_operator_transfers_total",
        "Transfers into destinations by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    /// Bytes streamed into destinations
    pub static ref BYTES_TRANSFERRED: CounterVec = register_counter_vec!(
        "backup_claim_operator_transferred_bytes_total",
        "Bytes streamed into destinations",
        &["kind"]
    ).unwrap();

    /// Transfer duration histogram
    pub static ref TRANSFER_DURATION: HistogramVec = register_histogram_vec!(
        "backup_claim_operator_transfer_duration_seconds",
        "Duration of transfers into destinations",
        &["kind"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "backup_claim_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Route a request to the metrics or health endpoints
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => text_response(StatusCode::OK, "ok"),
        "/readyz" | "/ready" if OPERATOR_HEALTH.get() >= 1.0 => text_response(StatusCode::OK, "ok"),
        "/readyz" | "/ready" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

/// Encode every registered metric family
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = encoder.format_type().parse() {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

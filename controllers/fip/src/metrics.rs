//! Prometheus metrics and the /metrics HTTP endpoint.

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use once_cell::sync::Lazy;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};
use std::convert::Infallible;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

const METRIC_NAMESPACE: &str = "kube_fip_controller";

/// Content type for Prometheus metrics.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Counter for successful operations.
pub static SUCCESSFUL_OPERATIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        format!("{}_successful_operations_total", METRIC_NAMESPACE),
        "Counter for successful operations."
    )
    .expect("metric creation should not fail")
});

/// Counter for failed operations.
pub static FAILED_OPERATIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        format!("{}_failed_operations_total", METRIC_NAMESPACE),
        "Counter for failed operations."
    )
    .expect("metric creation should not fail")
});

/// Counter for creating FIP errors.
pub static CREATE_FIP_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        format!("{}_create_fip_errors_total", METRIC_NAMESPACE),
        "Counter for creating FIP errors."
    )
    .expect("metric creation should not fail")
});

/// Counter for associating instance and FIP errors.
pub static ASSOCIATE_INSTANCE_FIP_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        format!("{}_associate_instance_fip_errors_total", METRIC_NAMESPACE),
        "Counter for associating instance and FIP errors."
    )
    .expect("metric creation should not fail")
});

/// Forces registration of all counters so they appear in scrapes before the
/// first increment.
pub fn register() {
    Lazy::force(&SUCCESSFUL_OPERATIONS);
    Lazy::force(&FAILED_OPERATIONS);
    Lazy::force(&CREATE_FIP_ERRORS);
    Lazy::force(&ASSOCIATE_INSTANCE_FIP_ERRORS);
}

/// Renders the current state of the default registry in Prometheus text format.
fn render_metrics() -> Response<Full<Bytes>> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&metric_families, &mut buffer) {
        error!(error = %err, "failed to encode metrics");
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::new()))
            .expect("response build should not fail");
    }
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", PROMETHEUS_CONTENT_TYPE)
        .body(Full::new(Bytes::from(buffer)))
        .expect("response build should not fail")
}

async fn handle<B>(request: Request<B>) -> Result<Response<Full<Bytes>>, Infallible> {
    if request.uri().path() == "/metrics" {
        return Ok(render_metrics());
    }
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::new()))
        .expect("response build should not fail"))
}

/// Serves Prometheus metrics on `host:port` until the stop signal fires.
pub async fn serve_metrics(host: IpAddr, port: u16, mut stop: watch::Receiver<bool>) {
    let addr = (host, port);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "failed to serve prometheus metrics");
            return;
        }
    };
    info!(address = %format!("{}:{}", host, port), path = "/metrics", "serving prometheus metrics");

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        debug!(error = %err, "failed to accept metrics connection");
                        continue;
                    }
                };
                tokio::spawn(async move {
                    let result = http1::Builder::new()
                        .timer(TokioTimer::new())
                        .header_read_timeout(Duration::from_secs(5))
                        .serve_connection(TokioIo::new(stream), service_fn(handle))
                        .await;
                    if let Err(err) = result {
                        debug!(error = %err, "metrics connection error");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_metrics_returns_prometheus_format() {
        register();
        let response = render_metrics();
        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        assert!(content_type.starts_with("text/plain; version=0.0.4"));
    }

    #[test]
    fn render_metrics_contains_all_counters() {
        register();
        let response = render_metrics();
        let body = response.into_body();
        let bytes = futures::executor::block_on(async {
            use http_body_util::BodyExt;
            BodyExt::collect(body).await.unwrap().to_bytes()
        });
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.contains("kube_fip_controller_successful_operations_total"));
        assert!(text.contains("kube_fip_controller_failed_operations_total"));
        assert!(text.contains("kube_fip_controller_create_fip_errors_total"));
        assert!(text.contains("kube_fip_controller_associate_instance_fip_errors_total"));
    }
}

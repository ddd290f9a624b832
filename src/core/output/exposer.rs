//! HTTP scrape endpoint for the Prometheus registry.

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use super::{error::OutputError, prometheus::render_registry};

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Router serving `GET /metrics`.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(registry)
}

async fn handle_metrics(State(registry): State<Arc<Registry>>) -> Response<Body> {
    match render_registry(&registry) {
        Ok(body) => {
            debug!("Serving {} bytes of metrics", body.len());
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)
                .body(Body::from(body))
                .unwrap_or_default()
        }
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default()
        }
    }
}

/// Binds the scrape endpoint.
pub async fn bind(address: &str) -> Result<TcpListener, OutputError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| OutputError::Exposer {
            address: address.to_owned(),
            source,
        })
}

/// Serves the registry until `shutdown` completes.
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<Registry>,
    shutdown: F,
) -> Result<(), OutputError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = listener
        .local_addr()
        .map(|a: SocketAddr| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_owned());
    info!("Prometheus endpoint listening on http://{}/metrics", address);

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|source| OutputError::Exposer { address, source })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
        sync::oneshot,
    };

    use super::*;
    use crate::core::output::{
        prometheus::{KpiDescriptor, PrometheusSink},
        sink::{MetricSink, Tick, TickKind},
        OutputFrontend,
    };

    async fn get_path(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_registry() {
        let mut sink = PrometheusSink::new(
            &[KpiDescriptor::gauge("cpu_user", "User CPU")],
            &BTreeMap::new(),
        )
        .unwrap();
        let mut out = OutputFrontend::new();
        out.section_start("cpu");
        out.plong("user", 5);
        out.section_end();
        sink.push(
            out.tree(),
            &Tick {
                kind: TickKind::Sample,
                timestamp_ns: 0,
            },
        )
        .unwrap();

        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, sink.registry(), async move {
            let _ = stop_rx.await;
        }));

        let response = get_path(addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("application/openmetrics-text"));
        assert!(response.contains("cpu_user{function=\"cmonitor\",metric=\"cpu\"} 5"));

        let missing = get_path(addr, "/other").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_reports_address() {
        let taken = bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = bind(&addr).await.unwrap_err();
        assert!(matches!(err, OutputError::Exposer { address, .. } if address == addr));
    }
}

//! Prometheus metrics for the node.

use prometheus::{
    register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge, TextEncoder,
};

lazy_static::lazy_static! {
    pub static ref SHARDS_STORED: IntGauge = register_int_gauge!(
        "silo_node_shards_stored",
        "Number of shards held by this node"
    ).unwrap();

    pub static ref BYTES_AVAILABLE: IntGauge = register_int_gauge!(
        "silo_node_bytes_available",
        "Bytes still available under the storage allocation"
    ).unwrap();

    pub static ref UPLOADS_TOTAL: IntCounter = register_int_counter!(
        "silo_node_uploads_total",
        "Completed shard uploads"
    ).unwrap();

    pub static ref DOWNLOADS_TOTAL: IntCounter = register_int_counter!(
        "silo_node_downloads_total",
        "Completed shard downloads"
    ).unwrap();

    pub static ref AUDIT_SUCCESS_TOTAL: IntCounter = register_int_counter!(
        "silo_node_audit_success_total",
        "Audit items answered with a proof"
    ).unwrap();

    pub static ref AUDIT_FAILURE_TOTAL: IntCounter = register_int_counter!(
        "silo_node_audit_failure_total",
        "Audit items answered with a null proof"
    ).unwrap();

    pub static ref OFFERS_QUEUED_TOTAL: IntCounter = register_int_counter!(
        "silo_node_offers_queued_total",
        "Offers admitted to an auction"
    ).unwrap();

    pub static ref OFFERS_REJECTED_TOTAL: IntCounter = register_int_counter!(
        "silo_node_offers_rejected_total",
        "Offers turned away by admission policy"
    ).unwrap();

    pub static ref TOKENS_ISSUED_TOTAL: IntCounter = register_int_counter!(
        "silo_node_tokens_issued_total",
        "Transfer tokens minted"
    ).unwrap();
}

/// Render all registered metrics as Prometheus text.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;

async fn handle_metrics(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(Response::new(Full::new(Bytes::from(get_metrics()))))
}

/// Start the metrics HTTP server in the background.
pub async fn start_metrics_server(port: u16) -> crate::error::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .map_err(|e| crate::error::NodeError::Config(format!("invalid metrics address: {e}")))?;

    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("Metrics server bind failed: {}", e);
                return;
            }
        };

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Metrics server accept error: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            tokio::spawn(async move {
                if let Err(e) = http1::Builder::new()
                    .serve_connection(io, service_fn(handle_metrics))
                    .await
                {
                    tracing::debug!("Metrics connection error: {}", e);
                }
            });
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_as_text() {
        UPLOADS_TOTAL.inc();
        let text = get_metrics();
        assert!(text.contains("silo_node_uploads_total"));
    }
}

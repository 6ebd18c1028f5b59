//! Optional HTTP endpoint exposing health and connection counters.

use crate::config::StatsConfig;
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Path serving the counters snapshot
pub const STATS_PATH: &str = "/stats";

pub struct StatsServer {
    listener: TcpListener,
    health_path: Arc<str>,
    metrics: Metrics,
}

impl StatsServer {
    pub async fn bind(config: &StatsConfig, metrics: Metrics) -> Result<Self> {
        let bind_addr = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind stats server to {}", bind_addr))?;
        Ok(Self {
            listener,
            health_path: Arc::from(config.path.as_str()),
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read stats listener address")
    }

    pub async fn run(self) -> Result<()> {
        info!(
            "Stats server listening on {} at path {}",
            self.local_addr()?,
            self.health_path
        );

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Stats accept error: {}", e);
                    continue;
                }
            };

            let health_path = Arc::clone(&self.health_path);
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let response = handle_request(&req, &health_path, &metrics);
                    async move { Ok::<_, Infallible>(response) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("Stats connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

fn handle_request<B>(
    req: &Request<B>,
    health_path: &str,
    metrics: &Metrics,
) -> Response<Full<Bytes>> {
    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    let path = req.uri().path();
    if path == STATS_PATH {
        return match serde_json::to_vec(&metrics.snapshot()) {
            Ok(body) => json(StatusCode::OK, body),
            Err(e) => {
                error!("Failed to encode stats: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        };
    }
    if path != health_path {
        return text(StatusCode::NOT_FOUND, "Not found");
    }

    let body = serde_json::json!({
        "status": "healthy",
        "service": "ssp"
    });
    json(StatusCode::OK, body.to_string().into_bytes())
}

fn json(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

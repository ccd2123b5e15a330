//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! split lets the binary report the bound port (and wire anything else that
//! needs the shutdown controller) before traffic arrives.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::routing::{get, post};
use axum::Router;
use infergate_core::CodecRegistry;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{
    batch_handler, config_handler, health_handler, infer_handler, liveness_handler,
    metrics_handler, nodes_handler, readiness_handler, AppState,
};
use super::middleware::apply_http_layers;
use super::shutdown::ShutdownController;
use crate::health::HealthMonitor;
use crate::service::backend::InferenceBackend;
use crate::service::config::GatewayConfig;
use crate::service::router::ServiceRouter;

/// Everything the HTTP layer serves on top of the network config.
#[derive(Clone)]
pub struct GatewayServices {
    pub gateway: Arc<GatewayConfig>,
    pub router: Arc<ServiceRouter>,
    pub backend: Arc<dyn InferenceBackend>,
    pub codecs: Arc<CodecRegistry>,
    pub monitor: Arc<HealthMonitor>,
}

/// Owns the HTTP server lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    services: GatewayServices,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, services: GatewayServices) -> Self {
        Self {
            config,
            services,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    fn app_state(&self) -> AppState {
        AppState {
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            gateway: Arc::clone(&self.services.gateway),
            router: Arc::clone(&self.services.router),
            backend: Arc::clone(&self.services.backend),
            codecs: Arc::clone(&self.services.codecs),
            monitor: Arc::clone(&self.services.monitor),
            start_time: self.start_time,
        }
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `POST /v1/infer` -- single inference, unary or SSE
    /// - `POST /v1/infer/batch` -- unary batch
    /// - `GET /v1/health` -- health monitor snapshot
    /// - `GET /v1/nodes`, `GET /v1/metrics` -- backend passthrough
    /// - `GET /v1/config` -- effective configuration
    /// - `GET /health/live`, `GET /health/ready` -- orchestrator probes
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/v1/infer", post(infer_handler))
            .route("/v1/infer/batch", post(batch_handler))
            .route("/v1/health", get(health_handler))
            .route("/v1/nodes", get(nodes_handler))
            .route("/v1/metrics", get(metrics_handler))
            .route("/v1/config", get(config_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(self.app_state());
        apply_http_layers(router, &self.config)
    }

    /// Binds the TCP listener and returns the bound port (OS-assigned when
    /// the configured port is 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// Starts the health monitor, moves to `Ready`, and on the shutdown
    /// signal:
    /// 1. moves to `Draining` so new inference requests get 503
    /// 2. waits up to `drain_timeout` for in-flight requests
    /// 3. cancels whatever is still running (open streams, health sweeps)
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, TLS material cannot be
    /// loaded, or the server hits a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;
        let router = self.build_router();
        let ctrl = Arc::clone(&self.shutdown);
        let monitor = Arc::clone(&self.services.monitor);
        let drain_timeout = self.config.drain_timeout;

        monitor.start(&ctrl.token());
        ctrl.set_ready();

        let signal = {
            let ctrl = Arc::clone(&ctrl);
            async move {
                shutdown.await;
                info!(in_flight = ctrl.in_flight_count(), "shutdown signal received");
                ctrl.trigger_shutdown();
                drain(&ctrl, drain_timeout).await;
            }
        };

        let served = match &self.config.tls {
            Some(tls) => serve_tls(listener, router, tls, signal).await,
            None => serve_plain(listener, router, signal).await,
        };

        ctrl.cancel_all();
        monitor.stop().await;
        if ctrl.wait_for_drain(drain_timeout).await {
            info!("gateway stopped");
        }
        served
    }
}

/// Waits for in-flight requests, cancelling the rest on timeout.
async fn drain(ctrl: &ShutdownController, timeout: Duration) {
    if ctrl.wait_for_drain(timeout).await {
        info!("all in-flight requests drained");
    } else {
        warn!(
            in_flight = ctrl.in_flight_count(),
            "drain timeout expired, cancelling remaining requests"
        );
        ctrl.cancel_all();
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP");
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await?;
    Ok(())
}

/// Serves TLS via `axum-server` with rustls, reusing the bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .with_context(|| {
            format!(
                "failed to load TLS material from {} and {}",
                tls.cert_path.display(),
                tls.key_path.display()
            )
        })?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        signal.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(%addr, "serving HTTPS");
    axum_server::from_tcp_rustls(std_listener, rustls)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

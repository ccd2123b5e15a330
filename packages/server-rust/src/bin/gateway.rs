//! `infergate`: HTTP inference gateway in front of a backend compute
//! cluster.
//!
//! ```bash
//! infergate --port 8080 --backend-url http://127.0.0.1:9000
//! INFERGATE_PORT=8080 INFERGATE_LOG_FORMAT=json infergate
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use infergate_core::resilience::{CircuitBreakerConfig, RetryPolicy};
use infergate_core::CodecRegistry;
use infergate_server::health::{BackendChecker, CircuitChecker, HealthMonitor};
use infergate_server::network::{GatewayServices, NetworkConfig, NetworkModule, TlsConfig};
use infergate_server::service::backend::InferenceBackend;
use infergate_server::service::config::GatewayConfig;
use infergate_server::service::handlers::HandlerDeps;
use infergate_server::service::http_backend::HttpBackend;
use infergate_server::service::resilient::ResilientBackend;
use infergate_server::service::router::ServiceRouter;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Fmt,
    Json,
}

/// Inference gateway: REST and SSE front end for a backend compute cluster.
#[derive(Debug, Parser)]
#[command(name = "infergate", version)]
struct Args {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "INFERGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on; 0 picks a free port.
    #[arg(long, env = "INFERGATE_PORT", default_value_t = 8080)]
    port: u16,

    /// Base URL of the inference backend.
    #[arg(long, env = "INFERGATE_BACKEND_URL", default_value = "http://127.0.0.1:9000")]
    backend_url: String,

    /// Per-call timeout for unary backend requests, in milliseconds.
    #[arg(long, env = "INFERGATE_BACKEND_TIMEOUT_MS", default_value_t = 30_000)]
    backend_timeout_ms: u64,

    /// Time allowed to produce response headers, in milliseconds.
    #[arg(long, env = "INFERGATE_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    request_timeout_ms: u64,

    /// Time allowed for in-flight requests to finish on shutdown, in
    /// milliseconds.
    #[arg(long, env = "INFERGATE_DRAIN_TIMEOUT_MS", default_value_t = 30_000)]
    drain_timeout_ms: u64,

    /// Disable retries of backend calls.
    #[arg(long, env = "INFERGATE_NO_RETRY")]
    no_retry: bool,

    /// Total backend attempts per call, including the first.
    #[arg(long, env = "INFERGATE_RETRY_MAX_ATTEMPTS", default_value_t = 3)]
    retry_max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, env = "INFERGATE_RETRY_BASE_BACKOFF_MS", default_value_t = 100)]
    retry_base_backoff_ms: u64,

    /// Cap on any single retry delay, in milliseconds.
    #[arg(long, env = "INFERGATE_RETRY_MAX_BACKOFF_MS", default_value_t = 5_000)]
    retry_max_backoff_ms: u64,

    /// Consecutive failures that open the circuit breaker.
    #[arg(long, env = "INFERGATE_BREAKER_MAX_FAILURES", default_value_t = 5)]
    breaker_max_failures: u32,

    /// Time the breaker stays open before a probe, in milliseconds.
    #[arg(long, env = "INFERGATE_BREAKER_RESET_MS", default_value_t = 30_000)]
    breaker_reset_ms: u64,

    /// Interval between health sweeps, in milliseconds.
    #[arg(long, env = "INFERGATE_HEALTH_INTERVAL_MS", default_value_t = 10_000)]
    health_interval_ms: u64,

    /// Deadline for each health check, in milliseconds.
    #[arg(long, env = "INFERGATE_HEALTH_CHECK_TIMEOUT_MS", default_value_t = 5_000)]
    health_check_timeout_ms: u64,

    /// Buffered chunks per backend stream.
    #[arg(long, env = "INFERGATE_STREAM_CAPACITY", default_value_t = 64)]
    stream_capacity: usize,

    /// Maximum requests per batch call.
    #[arg(long, env = "INFERGATE_MAX_BATCH_SIZE", default_value_t = 32)]
    max_batch_size: usize,

    /// Allowed CORS origins; `*` allows any.
    #[arg(
        long = "cors-origin",
        env = "INFERGATE_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "*"
    )]
    cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    #[arg(long, env = "INFERGATE_BODY_LIMIT", default_value_t = 32 * 1024 * 1024)]
    body_limit: usize,

    /// PEM certificate; enables TLS together with `--tls-key`.
    #[arg(long, env = "INFERGATE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for `--tls-cert`.
    #[arg(long, env = "INFERGATE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "INFERGATE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Log output format.
    #[arg(long, env = "INFERGATE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Fmt)]
    log_format: LogFormat,
}

impl Args {
    fn network_config(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            body_limit: self.body_limit,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }

    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            backend_url: self.backend_url.clone(),
            backend_timeout: Duration::from_millis(self.backend_timeout_ms),
            retry: RetryPolicy {
                enabled: !self.no_retry,
                max_attempts: self.retry_max_attempts,
                base_backoff: Duration::from_millis(self.retry_base_backoff_ms),
                max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
                ..RetryPolicy::default()
            },
            breaker: CircuitBreakerConfig {
                max_failures: self.breaker_max_failures,
                reset_timeout: Duration::from_millis(self.breaker_reset_ms),
            },
            health_interval: Duration::from_millis(self.health_interval_ms),
            health_check_timeout: Duration::from_millis(self.health_check_timeout_ms),
            stream_channel_capacity: self.stream_capacity,
            max_batch_size: self.max_batch_size,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    match format {
        LogFormat::Fmt => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let network = args.network_config();
    let gateway = args.gateway_config();

    let http = HttpBackend::new(
        &gateway.backend_url,
        gateway.backend_timeout,
        gateway.stream_channel_capacity,
    )
    .context("invalid backend configuration")?;
    let resilient = Arc::new(ResilientBackend::new(
        http,
        gateway.retry.clone(),
        gateway.breaker.clone(),
    ));
    let backend: Arc<dyn InferenceBackend> = Arc::clone(&resilient) as Arc<dyn InferenceBackend>;

    let codecs = Arc::new(CodecRegistry::with_defaults());
    let router = ServiceRouter::standard(&HandlerDeps::new(
        Arc::clone(&backend),
        Arc::clone(&codecs),
    ));
    info!(services = ?router.services(), backend = %gateway.backend_url, "services registered");

    let monitor = Arc::new(
        HealthMonitor::new(gateway.health_interval).with_check_timeout(gateway.health_check_timeout),
    );
    monitor.register(Arc::new(BackendChecker::new(Arc::clone(&backend))));
    monitor.register(Arc::new(CircuitChecker::new(resilient)));

    let mut module = NetworkModule::new(
        network,
        GatewayServices {
            gateway: Arc::new(gateway),
            router: Arc::new(router),
            backend,
            codecs,
            monitor,
        },
    );
    let port = module.start().await?;
    info!(port, "infergate listening");

    module.serve(shutdown_signal()).await
}

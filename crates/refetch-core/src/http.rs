//! Shared HTTP client, tokio runtime and transport settings.
//!
//! Pipelines are async, but shard workers are plain rayon threads; each worker
//! drives its pipeline to completion with `SHARED_RUNTIME.handle().block_on`.

use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

/// Transport settings applied to every remote client
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    /// Per-request timeout (no response within this window = transient error)
    pub read_timeout: Duration,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Retry attempts for 429 / 5xx responses inside the client
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install process-wide HTTP settings. Only the first call has effect.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::debug!("HTTP config already set, ignoring override");
    }
}

/// Current HTTP settings (defaults if never set)
pub fn http_config() -> &'static HttpConfig {
    HTTP_CONFIG.get_or_init(HttpConfig::default)
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    let cfg = http_config();
    reqwest::Client::builder()
        .connect_timeout(cfg.connect_timeout)
        .timeout(cfg.read_timeout)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for remote fetches.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

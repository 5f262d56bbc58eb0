use std::env;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOCK_WAIT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Upper bound on waiting for a timeline or request lock before the
    /// operation gives up with a retryable busy error.
    pub lock_wait_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let lock_wait_ms = match env::var("SCHEDULING_LOCK_WAIT_MS") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("SCHEDULING_LOCK_WAIT_MS is not a number, using default");
                DEFAULT_LOCK_WAIT_MS
            }),
            Err(_) => DEFAULT_LOCK_WAIT_MS,
        };

        Self { lock_wait_ms }
    }

    pub fn lock_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_wait_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
        }
    }
}

/// Install the global tracing subscriber. Intended for binaries and test
/// harnesses; safe to call more than once.
pub fn init_telemetry() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

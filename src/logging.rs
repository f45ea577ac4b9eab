use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Subscriber settings.
///
/// `env_filter` uses the `RUST_LOG` directive syntax, for example
/// `"info,chizu::scheduler=debug"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub ansi: bool,
    /// Log when `render_pass` and `node` spans close, with their timings.
    pub span_timings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            ansi: true,
            span_timings: false,
        }
    }
}

static INIT: Once = Once::new();

/// Installs a global fmt subscriber. Only the first call has an effect, and it
/// leaves an already installed subscriber alone.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = match &config.env_filter {
            Some(directives) => EnvFilter::new(directives),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };

        let spans = if config.span_timings {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(config.ansi)
            .with_span_events(spans);

        if tracing_subscriber::registry().with(filter).with(layer).try_init().is_ok() {
            tracing::debug!("logging initialized");
        }
    });
}

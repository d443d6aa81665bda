//! Subscriber setup for the controller's structured logs.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// How the controller's log output is shaped.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    /// Used when `RUST_LOG` is unset.
    pub log_level: Level,
    /// Log span open/close, which shows how long each reconcile cycle took.
    pub include_span_events: bool,
    pub json_output: bool,
    pub include_location: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "lc-controller".to_string(),
            log_level: Level::INFO,
            include_span_events: false,
            json_output: false,
            include_location: false,
        }
    }
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json_output = json;
        self
    }

    pub fn with_span_events(mut self, include: bool) -> Self {
        self.include_span_events = include;
        self
    }

    pub fn with_location(mut self, include: bool) -> Self {
        self.include_location = include;
        self
    }

    /// `RUST_LOG` wins over the configured level when set.
    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.to_string()))
    }

    fn build_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = if self.include_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = fmt::layer()
            .with_span_events(span_events)
            .with_file(self.include_location)
            .with_line_number(self.include_location);

        if self.json_output {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    }
}

/// Install the global subscriber. Only the first call takes effect.
///
/// ```no_run
/// use observability::{init_tracing, TracingConfig};
/// use tracing::Level;
///
/// init_tracing(TracingConfig::new("lc-controller").with_level(Level::DEBUG));
/// ```
pub fn init_tracing(config: TracingConfig) {
    let installed = tracing_subscriber::registry()
        .with(config.build_layer())
        .with(config.build_filter())
        .try_init();

    if installed.is_ok() {
        tracing::info!(
            service = %config.service_name,
            level = %config.log_level,
            json = config.json_output,
            "logging initialized"
        );
    }
}

/// Span covering one reconciliation cycle of a logical cluster.
#[macro_export]
macro_rules! cycle_span {
    ($cluster:expr, $correlation_id:expr) => {
        tracing::info_span!(
            "reconcile",
            logical_cluster = %$cluster,
            correlation_id = %$correlation_id
        )
    };
}

/// Span covering a single node mutation.
#[macro_export]
macro_rules! node_span {
    ($op:expr, $node_id:expr) => {
        tracing::debug_span!(
            "node_mutation",
            operation = $op,
            node = %$node_id
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "lc-controller");
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.json_output);
        assert!(!config.include_span_events);
    }

    #[test]
    fn test_builder() {
        let config = TracingConfig::new("labeler-test")
            .with_level(Level::DEBUG)
            .with_json(true)
            .with_span_events(true)
            .with_location(true);

        assert_eq!(config.service_name, "labeler-test");
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(config.json_output);
        assert!(config.include_span_events);
        assert!(config.include_location);
    }

    #[test]
    fn test_second_init_is_ignored() {
        init_tracing(TracingConfig::default());
        init_tracing(TracingConfig::default().with_json(true).with_span_events(true));
    }

    #[test]
    fn test_spans_build_without_subscriber() {
        let cycle = cycle_span!("gpu", "abc");
        let node = node_span!("set_marker", "n1");
        drop((cycle, node));
    }
}

//! Tracing Setup
//!
//! Feed logs go to stdout through a fmt layer filtered by `RUST_LOG`. When
//! `OTEL_ENABLED` is not "false", spans are also batched to an OTLP/gRPC
//! collector so reconnect storms can be followed across services.
//!
//! Setup is fallible: a bad filter or exporter endpoint is reported as a
//! [`TelemetryError`] and the binary falls back to [`TelemetryConfig::stdout_only`].

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

const SERVICE_NAME: &str = "quote-feed";
const OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn,quote_feed=info";

/// Tracing setup failure.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `RUST_LOG` could not be parsed.
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        /// Directive string as given.
        filter: String,
        /// Parser error.
        source: tracing_subscriber::filter::ParseError,
    },

    /// The OTLP span exporter could not be built.
    #[error("OTLP exporter for {endpoint} unavailable: {message}")]
    Exporter {
        /// Collector endpoint.
        endpoint: String,
        /// Builder error.
        message: String,
    },

    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Flushes and shuts down the span exporter on drop. Hold it for the life of
/// the process.
#[must_use = "dropping the guard shuts down span export"]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("quote-feed: span exporter shutdown failed: {e}");
        }
    }
}

/// Tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub otlp_enabled: bool,
    /// Collector endpoint.
    pub otlp_endpoint: String,
    /// `service.name` resource attribute.
    pub service_name: String,
    /// `RUST_LOG`-style directives; `None` uses [`DEFAULT_LOG_FILTER`].
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_enabled: true,
            otlp_endpoint: OTLP_ENDPOINT.to_string(),
            service_name: SERVICE_NAME.to_string(),
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Read `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`,
    /// `OTEL_SERVICE_NAME` and `RUST_LOG`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            otlp_enabled: lookup("OTEL_ENABLED")
                .is_none_or(|v| !v.trim().eq_ignore_ascii_case("false")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.otlp_endpoint),
            service_name: lookup("OTEL_SERVICE_NAME")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.service_name),
            log_filter: lookup("RUST_LOG").filter(|v| !v.trim().is_empty()),
        }
    }

    /// Fmt output with the default filter and no exporter. Cannot fail
    /// except when a subscriber is already installed.
    #[must_use]
    pub fn stdout_only() -> Self {
        Self {
            otlp_enabled: false,
            log_filter: None,
            ..Self::default()
        }
    }

    fn filter(&self) -> Result<EnvFilter, TelemetryError> {
        let directives = self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
        EnvFilter::try_new(directives).map_err(|source| TelemetryError::Filter {
            filter: directives.to_string(),
            source,
        })
    }

    fn tracer_provider(&self) -> Result<SdkTracerProvider, TelemetryError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.otlp_endpoint)
            .build()
            .map_err(|e| TelemetryError::Exporter {
                endpoint: self.otlp_endpoint.clone(),
                message: e.to_string(),
            })?;

        Ok(SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                Resource::builder()
                    .with_service_name(self.service_name.clone())
                    .build(),
            )
            .build())
    }
}

/// Install the global subscriber from the environment.
///
/// # Errors
///
/// See [`init_with_config`].
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    init_with_config(&TelemetryConfig::from_env())
}

/// Install the global subscriber.
///
/// Nothing is installed when an error is returned, except for
/// [`TelemetryError::Subscriber`] where another subscriber already was.
///
/// # Errors
///
/// Returns an error if the filter does not parse, the exporter cannot be
/// built, or a global subscriber already exists.
pub fn init_with_config(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = config.filter()?;
    let fmt = tracing_subscriber::fmt::layer().with_target(true);

    if !config.otlp_enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt)
            .try_init()?;
        return Ok(TelemetryGuard { provider: None });
    }

    let provider = config.tracer_provider()?;
    let otel = tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .with(otel)
        .try_init()?;

    Ok(TelemetryGuard {
        provider: Some(provider),
    })
}

//! Subscriber and tracer provider setup

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{SimpleSpanProcessor, TracerProvider};
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACER_PROVIDER: OnceLock<Arc<TracerProvider>> = OnceLock::new();

type ProcessorBuilder = Box<dyn FnOnce() -> SimpleSpanProcessor + Send>;
static SPAN_PROCESSOR_BUILDERS: Mutex<Option<Vec<ProcessorBuilder>>> = Mutex::new(Some(Vec::new()));

/// How [`init_with`] sets up the global subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset or invalid.
    pub default_directive: String,
    /// One JSON object per event instead of human-readable lines.
    pub json: bool,
    /// Export spans through an OpenTelemetry tracer provider.
    pub opentelemetry: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_directive: "openapi_llm=info".to_string(),
            json: false,
            opentelemetry: true,
        }
    }
}

impl TelemetryConfig {
    /// Logging only, no tracer provider.
    pub fn logging() -> Self {
        Self {
            opentelemetry: false,
            ..Self::default()
        }
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

/// Register a span processor builder used when telemetry is initialized.
///
/// Exporters (OTLP, Jaeger, a test collector) are attached this way. Must be
/// called before [`init_telemetry`]; later registrations are ignored.
///
/// ```ignore
/// use openapi_llm_telemetry::{register_span_processor, init_telemetry};
/// use opentelemetry_sdk::trace::SimpleSpanProcessor;
///
/// register_span_processor(Box::new(|| {
///     SimpleSpanProcessor::new(Box::new(/* your exporter */))
/// }));
/// init_telemetry();
/// ```
pub fn register_span_processor(builder: ProcessorBuilder) {
    let mut builders = SPAN_PROCESSOR_BUILDERS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    match builders.as_mut() {
        Some(pending) => pending.push(builder),
        None => tracing::warn!("Span processor registered after telemetry initialization, ignored"),
    }
}

/// Install the global subscriber described by `config`.
///
/// Returns `false` when a subscriber was already installed; the existing one
/// stays in place. Span processors registered so far are consumed by the
/// first call that enables OpenTelemetry.
pub fn init_with(config: &TelemetryConfig) -> bool {
    let tracer = config.opentelemetry.then(|| {
        let builders = SPAN_PROCESSOR_BUILDERS
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .unwrap_or_default();
        let provider = builders
            .into_iter()
            .fold(TracerProvider::builder(), |provider, builder| {
                provider.with_span_processor(builder())
            })
            .build();
        let tracer = provider.tracer(crate::attributes::SYSTEM_NAME);
        let _ = TRACER_PROVIDER.set(Arc::new(provider));
        tracer
    });

    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));
    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
    });

    let result = tracing_subscriber::registry()
        .with(config.filter())
        .with(otel_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init();

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Tracing subscriber already installed: {}", e);
            false
        }
    }
}

/// Logs plus OpenTelemetry spans, filtered by `RUST_LOG`.
///
/// ```rust,no_run
/// openapi_llm_telemetry::init_telemetry();
/// ```
pub fn init_telemetry() {
    init_with(&TelemetryConfig::default());
}

/// Human-readable logs without a tracer provider.
pub fn init_logging() {
    init_with(&TelemetryConfig::logging());
}

/// The global tracer provider, once OpenTelemetry was initialized.
pub fn tracer_provider() -> Option<Arc<TracerProvider>> {
    TRACER_PROVIDER.get().cloned()
}

/// Flush spans buffered by the registered processors.
pub fn flush_telemetry() {
    let Some(provider) = TRACER_PROVIDER.get() else {
        return;
    };
    for result in provider.force_flush() {
        if let Err(e) = result {
            tracing::warn!("Failed to flush spans: {}", e);
        }
    }
}

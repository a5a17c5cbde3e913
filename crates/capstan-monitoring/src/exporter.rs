//! Telemetry subscriber bootstrap
//!
//! Installs the global `tracing` subscriber: an env-filtered fmt layer
//! always, plus an OTLP span-export layer when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is configured. Returns a guard whose
//! drop flushes and shuts the provider down.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_otlp::WithExportConfig;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Telemetry bootstrap failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExporterError {
    #[error("failed to build OTLP exporter: {0}")]
    Build(String),

    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

/// Keeps the tracer provider alive; dropping it flushes pending spans.
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            for result in provider.force_flush() {
                if let Err(error) = result {
                    tracing::warn!(%error, "span flush failed during shutdown");
                }
            }
            let _ = provider.shutdown();
        }
    }
}

/// Install the global subscriber.
///
/// `otlp_endpoint` comes from the runtime config
/// (`OTEL_EXPORTER_OTLP_ENDPOINT`); when `None`, only the fmt layer is
/// installed and span export is a no-op.
pub fn init_telemetry(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<TelemetryGuard, ExporterError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()
                .map_err(|e| ExporterError::Build(e.to_string()))?;
            let provider = TracerProvider::builder()
                .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                .with_resource(Resource::new(vec![KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    service_name.to_string(),
                )]))
                .build();
            let tracer = provider.tracer("capstan");
            opentelemetry::global::set_tracer_provider(provider.clone());

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|_| ExporterError::AlreadyInstalled)?;

            Ok(TelemetryGuard {
                provider: Some(provider),
            })
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|_| ExporterError::AlreadyInstalled)?;
            Ok(TelemetryGuard { provider: None })
        }
    }
}

//! HyperDX trace export.
//!
//! Optional OpenTelemetry export enabled by a `[hyperdx]` section in the
//! config plus an `api_key` in the secrets. Without it the service logs to
//! the console only.
//!
//! The [`BatchSpanProcessor`] exports from background threads that have no
//! tokio reactor, so the OTLP exporter uses a `reqwest::blocking` client.
//! That client is built on a separate thread to keep its construction off
//! the async runtime.

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::ExporterBuildError;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Layer, SubscriberExt};

use crate::config::default_filter;

const DEFAULT_SERVICE_NAME: &str = "native-yield-automation";
const HYPERDX_TRACES_ENDPOINT: &str = "https://in-otel.hyperdx.io/v1/traces";

/// Instrumentation library name attached to every span.
const TRACER_NAME: &str = "native-yield-tracer";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TelemetryConfig {
    service_name: Option<String>,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TelemetrySecrets {
    api_key: String,
}

#[derive(Clone)]
pub struct TelemetryCtx {
    pub(crate) api_key: String,
    pub(crate) service_name: String,
    pub(crate) log_level: tracing::Level,
}

impl std::fmt::Debug for TelemetryCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCtx")
            .field("api_key", &"[REDACTED]")
            .field("service_name", &self.service_name)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl TelemetryCtx {
    pub(crate) fn new(
        config: TelemetryConfig,
        secrets: TelemetrySecrets,
        log_level: tracing::Level,
    ) -> Self {
        Self {
            api_key: secrets.api_key,
            service_name: config
                .service_name
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            log_level,
        }
    }

    /// Installs a global subscriber with a console layer and an OTLP
    /// export layer. Spans are flushed when the returned guard drops.
    pub fn setup_telemetry(&self) -> Result<TelemetryGuard, TelemetryError> {
        let headers = HashMap::from([("authorization".to_string(), self.api_key.clone())]);

        let http_client = std::thread::spawn(|| {
            reqwest::blocking::Client::builder()
                .gzip(true)
                .build()
                .map_err(|e| format!("Failed to build HTTP client: {e}"))
        })
        .join()
        .map_err(|_| TelemetryError::ThreadSpawn)?
        .map_err(TelemetryError::HttpClient)?;

        let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_http_client(http_client)
            .with_endpoint(HYPERDX_TRACES_ENDPOINT)
            .with_headers(headers)
            .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
            .build()?;

        let batch_exporter = BatchSpanProcessor::builder(otlp_exporter)
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_max_export_batch_size(512)
                    .with_max_queue_size(2048)
                    .with_scheduled_delay(Duration::from_secs(3))
                    .build(),
            )
            .build();

        let tracer_provider = SdkTracerProvider::builder()
            .with_span_processor(batch_exporter)
            .with_resource(
                Resource::builder()
                    .with_service_name(self.service_name.clone())
                    .with_attributes(vec![KeyValue::new("deployment.environment", "production")])
                    .build(),
            )
            .build();

        let tracer = tracer_provider.tracer(TRACER_NAME);
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let filter = default_filter(self.log_level);

        let fmt_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| filter.clone().into());

        let telemetry_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| filter.into());

        let fmt_layer = tracing_subscriber::fmt::layer().with_filter(fmt_filter);
        let telemetry_layer = telemetry_layer.with_filter(telemetry_filter);

        let subscriber = Registry::default().with(fmt_layer).with(telemetry_layer);

        tracing::subscriber::set_global_default(subscriber)?;

        Ok(TelemetryGuard { tracer_provider })
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter")]
    OtlpExporter(#[from] ExporterBuildError),

    #[error("Failed to build HTTP client")]
    HttpClient(String),

    #[error("Failed to spawn HTTP client thread")]
    ThreadSpawn,

    #[error("Failed to set global subscriber")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // Blocks until pending exports complete or time out.
        if let Err(e) = self.tracer_provider.force_flush() {
            eprintln!("Failed to flush telemetry spans: {e:?}");
        }

        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shutdown telemetry provider: {e:?}");
        }
    }
}

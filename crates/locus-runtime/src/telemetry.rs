//! Process-wide `tracing` setup.
//!
//! Call [`init_tracing`] once, early in `main`, and keep the returned guard
//! alive until exit.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Filter directives (default `info`). Store SQL is logged at `trace` under `locus_memory::sql`. |
//! | `LOCUS_LOG_FORMAT=json` | One JSON object per event instead of compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Also export spans over OTLP/HTTP to this collector. |
//!
//! ```rust,no_run
//! let _guard = locus_runtime::telemetry::init_tracing("locus");
//! tracing::info!("ready");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Install the global subscriber. A second call leaves the first
/// subscriber in place and only reports the conflict on stderr.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOCUS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().compact().boxed()
    };

    let provider = build_provider(service_name);
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("locus")));

    if let Err(e) = tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .with(otel)
        .try_init()
    {
        eprintln!("[locus] tracing already initialised: {e}");
    }

    TracerProviderGuard(provider)
}

/// Flushes and shuts down the span exporter when dropped.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        let Some(provider) = self.0.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("[locus] span exporter shutdown failed: {e}");
        }
    }
}

/// `None` unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set and the exporter
/// builds.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("[locus] OTLP exporter unavailable: {e}");
            return None;
        }
    };
    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();
    // The simple exporter needs no async runtime; the CLI is synchronous.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_stdout::SpanExporter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "boardwalk-coordinator";

/// Process-wide tracing subscriber plus the Prometheus recorder.
pub struct Telemetry {
    metrics_handle: PrometheusHandle,
    span_exporter: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// `otel_stdout` comes from `--otel-stdout` / `BOARDWALK_OTEL_STDOUT`.
    pub fn init(otel_stdout: bool) -> Result<Self> {
        let metrics_handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus metrics recorder")?;

        let span_exporter = otel_stdout.then(stdout_span_exporter);
        let otel_layer = span_exporter.as_ref().map(|provider| {
            global::set_tracer_provider(provider.clone());
            tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME))
        });

        tracing_subscriber::registry()
            .with(coordinator_filter())
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(otel_layer)
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        if span_exporter.is_some() {
            info!(service = SERVICE_NAME, "exporting spans to stdout");
        }

        Ok(Self {
            metrics_handle,
            span_exporter,
        })
    }

    /// Logging only, for the `tail` subcommand. Session traffic goes to
    /// stdout, so logs go to stderr.
    pub fn init_cli() -> Result<()> {
        tracing_subscriber::registry()
            .with(coordinator_filter())
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("failed to initialise tracing subscriber")
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }

    /// Flushes buffered spans once the server has stopped.
    pub fn shutdown(self) {
        let Some(provider) = self.span_exporter else {
            return;
        };
        match provider.shutdown() {
            Ok(()) => info!("span exporter stopped"),
            Err(err) => warn!(error = %err, "span exporter did not shut down cleanly"),
        }
    }
}

/// `RUST_LOG` when set, otherwise info for everything and debug for the
/// session actors.
fn coordinator_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,boardwalk_coordinator::coordinator=debug"))
}

fn stdout_span_exporter() -> SdkTracerProvider {
    SdkTracerProvider::builder()
        .with_simple_exporter(SpanExporter::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(
            Resource::builder()
                .with_attributes(vec![KeyValue::new("service.name", SERVICE_NAME)])
                .build(),
        )
        .build()
}

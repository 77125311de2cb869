use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::forwarder::Notification;

const SERVICE_NAME: &str = "receipt-bot";

/// Target of the one-line JSON record written per handled event.
pub const EVENT_TARGET: &str = "receipt_event";

/// Where logs go. Without an OTLP endpoint everything is written to daily
/// rolling files under `log_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub otel_endpoint: Option<String>,
}

impl LogConfig {
    pub fn new(log_level: impl Into<String>, log_dir: PathBuf, otel_endpoint: Option<String>) -> Self {
        Self {
            log_level: log_level.into(),
            log_dir,
            otel_endpoint,
        }
    }
}

/// Installs the global tracing subscriber and returns the metric handles.
pub fn init_tracing(config: &LogConfig) -> Result<Telemetry> {
    match config.otel_endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(endpoint) => Telemetry::init_otlp(&config.log_level, endpoint),
        None => Telemetry::init_files(
            &config.log_level,
            &config.log_dir.join("receipt_bot.log"),
            &config.log_dir.join("receipt_bot_events.log"),
        ),
    }
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();

fn resource() -> Resource {
    RESOURCE
        .get_or_init(|| Resource::builder().with_service_name(SERVICE_NAME).build())
        .clone()
}

fn quiet_filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(format!("{log_level},hyper=off,h2=off,reqwest=off"))
        .with_context(|| format!("invalid log level `{log_level}`"))
}

fn init_logs(endpoint: &str) -> Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .context("building OTLP log exporter")?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build())
}

fn init_metrics(endpoint: &str) -> Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .context("building OTLP metric exporter")?;
    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource())
        .build())
}

/// Counters and histograms for the bot, plus the OTLP providers when exporting.
pub struct Telemetry {
    logger_provider: Option<SdkLoggerProvider>,
    meter_provider: Option<SdkMeterProvider>,

    pub events_handled: Counter<u64>,
    pub events_failed: Counter<u64>,
    pub submissions_forwarded: Counter<u64>,
    pub submissions_failed: Counter<u64>,
    pub event_latency_ms: Histogram<f64>,
}

impl Telemetry {
    /// Metric handles bound to `meter`, with no subscriber installed.
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            logger_provider: None,
            meter_provider: None,
            events_handled: meter
                .u64_counter("events_handled")
                .with_description("Inbound chat events handled")
                .build(),
            events_failed: meter
                .u64_counter("events_failed")
                .with_description("Inbound chat events answered with an error")
                .build(),
            submissions_forwarded: meter.u64_counter("submissions_forwarded").build(),
            submissions_failed: meter.u64_counter("submissions_failed").build(),
            event_latency_ms: meter
                .f64_histogram("event_latency_ms")
                .with_description("Time to handle one inbound event")
                .with_unit("ms")
                .build(),
        }
    }

    /// Exports logs and metrics over OTLP/HTTP and mirrors logs to stdout.
    pub fn init_otlp(log_level: &str, endpoint: &str) -> Result<Self> {
        let logger_provider = init_logs(endpoint)?;
        let meter_provider = init_metrics(endpoint)?;

        let otel_layer = OpenTelemetryTracingBridge::new(&logger_provider).with_filter(quiet_filter(log_level)?);
        let stdout_layer = fmt::layer()
            .with_thread_names(true)
            .with_filter(quiet_filter(log_level)?);

        Registry::default()
            .with(otel_layer)
            .with(stdout_layer)
            .try_init()
            .context("installing tracing subscriber")?;

        global::set_meter_provider(meter_provider.clone());
        let meter = meter_provider.meter(SERVICE_NAME);

        let mut telemetry = Self::from_meter(&meter);
        telemetry.logger_provider = Some(logger_provider);
        telemetry.meter_provider = Some(meter_provider);
        info!(endpoint, "exporting logs and metrics over OTLP");
        Ok(telemetry)
    }

    /// Writes a daily rolling text log and a JSON log holding one line per
    /// handled event. Metrics are recorded against the global no-op meter.
    pub fn init_files(log_level: &str, log_file: &Path, event_file: &Path) -> Result<Self> {
        let txt_layer = fmt::layer()
            .with_writer(rolling(log_file)?)
            .with_ansi(false);

        let json_layer = fmt::layer()
            .json()
            .with_writer(rolling(event_file)?)
            .with_target(true)
            .with_filter(EnvFilter::new(format!("{EVENT_TARGET}=info")));

        Registry::default()
            .with(quiet_filter(log_level)?)
            .with(fmt::layer())
            .with(txt_layer)
            .with(json_layer)
            .try_init()
            .context("installing tracing subscriber")?;

        Ok(Self::from_meter(&global::meter(SERVICE_NAME)))
    }

    /// Runs one event handler, recording latency and outcome.
    /// `succeeded` decides whether the output counts as a failure.
    pub async fn instrument_event<Fut, T>(&self, kind: &'static str, handler: Fut, succeeded: impl FnOnce(&T) -> bool) -> T
    where
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        let out = handler.await;
        let elapsed = start.elapsed().as_secs_f64() * 1_000.0;
        let ok = succeeded(&out);

        let attrs = [KeyValue::new("event", kind)];
        self.events_handled.add(1, &attrs);
        self.event_latency_ms.record(elapsed, &attrs);
        if !ok {
            self.events_failed.add(1, &attrs);
        }

        tracing::event!(
            target: EVENT_TARGET,
            tracing::Level::INFO,
            event = kind,
            latency_ms = elapsed,
            status = if ok { "ok" } else { "error" },
        );
        out
    }

    pub fn record_submission(&self, outcome: &Notification) {
        match outcome {
            Notification::Submitted => self.submissions_forwarded.add(1, &[]),
            Notification::SubmissionFailed | Notification::SubmissionError => self.submissions_failed.add(1, &[]),
        }
    }

    /// Flushes the OTLP exporters, if any.
    pub fn shutdown(&self) {
        if let Some(provider) = &self.logger_provider {
            if let Err(e) = provider.shutdown() {
                error!("log exporter shutdown failed: {e}");
            }
        }
        if let Some(provider) = &self.meter_provider {
            if let Err(e) = provider.shutdown() {
                error!("metric exporter shutdown failed: {e}");
            }
        }
    }
}

fn rolling(file: &Path) -> Result<RollingFileAppender> {
    let dir = file
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = file
        .file_name()
        .with_context(|| format!("log path `{}` has no file name", file.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating log directory `{}`", dir.display()))?;
    Ok(RollingFileAppender::new(Rotation::DAILY, dir, name))
}

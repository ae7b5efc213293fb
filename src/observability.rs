//! 日志与追踪初始化
//!
//! `RUST_LOG` 优先于配置中的 `filter_level`；`output = "file"` 时经 tracing-appender 异步写文件。

use callrelay::error::Result;
use callrelay_common::config::{CallRelayConfig, LogConfig, ObservabilityConfig};
use std::fs;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[cfg(feature = "opentelemetry")]
use callrelay::error::Error;
#[cfg(feature = "opentelemetry")]
use opentelemetry::KeyValue;
#[cfg(feature = "opentelemetry")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "opentelemetry")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "opentelemetry")]
use opentelemetry_sdk::{
    Resource,
    trace::{Sampler, SdkTracerProvider},
};

const LOG_FILE_NAME: &str = "callrelay.log";

/// 持有日志写线程与 tracer provider，进程退出前不能释放
#[derive(Default)]
pub struct ObservabilityGuard {
    #[cfg(feature = "opentelemetry")]
    tracer_provider: Option<SdkTracerProvider>,
    _log_guard: Option<WorkerGuard>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        #[cfg(feature = "opentelemetry")]
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown tracer provider: {e:?}");
        }
    }
}

pub fn init_observability(config: &CallRelayConfig) -> Result<ObservabilityGuard> {
    let mut guard = ObservabilityGuard::default();
    let observability = config.observability_config();

    if observability.log.output == "file" {
        fs::create_dir_all(&observability.log.path)?;
        let (writer, worker_guard) = build_file_writer(&observability.log)?;
        guard._log_guard = Some(worker_guard);
        install_subscriber(writer, false, &mut guard, config)?;
    } else {
        install_subscriber(std::io::stdout, true, &mut guard, config)?;
    }

    Ok(guard)
}

fn create_env_filter(config: &ObservabilityConfig) -> EnvFilter {
    let directive = std::env::var("RUST_LOG")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| config.filter_level.clone());

    EnvFilter::try_new(&directive).unwrap_or_else(|_| {
        println!("Invalid filter directive '{directive}', falling back to info");
        EnvFilter::new("info")
    })
}

fn install_subscriber<W>(
    writer: W,
    use_ansi: bool,
    #[cfg_attr(not(feature = "opentelemetry"), allow(unused_variables))]
    guard: &mut ObservabilityGuard,
    config: &CallRelayConfig,
) -> Result<()>
where
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(use_ansi)
        .with_writer(writer);
    let filter = create_env_filter(config.observability_config());

    #[cfg(feature = "opentelemetry")]
    if let Some(provider) = build_tracing_provider(config)? {
        use opentelemetry::trace::TracerProvider as _;
        let tracer = provider.tracer(config.tracing_config().service_name.clone());
        guard.tracer_provider = Some(provider);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .ok();
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .ok();

    Ok(())
}

fn build_file_writer(log_config: &LogConfig) -> Result<(NonBlocking, WorkerGuard)> {
    println!(
        "Logging to {} (daily rotation: {})",
        log_config.path, log_config.rotate
    );

    if log_config.rotate {
        let appender = tracing_appender::rolling::daily(&log_config.path, LOG_FILE_NAME);
        Ok(tracing_appender::non_blocking(appender))
    } else {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(std::path::Path::new(&log_config.path).join(LOG_FILE_NAME))?;
        Ok(tracing_appender::non_blocking(file))
    }
}

#[cfg(feature = "opentelemetry")]
fn build_tracing_provider(config: &CallRelayConfig) -> Result<Option<SdkTracerProvider>> {
    let tracing_cfg = config.tracing_config();
    if !tracing_cfg.enable {
        return Ok(None);
    }
    let errors = tracing_cfg.validate();
    if !errors.is_empty() {
        return Err(Error::custom(errors.join("; ")));
    }

    println!(
        "Initializing OTLP tracing: service_name={}, endpoint={}, sample_ratio={}",
        tracing_cfg.service_name, tracing_cfg.endpoint, tracing_cfg.sample_ratio
    );

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(tracing_cfg.endpoint.as_str())
        .build()
        .map_err(|e| Error::custom(format!("Failed to build OTLP exporter: {e}")))?;

    let resource = Resource::builder()
        .with_service_name(tracing_cfg.service_name.clone())
        .with_attributes([
            KeyValue::new("service.instance.id", config.name.clone()),
            KeyValue::new("service.environment", config.env.clone()),
        ])
        .build();

    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
        tracing_cfg.sample_ratio,
    )));
    let provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(sampler)
        .with_batch_exporter(exporter)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(Some(provider))
}

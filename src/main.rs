use std::{process, sync::OnceLock};

use cmonitor::{
    config::Config,
    core::{
        executor::{Executor, Schedule, StopReason, COLLECTOR_KPIS},
        header::{default_producers, RunInfo},
        output::{
            exposer, influxdb::InfluxDbSink, json::JsonSink, prometheus::PrometheusSink,
            OutputFrontend,
        },
    },
    logger::LoggerManager,
    print_error,
};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, info};

const EXIT_CONFIG: i32 = 1;
const EXIT_JSON_OPEN: i32 = 13;
const EXIT_PROMETHEUS_BIND: i32 = 97;
const EXIT_INFLUXDB_RESOLVE: i32 = 98;

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(EXIT_CONFIG);
        })
    })
}

/// Handle on the Prometheus scrape endpoint task.
struct Exposer {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Exposer {
    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            error!("Prometheus endpoint task failed: {}", e);
        }
    }
}

/// Builds the frontend with every configured sink; exits on setup failures.
async fn build_frontend(cfg: &Config) -> (OutputFrontend, Option<Exposer>) {
    let mut frontend = OutputFrontend::new();

    match JsonSink::from_config(&cfg.output.json) {
        Ok(Some(sink)) => frontend.add_sink(Box::new(sink)),
        Ok(None) => {}
        Err(e) => {
            error!("{}", e);
            process::exit(EXIT_JSON_OPEN);
        }
    }

    if let Some(influx) = &cfg.output.influxdb {
        match InfluxDbSink::from_config(influx) {
            Ok(sink) => frontend.add_sink(Box::new(sink)),
            Err(e) => {
                error!("{}", e);
                process::exit(EXIT_INFLUXDB_RESOLVE);
            }
        }
    }

    let mut exposer = None;
    if let Some(prom) = &cfg.output.prometheus {
        let sink = PrometheusSink::new(COLLECTOR_KPIS, &prom.metadata).unwrap_or_else(|e| {
            error!("Failed to register Prometheus KPIs: {}", e);
            process::exit(EXIT_PROMETHEUS_BIND);
        });
        let listener = exposer::bind(&prom.listen).await.unwrap_or_else(|e| {
            error!("{}", e);
            process::exit(EXIT_PROMETHEUS_BIND);
        });

        let (stop, stopped) = oneshot::channel::<()>();
        let registry = sink.registry();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = stopped.await;
            };
            if let Err(e) = exposer::serve(listener, registry, shutdown).await {
                error!("Prometheus endpoint stopped: {}", e);
            }
        });

        frontend.add_sink(Box::new(sink));
        exposer = Some(Exposer { stop, task });
    }

    (frontend, exposer)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() {
    let cfg = config();
    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(EXIT_CONFIG);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(EXIT_CONFIG);
    });
    info!("Starting cmonitor version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.output);

    let (frontend, exposer) = build_frontend(cfg).await;
    info!("Enabled outputs: {:?}", frontend.sink_names());

    let run = RunInfo {
        command: std::env::args().collect::<Vec<_>>().join(" "),
        sample_interval_seconds: cfg.sampling.interval_seconds,
        num_samples: cfg.sampling.num_samples,
    };
    let executor = Executor::new(
        frontend,
        default_producers(run),
        Schedule::from(&cfg.sampling),
    );

    match executor.run(shutdown_signal()).await {
        Ok(summary) => {
            if summary.reason == StopReason::Shutdown {
                info!("Received Ctrl+C, outputs closed");
            }
            debug!("{:?}", summary);
        }
        Err(e) => error!("Failed to close outputs: {}", e),
    }

    if let Some(exposer) = exposer {
        exposer.stop().await;
    }
    info!("Shutdown complete");
}

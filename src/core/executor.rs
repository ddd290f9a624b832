//! Sampling loop.
//!
//! The `Executor` owns the output frontend. It records and pushes the header
//! once, then takes one sample per interval until the configured number of
//! samples has been taken or the shutdown future completes, and finally
//! closes every sink.

use std::future::Future;

use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{
    header::{generate_header, HeaderProducer},
    output::{prometheus::KpiDescriptor, OutputError, OutputFrontend, TickKind},
};
use crate::config::sampling::SamplingConfig;

/// KPIs fed by the sections the executor itself records.
pub const COLLECTOR_KPIS: &[KpiDescriptor] = &[
    KpiDescriptor::gauge("timestamp_sample_index", "Index of the last sample taken"),
    KpiDescriptor::counter("cmonitor_stats_section", "Sections recorded"),
    KpiDescriptor::counter("cmonitor_stats_subsections", "Subsections recorded"),
    KpiDescriptor::counter("cmonitor_stats_subsubsections", "Sub-subsections recorded"),
    KpiDescriptor::counter("cmonitor_stats_string", "String measurements recorded"),
    KpiDescriptor::counter("cmonitor_stats_long", "Integer measurements recorded"),
    KpiDescriptor::counter("cmonitor_stats_double", "Floating point measurements recorded"),
    KpiDescriptor::counter("cmonitor_stats_hex", "Hexadecimal measurements recorded"),
];

/// Schedule of the sampling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub period: Duration,
    /// 0 means until shutdown.
    pub num_samples: u64,
    pub emit_stats: bool,
}

impl From<&SamplingConfig> for Schedule {
    fn from(config: &SamplingConfig) -> Self {
        Self {
            period: Duration::from_secs(config.interval_seconds),
            num_samples: config.num_samples,
            emit_stats: config.emit_stats,
        }
    }
}

/// Why the sampling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Shutdown,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub samples: u64,
    pub failed_pushes: u64,
    pub reason: StopReason,
}

pub struct Executor {
    frontend: OutputFrontend,
    producers: Vec<Box<dyn HeaderProducer>>,
    schedule: Schedule,
}

impl Executor {
    pub fn new(
        frontend: OutputFrontend,
        producers: Vec<Box<dyn HeaderProducer>>,
        schedule: Schedule,
    ) -> Self {
        Self {
            frontend,
            producers,
            schedule,
        }
    }

    /// Runs the header tick and the sampling loop, then closes the outputs.
    ///
    /// Push failures are logged by the frontend and counted; they never end
    /// the loop. The returned error, if any, comes from closing the sinks.
    pub async fn run<F>(mut self, shutdown: F) -> Result<RunSummary, OutputError>
    where
        F: Future<Output = ()>,
    {
        let sections = generate_header(&mut self.frontend, &self.producers).await;
        let mut failed_pushes = 0;
        if self.frontend.push(TickKind::Header).is_err() {
            failed_pushes += 1;
        }
        info!(
            "Header emitted with {} sections to {:?}",
            sections,
            self.frontend.sink_names()
        );

        info!(
            "Sampling every {}s ({})",
            self.schedule.period.as_secs_f64(),
            match self.schedule.num_samples {
                0 => "until interrupted".to_string(),
                n => format!("{} samples", n),
            }
        );

        let mut ticker = interval_at(Instant::now() + self.schedule.period, self.schedule.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut samples = 0u64;
        let reason = loop {
            if self.schedule.num_samples != 0 && samples >= self.schedule.num_samples {
                break StopReason::Completed;
            }
            tokio::select! {
                _ = &mut shutdown => break StopReason::Shutdown,
                _ = ticker.tick() => {
                    if self.take_sample(samples).is_err() {
                        failed_pushes += 1;
                    }
                    samples += 1;
                }
            }
        };

        match reason {
            StopReason::Completed => info!("Sampling complete after {} samples", samples),
            StopReason::Shutdown => info!("Shutdown requested after {} samples", samples),
        }
        if failed_pushes > 0 {
            warn!("{} pushes failed on at least one output", failed_pushes);
        }

        self.frontend.close()?;
        Ok(RunSummary {
            samples,
            failed_pushes,
            reason,
        })
    }

    fn take_sample(&mut self, index: u64) -> Result<(), OutputError> {
        record_timestamp(&mut self.frontend, OffsetDateTime::now_utc(), index);
        if self.schedule.emit_stats {
            self.frontend.pstats();
        }
        debug!(
            "Sample {} holds {} measurements",
            index,
            self.frontend.measurement_count()
        );
        self.frontend.push(TickKind::Sample)
    }
}

/// Records the `timestamp` section opening every sample.
pub fn record_timestamp(out: &mut OutputFrontend, now: OffsetDateTime, index: u64) {
    let datetime = now.format(&Rfc3339).unwrap_or_default();
    out.section_start("timestamp");
    out.pstring("datetime", &datetime);
    out.pstring("UTC", "true");
    out.plong("sample_index", i64::try_from(index).unwrap_or(i64::MAX));
    out.section_end();
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };

    use time::macros::datetime;
    use tracing_test::traced_test;

    use super::*;
    use crate::core::{
        header::{error::HeaderResult, HeaderFields, HeaderRecord},
        output::{prometheus::PrometheusSink, MetricSink, SampleTree, Tick},
    };

    const FAST: Duration = Duration::from_millis(10);

    struct HostName;

    #[async_trait::async_trait]
    impl HeaderProducer for HostName {
        fn name(&self) -> &'static str {
            "identity"
        }

        async fn produce(&self) -> HeaderResult<HeaderRecord> {
            let mut fields = HeaderFields::new();
            fields.push_str("hostname", "node1");
            Ok(HeaderRecord::fields("identity", fields))
        }
    }

    /// Sink remembering the section names of every tick.
    #[derive(Clone, Default)]
    struct Recorder {
        ticks: Arc<Mutex<Vec<(TickKind, Vec<String>)>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl MetricSink for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn push(&mut self, tree: &SampleTree, tick: &Tick) -> Result<(), OutputError> {
            let names = tree.sections().iter().map(|s| s.name.clone()).collect();
            self.ticks.lock().unwrap().push((tick.kind, names));
            Ok(())
        }

        fn close(&mut self) -> Result<(), OutputError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn executor(recorder: &Recorder, schedule: Schedule) -> Executor {
        let mut out = OutputFrontend::new();
        out.add_sink(Box::new(recorder.clone()));
        Executor::new(out, vec![Box::new(HostName)], schedule)
    }

    #[test]
    fn test_record_timestamp() {
        let mut out = OutputFrontend::new();
        record_timestamp(&mut out, datetime!(2024-05-06 07:08:09 UTC), 4);

        let section = out.tree().section("timestamp").unwrap();
        let values: Vec<_> = section
            .content
            .measurements()
            .iter()
            .map(|m| (m.name(), m.raw_value()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("datetime", "2024-05-06T07:08:09Z"),
                ("UTC", "true"),
                ("sample_index", "4"),
            ]
        );
    }

    #[test]
    fn test_schedule_from_config() {
        let schedule = Schedule::from(&SamplingConfig {
            interval_seconds: 5,
            num_samples: 12,
            emit_stats: true,
        });
        assert_eq!(schedule.period, Duration::from_secs(5));
        assert_eq!(schedule.num_samples, 12);
        assert!(schedule.emit_stats);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_bounded_run() {
        let recorder = Recorder::default();
        let schedule = Schedule {
            period: FAST,
            num_samples: 3,
            emit_stats: true,
        };

        let summary = executor(&recorder, schedule)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            summary,
            RunSummary {
                samples: 3,
                failed_pushes: 0,
                reason: StopReason::Completed
            }
        );

        let ticks = recorder.ticks.lock().unwrap();
        assert_eq!(ticks.len(), 4);
        assert_eq!(ticks[0], (TickKind::Header, vec!["identity".to_string()]));
        for (kind, sections) in &ticks[1..] {
            assert_eq!(*kind, TickKind::Sample);
            assert_eq!(sections, &vec!["timestamp".to_string(), "cmonitor_stats".to_string()]);
        }
        assert!(*recorder.closed.lock().unwrap());
        assert!(logs_contain("Sampling complete after 3 samples"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_unbounded_run() {
        let recorder = Recorder::default();
        let schedule = Schedule {
            period: FAST,
            num_samples: 0,
            emit_stats: false,
        };

        let summary = executor(&recorder, schedule)
            .run(tokio::time::sleep(Duration::from_millis(55)))
            .await
            .unwrap();

        assert_eq!(summary.reason, StopReason::Shutdown);
        assert!(summary.samples >= 1);

        let ticks = recorder.ticks.lock().unwrap();
        assert_eq!(ticks.len() as u64, summary.samples + 1);
        assert_eq!(ticks[1].1, vec!["timestamp".to_string()]);
        assert!(*recorder.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_prometheus_fed_by_samples() {
        let prometheus = PrometheusSink::new(COLLECTOR_KPIS, &BTreeMap::new()).unwrap();
        let registry = prometheus.registry();

        let mut out = OutputFrontend::new();
        out.add_sink(Box::new(prometheus));
        let schedule = Schedule {
            period: FAST,
            num_samples: 2,
            emit_stats: true,
        };
        Executor::new(out, Vec::new(), schedule)
            .run(std::future::pending())
            .await
            .unwrap();

        let text = crate::core::output::prometheus::render_registry(&registry).unwrap();
        assert!(text.contains(
            "timestamp_sample_index{function=\"cmonitor\",metric=\"timestamp\"} 1"
        ));
        assert!(text.contains(
            "cmonitor_stats_section_total{function=\"cmonitor\",metric=\"cmonitor_stats\"}"
        ));
        assert!(!text.contains(",}"));
    }
}

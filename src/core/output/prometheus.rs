//! Prometheus output.
//!
//! KPIs are registered once at startup from a static descriptor table and
//! updated in place on every sample; the scrape endpoint in
//! [`super::exposer`] renders the shared registry on demand.
//!
//! Metric names are `<section>_<measurement>`, sanitized so that `-`, `.`
//! and `(` become `_` and `)` disappears. Registration and lookup go through
//! the same sanitizer.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{atomic::AtomicU64, Arc},
};

use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use tracing::{debug, error, info};

use super::{
    error::OutputError,
    sink::{MetricSink, Tick},
    tree::{LeafLevel, SampleTree},
};

/// Constant label attached to every KPI.
pub const FUNCTION_LABEL: (&str, &str) = ("function", "cmonitor");

/// Sub-subsections carrying per-process identity, never exported.
const SKIPPED_GROUP: &str = "proc_info";

/// Label holding the name of the leaf group a value came from. Section
/// level groups use the section name.
const METRIC_LABEL: &str = "metric";

type LabelSet = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KpiKind {
    Counter,
    Gauge,
}

/// Static description of one KPI.
#[derive(Debug, Clone, Copy)]
pub struct KpiDescriptor {
    /// `<section>_<measurement>`; sanitized on registration.
    pub name: &'static str,
    pub kind: KpiKind,
    pub help: &'static str,
}

impl KpiDescriptor {
    pub const fn counter(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            kind: KpiKind::Counter,
            help,
        }
    }

    pub const fn gauge(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            kind: KpiKind::Gauge,
            help,
        }
    }
}

#[derive(Debug, Clone)]
enum Kpi {
    Counter(Family<LabelSet, Counter<f64, AtomicU64>>),
    Gauge(Family<LabelSet, Gauge<f64, AtomicU64>>),
}

impl Kpi {
    fn update(&self, name: &str, labels: &LabelSet, value: f64) {
        match self {
            Kpi::Gauge(family) => {
                family.get_or_create(labels).set(value);
            }
            Kpi::Counter(family) => {
                let counter = family.get_or_create(labels);
                let current = counter.get();
                if value < current {
                    debug!(
                        "Counter {} went backwards ({} < {}), sample skipped",
                        name, value, current
                    );
                    return;
                }
                counter.inc_by(value - current);
            }
        }
    }

    #[cfg(test)]
    fn value(&self, labels: &LabelSet) -> f64 {
        match self {
            Kpi::Gauge(family) => family.get_or_create(labels).get(),
            Kpi::Counter(family) => family.get_or_create(labels).get(),
        }
    }
}

/// Replaces `-`, `.` and `(` with `_` and drops `)`.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    push_sanitized(&mut out, raw);
    out
}

/// Registry key for a measurement of a section.
pub fn sanitize_metric_name(section: &str, measurement: &str) -> String {
    let mut out = String::with_capacity(section.len() + measurement.len() + 1);
    push_sanitized(&mut out, section);
    out.push('_');
    push_sanitized(&mut out, measurement);
    out
}

fn push_sanitized(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '-' | '.' | '(' => out.push('_'),
            ')' => {}
            c => out.push(c),
        }
    }
}

/// Updates registered KPIs from every regular sample.
pub struct PrometheusSink {
    registry: Arc<Registry>,
    kpis: HashMap<String, Kpi>,
}

impl PrometheusSink {
    /// Registers every descriptor with the constant labels
    /// `function="cmonitor"` plus `metadata`.
    pub fn new(
        descriptors: &[KpiDescriptor],
        metadata: &BTreeMap<String, String>,
    ) -> Result<Self, OutputError> {
        let mut const_labels: BTreeMap<String, String> = metadata.clone();
        const_labels.insert(FUNCTION_LABEL.0.to_owned(), FUNCTION_LABEL.1.to_owned());

        let mut registry = Registry::with_labels(
            const_labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into())),
        );

        let mut kpis = HashMap::with_capacity(descriptors.len());
        for desc in descriptors {
            let name = sanitize_name(desc.name);
            if kpis.contains_key(&name) {
                return Err(OutputError::DuplicateKpi(name));
            }
            let kpi = match desc.kind {
                KpiKind::Counter => {
                    let family = Family::<LabelSet, Counter<f64, AtomicU64>>::default();
                    registry.register(name.as_str(), desc.help, family.clone());
                    Kpi::Counter(family)
                }
                KpiKind::Gauge => {
                    let family = Family::<LabelSet, Gauge<f64, AtomicU64>>::default();
                    registry.register(name.as_str(), desc.help, family.clone());
                    Kpi::Gauge(family)
                }
            };
            kpis.insert(name, kpi);
        }

        info!("Registered {} Prometheus KPIs", kpis.len());
        Ok(Self {
            registry: Arc::new(registry),
            kpis,
        })
    }

    /// Shared registry, handed to the scrape endpoint.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn kpi_count(&self) -> usize {
        self.kpis.len()
    }

    pub fn has_kpi(&self, name: &str) -> bool {
        self.kpis.contains_key(name)
    }

    /// Text exposition of the registry.
    pub fn render(&self) -> Result<String, OutputError> {
        render_registry(&self.registry)
    }

    fn update(&self, name: &str, labels: &LabelSet, value: f64) {
        match self.kpis.get(name) {
            Some(kpi) => kpi.update(name, labels, value),
            None => error!("KPI {} not found in the list", name),
        }
    }

    #[cfg(test)]
    fn sampled(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let labels: LabelSet = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.kpis.get(name).map(|kpi| kpi.value(&labels))
    }
}

/// Renders a registry in the OpenMetrics text format.
pub fn render_registry(registry: &Registry) -> Result<String, OutputError> {
    let mut body = String::new();
    encode(&mut body, registry)?;
    Ok(body)
}

impl MetricSink for PrometheusSink {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    fn push(&mut self, tree: &SampleTree, tick: &Tick) -> Result<(), OutputError> {
        if tick.is_header() {
            return Ok(());
        }

        for group in tree.leaf_groups() {
            if group.level == LeafLevel::SubSubsection && group.name == SKIPPED_GROUP {
                continue;
            }

            // Every series carries `metric`, so the label set is never empty.
            let labels: LabelSet = match group.labels {
                None => vec![(METRIC_LABEL.to_owned(), group.name.to_owned())],
                Some(node_labels) => {
                    let mut merged = node_labels.clone();
                    merged.insert(METRIC_LABEL.to_owned(), group.name.to_owned());
                    merged.into_iter().collect()
                }
            };

            for m in group.measurements {
                let Some(value) = m.numeric_value() else {
                    continue;
                };
                if !value.is_finite() {
                    continue;
                }
                let name = sanitize_metric_name(group.section, m.name());
                self.update(&name, &labels, value);
            }
        }
        Ok(())
    }
}

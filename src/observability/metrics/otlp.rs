//! OTLP metrics sink.
//!
//! Instruments keep recording through the `metrics` facade. [`OtlpRecorder`]
//! forwards each series to an OpenTelemetry SDK meter, and the SDK's periodic
//! reader aggregates and pushes to the collector.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use opentelemetry::metrics as otel;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::Resource;
use url::Url;

use super::{buckets_for, lock};
use crate::observability::endpoint::build_off_runtime;
use crate::observability::error::{Signal, TelemetryError};

/// Meter provider that pushes to `url` every `interval`.
pub(crate) fn meter_provider(
    url: &Url,
    resource: Resource,
    interval: Duration,
) -> Result<SdkMeterProvider, TelemetryError> {
    let endpoint = url.to_string();
    let exporter = build_off_runtime(move || {
        MetricExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .with_timeout(interval)
            .build()
    })
    .map_err(|e| TelemetryError::init(Signal::Metrics, e))?;

    let reader = PeriodicReader::builder(exporter).with_interval(interval).build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

/// UCUM symbol for a facade unit.
pub(crate) fn unit_symbol(unit: Unit) -> &'static str {
    match unit {
        Unit::Count => "1",
        Unit::Bytes => "By",
        other => other.as_canonical_label(),
    }
}

#[derive(Clone, Default)]
struct Description {
    unit: Option<Unit>,
    text: Option<String>,
}

/// `metrics` recorder backed by an OpenTelemetry meter.
///
/// One SDK instrument handle is kept per series, so gauge deltas are computed
/// against the value that series last reported.
pub(crate) struct OtlpRecorder {
    meter: otel::Meter,
    descriptions: Mutex<HashMap<String, Description>>,
    counters: Mutex<HashMap<Key, Arc<OtlpCounter>>>,
    gauges: Mutex<HashMap<Key, Arc<OtlpGauge>>>,
    histograms: Mutex<HashMap<Key, Arc<OtlpHistogram>>>,
}

impl OtlpRecorder {
    pub(crate) fn new(meter: otel::Meter) -> Self {
        Self {
            meter,
            descriptions: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    fn describe(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        lock(&self.descriptions).insert(
            key.as_str().to_string(),
            Description {
                unit,
                text: Some(description.to_string()),
            },
        );
    }

    fn description(&self, name: &str) -> Description {
        lock(&self.descriptions).get(name).cloned().unwrap_or_default()
    }
}

fn attributes(key: &Key) -> Vec<KeyValue> {
    key.labels()
        .map(|label| KeyValue::new(label.key().to_string(), label.value().to_string()))
        .collect()
}

impl Recorder for OtlpRecorder {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.describe(key, unit, description);
    }

    fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.describe(key, unit, description);
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.describe(key, unit, description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let counter = lock(&self.counters)
            .entry(key.clone())
            .or_insert_with(|| {
                let description = self.description(key.name());
                let mut builder = self.meter.u64_counter(key.name().to_string());
                if let Some(text) = description.text {
                    builder = builder.with_description(text);
                }
                if let Some(unit) = description.unit {
                    builder = builder.with_unit(unit_symbol(unit));
                }
                Arc::new(OtlpCounter {
                    counter: builder.build(),
                    attributes: attributes(key),
                    total: AtomicU64::new(0),
                })
            })
            .clone();
        Counter::from_arc(counter)
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let gauge = lock(&self.gauges)
            .entry(key.clone())
            .or_insert_with(|| {
                let description = self.description(key.name());
                let mut builder = self.meter.f64_up_down_counter(key.name().to_string());
                if let Some(text) = description.text {
                    builder = builder.with_description(text);
                }
                if let Some(unit) = description.unit {
                    builder = builder.with_unit(unit_symbol(unit));
                }
                Arc::new(OtlpGauge {
                    counter: builder.build(),
                    attributes: attributes(key),
                    value: Mutex::new(0.0),
                })
            })
            .clone();
        Gauge::from_arc(gauge)
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let histogram = lock(&self.histograms)
            .entry(key.clone())
            .or_insert_with(|| {
                let description = self.description(key.name());
                let mut builder = self.meter.f64_histogram(key.name().to_string());
                if let Some(text) = description.text {
                    builder = builder.with_description(text);
                }
                if let Some(unit) = description.unit {
                    builder = builder.with_unit(unit_symbol(unit));
                }
                if let Some(buckets) = buckets_for(key.name()) {
                    builder = builder.with_boundaries(buckets.to_vec());
                }
                Arc::new(OtlpHistogram {
                    histogram: builder.build(),
                    attributes: attributes(key),
                })
            })
            .clone();
        Histogram::from_arc(histogram)
    }
}

struct OtlpCounter {
    counter: otel::Counter<u64>,
    attributes: Vec<KeyValue>,
    total: AtomicU64,
}

impl CounterFn for OtlpCounter {
    fn increment(&self, value: u64) {
        self.total.fetch_add(value, Ordering::Relaxed);
        self.counter.add(value, &self.attributes);
    }

    fn absolute(&self, value: u64) {
        let previous = self.total.fetch_max(value, Ordering::Relaxed);
        if value > previous {
            self.counter.add(value - previous, &self.attributes);
        }
    }
}

/// Facade gauge exported as an OTLP up-down counter.
struct OtlpGauge {
    counter: otel::UpDownCounter<f64>,
    attributes: Vec<KeyValue>,
    value: Mutex<f64>,
}

impl OtlpGauge {
    fn apply(&self, update: impl FnOnce(f64) -> f64) {
        let mut value = lock(&self.value);
        let next = update(*value);
        self.counter.add(next - *value, &self.attributes);
        *value = next;
    }
}

impl GaugeFn for OtlpGauge {
    fn increment(&self, value: f64) {
        self.apply(|current| current + value);
    }

    fn decrement(&self, value: f64) {
        self.apply(|current| current - value);
    }

    fn set(&self, value: f64) {
        self.apply(|_| value);
    }
}

struct OtlpHistogram {
    histogram: otel::Histogram<f64>,
    attributes: Vec<KeyValue>,
}

impl HistogramFn for OtlpHistogram {
    fn record(&self, value: f64) {
        self.histogram.record(value, &self.attributes);
    }
}

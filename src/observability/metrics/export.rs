//! Periodic export of Prometheus text to stdout or a Pushgateway.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};
use url::Url;

use super::{Meter, MetricsSink};
use crate::observability::error::{Signal, TelemetryError};

pub(super) enum TextExporter {
    Stdout,
    Pushgateway { client: reqwest::Client, url: Url },
}

impl TextExporter {
    pub(super) fn new(sink: &MetricsSink, timeout: Duration) -> Result<Self, TelemetryError> {
        match sink {
            MetricsSink::Pushgateway(url) => {
                let client = reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(|e| TelemetryError::init(Signal::Metrics, e))?;
                Ok(Self::Pushgateway {
                    client,
                    url: url.clone(),
                })
            }
            _ => Ok(Self::Stdout),
        }
    }

    async fn export(&self, payload: String) -> Result<(), TelemetryError> {
        if payload.trim().is_empty() {
            return Ok(());
        }

        match self {
            TextExporter::Stdout => {
                let timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                let record = format!("# metrics export at unix time {timestamp}\n{payload}");

                let mut out = tokio::io::stdout();
                out.write_all(record.as_bytes())
                    .await
                    .map_err(|e| TelemetryError::export(Signal::Metrics, e))?;
                out.flush()
                    .await
                    .map_err(|e| TelemetryError::export(Signal::Metrics, e))
            }
            TextExporter::Pushgateway { client, url } => {
                client
                    .put(url.clone())
                    .header(reqwest::header::CONTENT_TYPE, "text/plain; version=0.0.4")
                    .body(payload)
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|e| TelemetryError::export(Signal::Metrics, e))?;
                Ok(())
            }
        }
    }
}

pub(super) async fn run_reader(
    meter: Meter,
    exporter: TextExporter,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => export_cycle(&meter, &exporter).await,
            _ = &mut stop => {
                export_cycle(&meter, &exporter).await;
                break;
            }
        }
    }

    tracing::debug!("Metrics exporter stopped");
}

async fn export_cycle(meter: &Meter, exporter: &TextExporter) {
    let Some(payload) = meter.render() else {
        return;
    };
    if let Err(e) = exporter.export(payload).await {
        tracing::warn!(error = %e, "Metrics export failed; will retry next interval");
    }
}

//! Collector endpoints shared by the metrics and trace sinks.

use std::fmt::Display;
use std::thread;

use url::Url;

/// Turn a configured endpoint into a URL.
///
/// Accepts either a bare `host:port` (treated as plain HTTP) or a full
/// `http://` / `https://` URL.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url, String> {
    let candidate = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };

    let url = Url::parse(&candidate).map_err(|e| format!("invalid endpoint '{endpoint}': {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{other}' in endpoint '{endpoint}'")),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("endpoint '{endpoint}' has no host"));
    }

    Ok(url)
}

/// Parse an endpoint and give it `default_path` when it has no path.
pub(crate) fn signal_url(endpoint: &str, default_path: &str) -> Result<Url, String> {
    let mut url = parse_endpoint(endpoint)?;
    if url.path() == "/" {
        url.set_path(default_path);
    }
    Ok(url)
}

/// Build an exporter on a plain OS thread.
///
/// The OTLP exporters own a blocking HTTP client, which panics when it is
/// created on a Tokio worker thread.
pub(crate) fn build_off_runtime<T, E>(
    build: impl FnOnce() -> Result<T, E> + Send,
) -> Result<T, String>
where
    T: Send,
    E: Display + Send,
{
    thread::scope(|scope| match scope.spawn(build).join() {
        Ok(built) => built.map_err(|e| e.to_string()),
        Err(_) => Err("exporter construction panicked".to_string()),
    })
}

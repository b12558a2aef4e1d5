//! Resource attributes attached to every exported span and metric.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

pub(crate) fn service_resource(name: &str, version: &str) -> Resource {
    Resource::builder_empty()
        .with_service_name(name.to_string())
        .with_attribute(KeyValue::new("service.version", version.to_string()))
        .build()
}

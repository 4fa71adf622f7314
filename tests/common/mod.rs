//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use spark_live::{AssignMap, Component, RenderScope, TemplateBuilder, TemplateComponent, Value};
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test output. `RUST_LOG=spark_live=trace` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `<li>{name}</li>` component.
pub fn user_card() -> Arc<dyn Component> {
    let template = TemplateBuilder::new().text("<li>").assign("name").text("</li>").build().unwrap();
    Arc::new(TemplateComponent::new("user_card", template))
}

/// Props for a component referenced from a comprehension over names.
pub fn name_props(scope: &RenderScope<'_>) -> spark_live::Result<AssignMap> {
    Ok(AssignMap::from_iter([("name".to_string(), scope.get("user")?.clone())]))
}

pub fn user_id(scope: &RenderScope<'_>) -> spark_live::Result<String> {
    Ok(scope.str("user")?.to_string())
}

pub fn strings(values: &[&str]) -> Value {
    Value::Array(values.iter().map(|v| Value::String(v.to_string())).collect())
}

pub mod gray;

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use pingora::OkOrErr;
use pingora_error::{ErrorType::ReadError, Result};
use serde_json::Value as JsonValue;

use crate::core::{PluginCreateFn, ProxyPlugin};

/// Global registry mapping plugin names to their factory functions.
///
/// Higher priority values execute earlier in the plugin chain.
static PLUGIN_BUILDER_REGISTRY: Lazy<HashMap<&'static str, PluginCreateFn>> = Lazy::new(|| {
    let arr: Vec<(&str, PluginCreateFn)> = vec![
        (gray::PLUGIN_NAME, gray::create_gray_plugin), // 2600
    ];
    arr.into_iter().collect()
});

/// Creates plugin instances from configuration.
///
/// # Errors
/// Returns `ReadError` for unknown plugin names or configuration parsing failures
pub fn build_plugin(name: &str, cfg: JsonValue) -> Result<Arc<dyn ProxyPlugin>> {
    let builder = PLUGIN_BUILDER_REGISTRY
        .get(name)
        .or_err(ReadError, "Unknown plugin type")?;
    builder(cfg)
}

//! Gray (canary) steering.
//!
//! For every request carrying a `gray-name` header the engine looks up the
//! route's upstream at the configuration authority, then asks either the
//! service registry or the upstream's first node whether a gray variant is
//! available, and tags the request with `force-gray: true` when it is.

pub mod engine;
pub mod mutator;
pub mod probe;
pub mod registry;
pub mod resolver;

use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use pingora_core::{server::ShutdownWatch, services::background::BackgroundService};
use serde::{Deserialize, Deserializer};

use crate::config::GrayConfig;
use crate::core::GrayResult;

pub use engine::GrayDecisionEngine;

/// Request header naming the gray variant a caller asks for.
pub const GRAY_NAME_HEADER: &str = "gray-name";
/// Registry metadata key naming the gray variant an instance serves.
pub const GRAY_NAME_METADATA: &str = "gray-name";
/// Header set on requests steered to the gray variant.
pub const FORCE_GRAY_HEADER: &str = "force-gray";
/// Routing variable set on requests steered to the gray variant.
pub const FORCE_GRAY_VAR: &str = "force-gray";

/// How an upstream finds its backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamDescriptor {
    /// Backends come from service discovery
    ServiceBacked { service_name: String },
    /// First static node of the upstream
    NodeBacked { host: String, port: String },
}

/// One instance as reported by the registry.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ServiceInstance {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub healthy: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: HashMap<String, String>,
}

// Nacos reports `"metadata": null` for instances registered without any.
fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ServiceInstance {
    /// Healthy and labelled with exactly this gray name.
    pub fn serves(&self, selector: &GraySelector) -> bool {
        self.healthy
            && self
                .metadata
                .get(GRAY_NAME_METADATA)
                .is_some_and(|name| name == selector.as_str())
    }
}

/// Non-blank value of the `gray-name` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraySelector(String);

impl GraySelector {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.filter(|v| !v.trim().is_empty())
            .map(|v| GraySelector(v.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SteeringDecision {
    pub force_gray: bool,
}

impl SteeringDecision {
    pub const NOT_GRAY: SteeringDecision = SteeringDecision { force_gray: false };
}

impl From<bool> for SteeringDecision {
    fn from(force_gray: bool) -> Self {
        Self { force_gray }
    }
}

static GRAY_ENGINE: ArcSwapOption<GrayDecisionEngine> = ArcSwapOption::const_empty();

/// Builds the process-wide engine and its long-lived HTTP clients.
pub fn init_gray_engine(config: &GrayConfig) -> GrayResult<Arc<GrayDecisionEngine>> {
    let engine = Arc::new(GrayDecisionEngine::from_config(config)?);
    install_gray_engine(engine.clone());
    log::info!(
        "Gray engine initialized: registry={} namespace={} group={}",
        config.registry.server_addr,
        config.registry.namespace,
        config.registry.group
    );
    Ok(engine)
}

pub fn install_gray_engine(engine: Arc<GrayDecisionEngine>) {
    GRAY_ENGINE.store(Some(engine));
}

pub fn gray_engine() -> Option<Arc<GrayDecisionEngine>> {
    GRAY_ENGINE.load_full()
}

/// Drops the process-wide engine. Requests already holding it finish normally.
pub fn shutdown_gray_engine() {
    if GRAY_ENGINE.swap(None).is_some() {
        log::info!("Gray engine shut down");
    }
}

/// Drops the process-wide engine once the server starts shutting down.
pub struct GrayEngineLifecycle;

#[async_trait]
impl BackgroundService for GrayEngineLifecycle {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        while shutdown.changed().await.is_ok() {
            if *shutdown.borrow() {
                break;
            }
        }
        shutdown_gray_engine();
    }
}

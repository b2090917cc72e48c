use std::sync::Arc;

use async_trait::async_trait;
use pingora_error::{ErrorType::ReadError, OrErr, Result};
use pingora_http::RequestHeader;
use pingora_proxy::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::{
    core::{GrayError, ProxyContext, ProxyPlugin},
    gray::{gray_engine, mutator, GrayDecisionEngine, SteeringDecision, GRAY_NAME_HEADER},
    utils::request,
};

pub const PLUGIN_NAME: &str = "gray";
const PRIORITY: i32 = 2600;

const REQUIRED_VARS: &[&str] = &["remote_addr", "server_port"];

/// Creates a gray plugin bound to the process-wide engine.
pub fn create_gray_plugin(cfg: JsonValue) -> Result<Arc<dyn ProxyPlugin>> {
    let engine = gray_engine()
        .ok_or_else(|| GrayError::Configuration("gray engine is not initialized".into()))?;
    Ok(Arc::new(PluginGray::new(cfg, engine)?))
}

/// Configuration for the gray plugin.
#[derive(Default, Debug, Serialize, Deserialize, Validate)]
struct PluginConfig {
    /// Admin API id of the upstream whose gray variants are looked up
    #[validate(length(min = 1))]
    upstream_id: String,
}

/// Steers requests carrying `gray-name` to the gray variant of the route's upstream.
pub struct PluginGray {
    config: PluginConfig,
    engine: Arc<GrayDecisionEngine>,
}

impl PluginGray {
    pub fn new(cfg: JsonValue, engine: Arc<GrayDecisionEngine>) -> Result<Self> {
        let config: PluginConfig =
            serde_json::from_value(cfg).or_err_with(ReadError, || "Invalid gray plugin config")?;

        config
            .validate()
            .or_err_with(ReadError, || "Invalid gray plugin config")?;

        Ok(Self { config, engine })
    }

    pub fn upstream_id(&self) -> &str {
        &self.config.upstream_id
    }

    /// Decides for this request and tags it when steered.
    pub async fn steer(&self, header: &mut RequestHeader, ctx: &mut ProxyContext) -> SteeringDecision {
        let decision = self
            .engine
            .decide(
                request::get_req_header_value(header, GRAY_NAME_HEADER),
                &self.config.upstream_id,
            )
            .await;

        if let Err(e) = mutator::apply(header, ctx, decision) {
            log::error!("Failed to tag request for gray routing: {e}");
        }
        decision
    }
}

#[async_trait]
impl ProxyPlugin for PluginGray {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    fn required_vars(&self) -> &[&'static str] {
        REQUIRED_VARS
    }

    fn requires_body(&self) -> bool {
        true
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut ProxyContext) -> Result<bool> {
        self.steer(session.req_header_mut(), ctx).await;
        Ok(false)
    }
}

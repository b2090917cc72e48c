use std::{sync::Arc, time::Duration};

use super::{
    probe::{HttpNodeProbe, NodeProbe},
    registry::{NacosRegistry, RegistryProbe},
    resolver::{AdminApiResolver, UpstreamResolver},
    GraySelector, SteeringDecision, UpstreamDescriptor,
};
use crate::config::GrayConfig;
use crate::core::{GrayError, GrayResult};

/// Progress of one decision.
///
/// Every transition out of `ResolvingConfig` or `Probing` that fails lands
/// in `Decided(NOT_GRAY)`, so no error ever leaves [`GrayDecisionEngine::decide`].
#[derive(Debug)]
enum DecisionState {
    Idle,
    ResolvingConfig,
    Probing(UpstreamDescriptor),
    Decided(SteeringDecision),
}

/// Decides per request whether it goes to the gray variant of its upstream.
///
/// Holds no per-request state; one engine serves all requests concurrently.
pub struct GrayDecisionEngine {
    resolver: Arc<dyn UpstreamResolver>,
    registry: RegistryProbe,
    node_probe: Arc<dyn NodeProbe>,
    deadline: Duration,
}

impl GrayDecisionEngine {
    pub fn new(
        resolver: Arc<dyn UpstreamResolver>,
        registry: RegistryProbe,
        node_probe: Arc<dyn NodeProbe>,
        deadline: Duration,
    ) -> Self {
        Self {
            resolver,
            registry,
            node_probe,
            deadline,
        }
    }

    pub fn from_config(config: &GrayConfig) -> GrayResult<Self> {
        let resolver = AdminApiResolver::new(&config.admin)?;
        let registry = NacosRegistry::new(&config.registry)?;
        let node_probe = HttpNodeProbe::new(&config.node_probe)?;

        Ok(Self::new(
            Arc::new(resolver),
            RegistryProbe::new(Arc::new(registry), config.registry.retries),
            Arc::new(node_probe),
            config.deadline(),
        ))
    }

    /// Blank selectors return immediately without any outbound call.
    pub async fn decide(&self, selector: Option<&str>, upstream_id: &str) -> SteeringDecision {
        let Some(selector) = GraySelector::parse(selector) else {
            return SteeringDecision::NOT_GRAY;
        };

        match tokio::time::timeout(self.deadline, self.evaluate(&selector, upstream_id)).await {
            Ok(decision) => {
                log::debug!(
                    "Gray decision for upstream {upstream_id}, gray-name {}: {}",
                    selector.as_str(),
                    decision.force_gray
                );
                decision
            }
            Err(_) => {
                log::warn!(
                    "Gray decision for upstream {upstream_id} exceeded {}ms, not steering",
                    self.deadline.as_millis()
                );
                SteeringDecision::NOT_GRAY
            }
        }
    }

    async fn evaluate(&self, selector: &GraySelector, upstream_id: &str) -> SteeringDecision {
        let mut state = DecisionState::Idle;
        loop {
            state = match state {
                DecisionState::Idle => DecisionState::ResolvingConfig,
                DecisionState::ResolvingConfig => match self.resolver.resolve(upstream_id).await {
                    Ok(descriptor) => DecisionState::Probing(descriptor),
                    Err(e) => Self::give_up(upstream_id, e),
                },
                DecisionState::Probing(descriptor) => match self.probe(&descriptor, selector).await
                {
                    Ok(found) => DecisionState::Decided(found.into()),
                    Err(e) => Self::give_up(upstream_id, e),
                },
                DecisionState::Decided(decision) => return decision,
            };
        }
    }

    async fn probe(
        &self,
        descriptor: &UpstreamDescriptor,
        selector: &GraySelector,
    ) -> GrayResult<bool> {
        match descriptor {
            UpstreamDescriptor::ServiceBacked { service_name } => {
                self.registry.has_gray_instance(service_name, selector).await
            }
            UpstreamDescriptor::NodeBacked { host, port } => {
                self.node_probe.is_healthy(host, port).await
            }
        }
    }

    fn give_up(upstream_id: &str, e: GrayError) -> DecisionState {
        log::warn!("Gray evaluation for upstream {upstream_id} failed, not steering: {e}");
        DecisionState::Decided(SteeringDecision::NOT_GRAY)
    }
}

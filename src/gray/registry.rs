use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use super::{GraySelector, ServiceInstance};
use crate::config::Registry;
use crate::core::{GrayError, GrayResult};

const INSTANCE_LIST_PATH: &str = "nacos/v1/ns/instance/list";

/// Source of registered instances for a service.
///
/// Group and namespace are fixed per process, so only the service name
/// varies between calls.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn instances(&self, service_name: &str) -> GrayResult<Vec<ServiceInstance>>;
}

/// Answers "does this service run a healthy instance of that gray variant".
pub struct RegistryProbe {
    registry: Arc<dyn ServiceRegistry>,
    retries: u8,
}

impl RegistryProbe {
    pub fn new(registry: Arc<dyn ServiceRegistry>, retries: u8) -> Self {
        Self { registry, retries }
    }

    pub async fn has_gray_instance(
        &self,
        service_name: &str,
        selector: &GraySelector,
    ) -> GrayResult<bool> {
        let instances = self.instances(service_name).await?;
        log::debug!(
            "Registry reported {} instance(s) for {service_name}",
            instances.len()
        );
        Ok(has_gray_instance(&instances, selector))
    }

    async fn instances(&self, service_name: &str) -> GrayResult<Vec<ServiceInstance>> {
        let mut attempt = 0;
        loop {
            match self.registry.instances(service_name).await {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    log::warn!("Retrying registry query for {service_name}: {e}");
                }
                res => return res,
            }
        }
    }
}

pub fn has_gray_instance(instances: &[ServiceInstance], selector: &GraySelector) -> bool {
    instances.iter().any(|ins| ins.serves(selector))
}

#[derive(Deserialize)]
struct InstanceList {
    #[serde(default)]
    hosts: Vec<ServiceInstance>,
}

/// Nacos naming client over the v1 open API.
///
/// One instance is shared by every in-flight decision; the inner
/// [`Client`] pools connections.
pub struct NacosRegistry {
    client: Client,
    list_url: Url,
    namespace: String,
    group: String,
    access_token: Option<String>,
}

impl NacosRegistry {
    pub fn new(config: &Registry) -> GrayResult<Self> {
        let list_url = instance_list_url(&config.server_addr)?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout))
            .build()
            .map_err(|e| GrayError::Configuration(format!("registry http client: {e}")))?;

        Ok(Self {
            client,
            list_url,
            namespace: config.namespace.clone(),
            group: config.group.clone(),
            access_token: config.access_token.clone(),
        })
    }
}

fn instance_list_url(server_addr: &str) -> GrayResult<Url> {
    let base = if server_addr.starts_with("http://") || server_addr.starts_with("https://") {
        server_addr.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", server_addr.trim_end_matches('/'))
    };

    Url::parse(&format!("{base}/{INSTANCE_LIST_PATH}")).map_err(|e| {
        GrayError::Configuration(format!("invalid registry server_addr {server_addr}: {e}"))
    })
}

#[async_trait]
impl ServiceRegistry for NacosRegistry {
    async fn instances(&self, service_name: &str) -> GrayResult<Vec<ServiceInstance>> {
        let mut query: Vec<(&str, &str)> = vec![
            ("serviceName", service_name),
            ("groupName", self.group.as_str()),
            ("namespaceId", self.namespace.as_str()),
            ("healthyOnly", "false"),
        ];
        if let Some(token) = self.access_token.as_deref() {
            query.push(("accessToken", token));
        }

        let resp = self
            .client
            .get(self.list_url.clone())
            .query(&query)
            .send()
            .await
            .map_err(|e| GrayError::RegistryUnavailable(format!("{service_name}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GrayError::Registry(format!(
                "{service_name}@{}: registry answered {status}",
                self.group
            )));
        }

        let list: InstanceList = resp
            .json()
            .await
            .map_err(|e| GrayError::Registry(format!("{service_name}: {e}")))?;

        Ok(list.hosts)
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value as JsonValue;

use super::UpstreamDescriptor;
use crate::config::AdminApi;
use crate::core::{GrayError, GrayResult};

const API_KEY_HEADER: &str = "x-api-key";

/// Looks up an upstream's descriptor by id.
#[async_trait]
pub trait UpstreamResolver: Send + Sync {
    async fn resolve(&self, upstream_id: &str) -> GrayResult<UpstreamDescriptor>;
}

/// Resolver backed by an APISIX-style admin API:
/// `GET {base_url}/upstreams/{id}` with an `x-api-key` header.
pub struct AdminApiResolver {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl AdminApiResolver {
    pub fn new(config: &AdminApi) -> GrayResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            GrayError::Configuration(format!("invalid admin base_url {}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GrayError::Configuration(format!(
                "admin base_url {} cannot carry a path",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout))
            .build()
            .map_err(|e| GrayError::Configuration(format!("admin http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn upstream_url(&self, upstream_id: &str) -> GrayResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GrayError::ConfigFetch("admin base_url cannot carry a path".into()))?
            .pop_if_empty()
            .push("upstreams")
            .push(upstream_id);
        Ok(url)
    }
}

#[async_trait]
impl UpstreamResolver for AdminApiResolver {
    async fn resolve(&self, upstream_id: &str) -> GrayResult<UpstreamDescriptor> {
        let url = self.upstream_url(upstream_id)?;
        log::debug!("Fetching upstream {upstream_id} from {url}");

        let resp = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| GrayError::ConfigFetch(format!("upstream {upstream_id}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GrayError::ConfigFetch(format!(
                "upstream {upstream_id}: config authority answered {status}"
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| GrayError::ConfigFetch(format!("upstream {upstream_id}: {e}")))?;

        parse_descriptor(&body)
    }
}

/// Parses `{"value": {"service_name": ..}}` or `{"value": {"nodes": [..]}}`.
///
/// `service_name` wins when both are present; of `nodes` only the first
/// entry is used.
pub fn parse_descriptor(body: &[u8]) -> GrayResult<UpstreamDescriptor> {
    let doc: JsonValue = serde_json::from_slice(body)
        .map_err(|e| GrayError::ConfigParse(format!("invalid json: {e}")))?;

    let value = doc
        .get("value")
        .filter(|v| v.is_object())
        .ok_or_else(|| GrayError::ConfigParse("missing `value` object".into()))?;

    if let Some(service_name) = value.get("service_name") {
        let service_name = service_name
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| GrayError::ConfigParse("`service_name` is not a string".into()))?;
        return Ok(UpstreamDescriptor::ServiceBacked {
            service_name: service_name.to_string(),
        });
    }

    if let Some(nodes) = value.get("nodes") {
        let node = nodes
            .as_array()
            .ok_or_else(|| GrayError::ConfigParse("`nodes` is not a list".into()))?
            .first()
            .ok_or_else(|| GrayError::ConfigParse("`nodes` is empty".into()))?;

        let host = node
            .get("host")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GrayError::ConfigParse("node without `host`".into()))?;
        let port = node
            .get("port")
            .and_then(scalar_to_string)
            .ok_or_else(|| GrayError::ConfigParse("node without `port`".into()))?;

        return Ok(UpstreamDescriptor::NodeBacked {
            host: host.to_string(),
            port,
        });
    }

    Err(GrayError::ConfigParse(
        "neither `service_name` nor `nodes` present".into(),
    ))
}

// The admin API may encode ports as numbers or strings.
fn scalar_to_string(v: &JsonValue) -> Option<String> {
    match v {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, StatusCode, Url};

use crate::config;
use crate::core::{GrayError, GrayResult};

/// Direct reachability check of a static node.
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn is_healthy(&self, host: &str, port: &str) -> GrayResult<bool>;
}

/// `GET http://{host}:{port}/`, healthy iff the node answers 200 in time.
pub struct HttpNodeProbe {
    client: Client,
}

impl HttpNodeProbe {
    pub fn new(config: &config::NodeProbe) -> GrayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout))
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| GrayError::Configuration(format!("node probe http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeProbe for HttpNodeProbe {
    async fn is_healthy(&self, host: &str, port: &str) -> GrayResult<bool> {
        let url = probe_url(host, port)?;

        match self.client.get(url.clone()).send().await {
            Ok(resp) => {
                let status = resp.status();
                log::debug!("Node probe {url} answered {status}");
                Ok(status == StatusCode::OK)
            }
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                log::debug!("Node probe {url} unreachable: {e}");
                Ok(false)
            }
            Err(e) => Err(GrayError::Probe(format!("{url}: {e}"))),
        }
    }
}

/// Builds the probe target, bracketing bare IPv6 hosts.
pub fn probe_url(host: &str, port: &str) -> GrayResult<Url> {
    let host = host.trim().trim_end_matches('/');
    let port = port.trim();
    if host.is_empty() || port.is_empty() {
        return Err(GrayError::Probe(format!("incomplete node address {host}:{port}")));
    }

    let base = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]")
    } else {
        format!("http://{host}")
    };

    Url::parse(&format!("{base}:{port}/"))
        .map_err(|e| GrayError::Probe(format!("invalid node address {host}:{port}: {e}")))
}

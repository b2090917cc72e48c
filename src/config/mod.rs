use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::{collections::HashMap, time::Duration};

use log::{debug, trace, LevelFilter};
use once_cell::sync::Lazy;
use pingora::server::configuration::{Opt, ServerConf};
use pingora_error::{Error, ErrorType::*, OrErr, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::{Validate, ValidationError};

static NODE_ADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:\d{1,3}\.){3}\d{1,3}|\[[0-9a-f:]+\]|[a-z0-9.-]+)(?::\d+)?$")
        .expect("node address pattern compiles")
});

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    pub pingora: ServerConf,

    #[validate(nested)]
    pub log: Option<Log>,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub listeners: Vec<Listener>,

    #[validate(nested)]
    pub gray: GrayConfig,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub routers: Vec<Router>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    // config file load entry point
    pub fn load_yaml_with_opt_override(opt: &Opt) -> Result<Self> {
        if let Some(path) = &opt.conf {
            let mut conf = Self::load_from_yaml(path)?;
            conf.merge_with_opt(opt);
            Ok(conf)
        } else {
            Error::e_explain(ReadError, "No path specified")
        }
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .or_err_with(FileReadError, || "Conf file valid failed")?;

        Ok(conf)
    }

    pub fn merge_with_opt(&mut self, opt: &Opt) {
        if opt.daemon {
            self.pingora.daemon = true;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    #[validate(length(min = 1))]
    pub path: String,
    #[serde(default = "Log::default_level")]
    #[validate(custom(function = "Log::validate_level"))]
    pub level: String,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }

    fn validate_level(level: &str) -> Result<(), ValidationError> {
        LevelFilter::from_str(level)
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid_log_level"))
    }

    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.level).unwrap_or(LevelFilter::Info)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Listener {
    pub address: SocketAddr,
}

/// Process-wide settings of the gray steering engine.
#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct GrayConfig {
    /// Overall budget for one decision, in milliseconds
    #[serde(default = "GrayConfig::default_deadline")]
    #[validate(range(min = 1))]
    pub deadline: u64,
    #[validate(nested)]
    pub admin: AdminApi,
    #[validate(nested)]
    pub registry: Registry,
    #[serde(default)]
    #[validate(nested)]
    pub node_probe: NodeProbe,
}

impl GrayConfig {
    fn default_deadline() -> u64 {
        5000
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline)
    }
}

/// The configuration authority serving upstream descriptors.
#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct AdminApi {
    #[validate(url)]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub api_key: String,
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1))]
    pub timeout: u64,
}

/// Nacos naming service connection.
#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct Registry {
    #[validate(length(min = 1))]
    pub server_addr: String,
    #[serde(default = "Registry::default_namespace")]
    pub namespace: String,
    #[serde(default = "Registry::default_group")]
    #[validate(length(min = 1))]
    pub group: String,
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1))]
    pub timeout: u64,
    /// Extra attempts on an unreachable registry
    #[serde(default)]
    #[validate(range(max = 1))]
    pub retries: u8,
    pub access_token: Option<String>,
}

impl Registry {
    fn default_namespace() -> String {
        "public".to_string()
    }

    fn default_group() -> String {
        "DEFAULT_GROUP".to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct NodeProbe {
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1))]
    pub timeout: u64,
}

impl Default for NodeProbe {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    2000
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Router::validate_uris"))]
pub struct Router {
    pub id: String,

    pub uri: Option<String>,
    #[serde(default)]
    pub uris: Vec<String>,

    #[serde(default)]
    pub plugins: HashMap<String, JsonValue>,

    /// Node serving regular traffic
    #[validate(custom(function = "Router::validate_node_addr"))]
    pub upstream: String,
    /// Node serving requests tagged `force-gray`
    #[validate(custom(function = "Router::validate_node_addr"))]
    pub gray_upstream: Option<String>,
}

impl Router {
    fn validate_uris(&self) -> Result<(), ValidationError> {
        if self.uri.is_none() && self.uris.is_empty() {
            return Err(ValidationError::new("uri_or_uris_required"));
        }
        Ok(())
    }

    fn validate_node_addr(addr: &str) -> Result<(), ValidationError> {
        if NODE_ADDR_RE.is_match(addr) {
            Ok(())
        } else {
            let mut err = ValidationError::new("invalid_node_addr");
            err.add_param("addr".into(), &addr.to_string());
            Err(err)
        }
    }

    pub fn get_uris(&self) -> Vec<String> {
        if let Some(uri) = &self.uri {
            vec![uri.to_string()]
        } else {
            self.uris.clone()
        }
    }
}

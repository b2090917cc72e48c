//! Request context management
//!
//! This module provides the ProxyContext that holds per-request state
//! and the routing variables plugins hand to the proxy core.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};

use super::plugin::ProxyPluginExecutor;
use crate::service::http::ProxyRoute;

/// Context that holds per-request state and metadata
pub struct ProxyContext {
    /// The matched route, if any
    pub route: Option<Arc<ProxyRoute>>,

    /// Parameters extracted from the route pattern
    pub route_params: Option<BTreeMap<String, String>>,

    /// Executor for route-specific plugins
    pub plugin: Arc<ProxyPluginExecutor>,

    pub request_start: Instant,

    /// Custom variables available to plugins (type-erased, thread-safe)
    vars: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Default for ProxyContext {
    fn default() -> Self {
        Self {
            route: None,
            route_params: None,
            plugin: Arc::new(ProxyPluginExecutor::default()),
            request_start: Instant::now(),
            vars: HashMap::new(),
        }
    }
}

impl ProxyContext {
    /// Store a typed value into the context
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.vars.insert(key.into(), Box::new(value));
    }

    /// Get a typed reference from the context
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.vars.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Get a string slice if the stored value is a `String`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get::<String>(key).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

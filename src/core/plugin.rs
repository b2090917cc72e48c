use std::sync::Arc;

use async_trait::async_trait;
use pingora_error::Result;
use pingora_proxy::Session;
use serde_json::Value as JsonValue;

use super::context::ProxyContext;

/// Factory signature every plugin module exposes.
pub type PluginCreateFn = fn(JsonValue) -> Result<Arc<dyn ProxyPlugin>>;

#[async_trait]
pub trait ProxyPlugin: Send + Sync {
    /// Return the name of this plugin
    fn name(&self) -> &str;

    /// Return the priority of this plugin, higher runs earlier
    fn priority(&self) -> i32;

    /// Request variables the host must capture into the context before
    /// this plugin runs.
    fn required_vars(&self) -> &[&'static str] {
        &[]
    }

    /// Whether the host must keep the request body available to this plugin.
    fn requires_body(&self) -> bool {
        false
    }

    /// Handle the incoming request.
    ///
    /// Like APISIX rewrite access phase.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if a response was sent and the proxy should exit
    /// * `Ok(false)` if the proxy should continue to the next phase
    async fn request_filter(
        &self,
        _session: &mut Session,
        _ctx: &mut ProxyContext,
    ) -> Result<bool> {
        Ok(false)
    }
}

/// Runs a route's plugins in priority order.
#[derive(Default)]
pub struct ProxyPluginExecutor {
    pub plugins: Vec<Arc<dyn ProxyPlugin>>,
}

impl ProxyPluginExecutor {
    pub fn new(mut plugins: Vec<Arc<dyn ProxyPlugin>>) -> Self {
        plugins.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        Self { plugins }
    }

    /// Union of the variables declared by all plugins, in first-seen order.
    pub fn required_vars(&self) -> Vec<&'static str> {
        let mut vars: Vec<&'static str> = Vec::new();
        for &var in self.plugins.iter().flat_map(|p| p.required_vars()) {
            if !vars.contains(&var) {
                vars.push(var);
            }
        }
        vars
    }

    pub fn requires_body(&self) -> bool {
        self.plugins.iter().any(|p| p.requires_body())
    }

    pub async fn request_filter(&self, session: &mut Session, ctx: &mut ProxyContext) -> Result<bool> {
        for plugin in self.plugins.iter() {
            if plugin.request_filter(session, ctx).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Declaring {
        name: &'static str,
        priority: i32,
        vars: &'static [&'static str],
        body: bool,
    }

    impl ProxyPlugin for Declaring {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn required_vars(&self) -> &[&'static str] {
            self.vars
        }

        fn requires_body(&self) -> bool {
            self.body
        }
    }

    #[test]
    fn test_executor_orders_by_priority_and_merges_declarations() {
        let executor = ProxyPluginExecutor::new(vec![
            Arc::new(Declaring {
                name: "low",
                priority: 10,
                vars: &["server_port"],
                body: false,
            }),
            Arc::new(Declaring {
                name: "high",
                priority: 2600,
                vars: &["remote_addr", "server_port"],
                body: true,
            }),
        ]);

        let names: Vec<&str> = executor.plugins.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["high", "low"]);
        assert_eq!(executor.required_vars(), vec!["remote_addr", "server_port"]);
        assert!(executor.requires_body());
    }

    #[test]
    fn test_empty_executor_declares_nothing() {
        let executor = ProxyPluginExecutor::default();
        assert!(executor.required_vars().is_empty());
        assert!(!executor.requires_body());
    }
}

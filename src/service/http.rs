use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use matchit::{InsertError, Router as MatchRouter};
use pingora::OkOrErr;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_error::{Error, ErrorType::*, OrErr, Result};
use pingora_proxy::{ProxyHttp, Session};

use crate::config::{self, Config};
use crate::core::{ProxyContext, ProxyPluginExecutor};
use crate::gray::mutator;
use crate::plugin::build_plugin;
use crate::utils::request;

/// A configured route with its plugin chain and resolved nodes.
pub struct ProxyRoute {
    pub inner: config::Router,
    upstream: SocketAddr,
    gray_upstream: Option<SocketAddr>,
    executor: Arc<ProxyPluginExecutor>,
}

impl ProxyRoute {
    pub fn new(router: config::Router) -> Result<Self> {
        let upstream = resolve_node(&router.upstream)?;
        let gray_upstream = router
            .gray_upstream
            .as_deref()
            .map(resolve_node)
            .transpose()?;

        let mut plugins = Vec::with_capacity(router.plugins.len());
        for (name, value) in router.plugins.iter() {
            let plugin = build_plugin(name, value.clone()).or_err_with(ReadError, || {
                format!("Failed to build plugin '{name}' for router '{}'", router.id)
            })?;
            plugins.push(plugin);
        }

        Ok(Self {
            inner: router,
            upstream,
            gray_upstream,
            executor: Arc::new(ProxyPluginExecutor::new(plugins)),
        })
    }

    /// The gray node when steered and one is configured, the regular node otherwise.
    pub fn select_node(&self, force_gray: bool) -> SocketAddr {
        match (force_gray, self.gray_upstream) {
            (true, Some(gray)) => gray,
            _ => self.upstream,
        }
    }

    pub fn executor(&self) -> Arc<ProxyPluginExecutor> {
        self.executor.clone()
    }
}

fn resolve_node(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .or_err_with(ReadError, || format!("Unable to resolve node {addr}"))?
        .next()
        .or_err_with(ReadError, || format!("Node {addr} resolved to no address"))
}

/// Proxy service.
///
/// Matches the request path to a route, runs its plugins, and forwards to
/// the route's regular or gray node.
#[derive(Default)]
pub struct HttpService {
    matcher: MatchRouter<Arc<ProxyRoute>>,
}

impl HttpService {
    pub fn insert_route(&mut self, route: ProxyRoute) -> Result<(), InsertError> {
        let route = Arc::new(route);
        for uri in route.inner.get_uris() {
            self.matcher.insert(uri, route.clone())?;
        }
        Ok(())
    }

    pub fn match_path(&self, path: &str) -> Option<(BTreeMap<String, String>, Arc<ProxyRoute>)> {
        let matched = self.matcher.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some((params, matched.value.clone()))
    }
}

#[async_trait]
impl ProxyHttp for HttpService {
    type CTX = ProxyContext;

    fn new_ctx(&self) -> Self::CTX {
        Self::CTX::default()
    }

    /// Match request to route before any downstream module runs.
    async fn early_request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<()> {
        if let Some((params, route)) = self.match_path(session.req_header().uri.path()) {
            ctx.route_params = Some(params);
            ctx.plugin = route.executor();
            ctx.route = Some(route);
        }
        Ok(())
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        if ctx.route.is_none() {
            session
                .respond_error(StatusCode::NOT_FOUND.as_u16())
                .await?;
            return Ok(true);
        }

        // honour plugin capability declarations before the chain runs
        let executor = ctx.plugin.clone();
        for var in executor.required_vars() {
            if let Some(value) = request::get_var(session, var) {
                ctx.set(var, value);
            }
        }
        if executor.requires_body() {
            session.enable_retry_buffering();
        }

        executor.request_filter(session, ctx).await
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let route = ctx
            .route
            .as_ref()
            .or_err(InternalError, "Upstream peer requested without a route")?;

        let node = route.select_node(mutator::is_force_gray(ctx));
        log::debug!("Router '{}' forwarding to {node}", route.inner.id);

        Ok(Box::new(HttpPeer::new(node, false, String::new())))
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        let Some(route) = ctx.route.as_ref() else {
            return;
        };
        let status = session
            .response_written()
            .map_or(0, |resp| resp.status.as_u16());

        match e {
            Some(e) => log::warn!(
                "Router '{}' {} failed after {}ms: {e}",
                route.inner.id,
                session.req_header().uri.path(),
                ctx.request_start.elapsed().as_millis()
            ),
            None => log::debug!(
                "Router '{}' {} {:?} -> {status} force-gray={} in {}ms",
                route.inner.id,
                session.req_header().uri.path(),
                ctx.route_params.clone().unwrap_or_default(),
                mutator::is_force_gray(ctx),
                ctx.request_start.elapsed().as_millis()
            ),
        }
    }
}

/// Initializes a proxy service from the given configuration.
pub fn build_http_service(config: &Config) -> Result<HttpService> {
    let mut http_service = HttpService::default();
    for router in config.routers.iter() {
        log::info!("Configuring Router: {}", router.id);
        let route = ProxyRoute::new(router.clone())?;
        http_service.insert_route(route).or_err_with(ReadError, || {
            format!("Invalid uri for router '{}'", router.id)
        })?;
    }

    Ok(http_service)
}

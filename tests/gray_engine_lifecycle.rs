mod common;

use pingsix_gray::config::Config;
use pingsix_gray::core::ProxyPlugin;
use pingsix_gray::gray::{gray_engine, init_gray_engine, shutdown_gray_engine};
use pingsix_gray::plugin::build_plugin;
use pingsix_gray::service::http::build_http_service;
use serde_json::json;

use common::*;

// Single test: the engine is process-wide state.
#[tokio::test]
async fn test_engine_lifecycle() {
    init_log();
    let admin = start_stub(Reply::Respond(200, service_upstream("orders"))).await;
    let registry = start_stub(Reply::Respond(
        200,
        instance_list(&[("10.0.0.2", true, Some("canary"))]),
    ))
    .await;

    assert!(gray_engine().is_none());
    assert!(build_plugin("gray", json!({"upstream_id": "1"})).is_err());

    let config = gray_config(&admin.base_url(), &registry.addr.to_string());
    let engine = init_gray_engine(&config).unwrap();
    assert!(gray_engine().is_some());

    let plugin = build_plugin("gray", json!({"upstream_id": "1"})).unwrap();
    assert_eq!("gray", plugin.name());
    assert_eq!(2600, plugin.priority());

    let yaml = format!(
        r#"
listeners:
  - address: 127.0.0.1:9080
gray:
  admin:
    base_url: {}/apisix/admin
    api_key: {API_KEY}
  registry:
    server_addr: {}
routers:
  - id: "orders"
    uri: /orders/{{id}}
    upstream: 127.0.0.1:1980
    gray_upstream: 127.0.0.1:1981
    plugins:
      gray:
        upstream_id: "1"
"#,
        admin.base_url(),
        registry.addr
    );
    let full = Config::from_yaml(&yaml).unwrap();
    let service = build_http_service(&full).unwrap();
    let (_, route) = service.match_path("/orders/7").unwrap();
    assert_eq!(vec!["remote_addr", "server_port"], route.executor().required_vars());
    assert!(route.executor().requires_body());

    // plugins built before shutdown keep their engine
    assert!(engine.decide(Some("canary"), "1").await.force_gray);

    shutdown_gray_engine();
    assert!(gray_engine().is_none());
    assert!(build_plugin("gray", json!({"upstream_id": "1"})).is_err());
    assert!(engine.decide(Some("canary"), "1").await.force_gray);
}

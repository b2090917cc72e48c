use pingora_core::server::configuration::Opt;
use pingora_core::server::Server;
use pingora_core::services::background::background_service;
use pingora_proxy::http_proxy_service_with_name;

use pingsix_gray::config::Config;
use pingsix_gray::gray::{init_gray_engine, GrayEngineLifecycle};
use pingsix_gray::logging::Logger;
use pingsix_gray::service::http::build_http_service;

fn main() {
    // Read command-line arguments
    let opt = Opt::parse_args();

    // Load configuration with optional override
    let config = Config::load_yaml_with_opt_override(&opt).expect("Failed to load configuration");

    // Initialize logging
    let logger = config.log.clone().map(Logger::new);
    match &logger {
        Some(logger) => logger.init_env_logger(),
        None => env_logger::init(),
    }

    // The engine must exist before plugins are built
    log::info!("Initializing gray engine...");
    init_gray_engine(&config.gray).expect("Failed to initialize gray engine");

    log::info!("Loading routers...");
    let http_service = build_http_service(&config).expect("Failed to initialize proxy service");

    let mut server = Server::new_with_opt_and_conf(Some(opt), config.pingora);

    let mut http_service =
        http_proxy_service_with_name(&server.configuration, http_service, "pingsix-gray");

    log::info!("Adding listeners...");
    for listener in config.listeners.iter() {
        http_service.add_tcp(&listener.address.to_string());
    }

    log::info!("Bootstrapping...");
    server.bootstrap();

    log::info!("Bootstrapped. Adding Services...");
    server.add_service(http_service);
    server.add_service(background_service("gray engine", GrayEngineLifecycle));
    if let Some(logger) = logger {
        server.add_service(logger);
    }

    log::info!("Starting Server...");
    server.run_forever();
}

//! Core abstractions shared by the gray engine, plugins and the host service.

pub mod context;
pub mod error;
pub mod plugin;

pub use context::ProxyContext;
pub use error::{GrayError, GrayResult};
pub use plugin::{PluginCreateFn, ProxyPlugin, ProxyPluginExecutor};

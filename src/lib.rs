//! PingSIX gray steering.
//!
//! A Pingora gateway plugin deciding per request whether traffic goes to the
//! gray (canary) variant of its upstream, plus the minimal host to run it.

pub mod config;
pub mod core;
pub mod gray;
pub mod logging;
pub mod plugin;
pub mod service;
pub(crate) mod utils;

// Library exports for civitai-link-bridge
// The `civlink` binary and the integration tests build on these modules

pub mod bootstrap;
pub mod companion;
pub mod config;
pub mod controller;
pub mod decorate;
pub mod dom;
pub mod error;
pub mod host;
pub mod injector;
pub mod status;
pub mod timer;
pub mod waiter;

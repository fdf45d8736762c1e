//! # snoopd-interceptor
//!
//! Loads `.rhai` plugin files from the interceptors directory and dispatches
//! inbound requests through them under match/handler timeouts with failure
//! isolation (spec §4.4).

mod capability;
mod plugin;
mod runtime;

pub use capability::{CaptureClient, Forwarder, PluginRequest, PluginResponse};
pub use runtime::{DispatchOutcome, EmittedEvent, InterceptorRuntime};

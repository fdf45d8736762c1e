use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rhai::{Dynamic, Engine, Scope, AST};
use snoopd_common::model::EventType;
use snoopd_common::{Result, SnoopdError};
use tracing::warn;

use crate::capability::{CaptureClient, Forwarder, PluginRequest, PluginResponse};
use crate::plugin::{self, Plugin};

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// No interceptor matched, or none are loaded.
    Passthrough,
    /// A handler ran to completion without producing a response.
    Observed(String),
    /// A handler produced a response without calling `forward()`.
    Mocked(String, PluginResponse),
    /// A handler produced a response after calling `forward()`.
    Modified(String, PluginResponse),
}

#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub event_type: EventType,
    pub interceptor: Option<String>,
    pub message: String,
    pub error: Option<String>,
}

fn event(event_type: EventType, interceptor: Option<&str>, message: impl Into<String>) -> EmittedEvent {
    EmittedEvent { event_type, interceptor: interceptor.map(str::to_string), message: message.into(), error: None }
}

fn error_event(event_type: EventType, interceptor: Option<&str>, message: impl Into<String>, error: String) -> EmittedEvent {
    EmittedEvent {
        event_type,
        interceptor: interceptor.map(str::to_string),
        message: message.into(),
        error: Some(error),
    }
}

/// Per-dispatch capability object bound into the script's `ctx` parameter.
/// Interior state is `Arc<Mutex<_>>` so clones made by the script engine
/// still observe the same forward/log state.
#[derive(Clone)]
struct DispatchCtx {
    request: PluginRequest,
    forwarder: Arc<dyn Forwarder>,
    capture: Arc<dyn CaptureClient>,
    state: Arc<Mutex<CtxState>>,
}

#[derive(Default)]
struct CtxState {
    forwarded_once: bool,
    cached: Option<PluginResponse>,
    forward_after_complete: bool,
    logs: Vec<String>,
}

impl DispatchCtx {
    fn log(&mut self, msg: &str) {
        self.state.lock().logs.push(msg.to_string());
    }

    fn forward(&mut self) -> std::result::Result<Dynamic, Box<rhai::EvalAltResult>> {
        let already = {
            let mut state = self.state.lock();
            if state.forwarded_once {
                state.forward_after_complete = true;
            }
            state.forwarded_once
        };

        let response = if already {
            self.state.lock().cached.clone().unwrap_or_default()
        } else {
            self.state.lock().forwarded_once = true;
            let response = self
                .forwarder
                .forward(&self.request)
                .map_err(|e| e.to_string())?;
            self.state.lock().cached = Some(response.clone());
            response
        };

        rhai::serde::to_dynamic(&response).map_err(|e| e.to_string().into())
    }

    fn store_count(&mut self, filter: rhai::Map) -> std::result::Result<i64, Box<rhai::EvalAltResult>> {
        let filter: snoopd_common::model::RequestFilter =
            rhai::serde::from_dynamic(&Dynamic::from(filter))?;
        self.capture.count(filter).map(|n| n as i64).map_err(|e| e.to_string().into())
    }

    fn store_list(
        &mut self,
        filter: rhai::Map,
        limit: i64,
        offset: i64,
    ) -> std::result::Result<Dynamic, Box<rhai::EvalAltResult>> {
        let filter: snoopd_common::model::RequestFilter =
            rhai::serde::from_dynamic(&Dynamic::from(filter))?;
        let rows = self
            .capture
            .list_summaries(filter, limit.max(0) as usize, offset.max(0) as usize)
            .map_err(|e| e.to_string())?;
        rhai::serde::to_dynamic(&rows).map_err(|e| e.to_string().into())
    }
}

pub struct InterceptorRuntime {
    engine: Arc<Engine>,
    plugins: Arc<RwLock<Vec<Arc<Plugin>>>>,
    dir: PathBuf,
    match_timeout: Duration,
    handler_timeout: Duration,
}

impl InterceptorRuntime {
    pub fn new(dir: PathBuf, match_timeout_ms: u64, handler_timeout_ms: u64) -> Result<Self> {
        let engine = Arc::new(build_engine());
        let plugins = load(&engine, &dir)?;
        Ok(Self {
            engine,
            plugins: Arc::new(RwLock::new(plugins)),
            dir,
            match_timeout: Duration::from_millis(match_timeout_ms),
            handler_timeout: Duration::from_millis(handler_timeout_ms),
        })
    }

    /// Re-reads the interceptors directory and atomically swaps in the new
    /// plugin set. Returns the load-time events for each plugin.
    pub fn reload(&self) -> Result<Vec<EmittedEvent>> {
        let plugins = load(&self.engine, &self.dir)?;
        let events = plugins
            .iter()
            .map(|p| {
                if let Some(err) = &p.load_error {
                    error_event(EventType::LoadError, Some(&p.name), "failed to load interceptor", err.clone())
                } else {
                    event(EventType::Loaded, Some(&p.name), "loaded interceptor")
                }
            })
            .chain(std::iter::once(event(EventType::Reload, None, "reloaded interceptor set")))
            .collect();
        *self.plugins.write() = plugins;
        Ok(events)
    }

    pub fn list(&self) -> Vec<(String, PathBuf, bool, Option<String>)> {
        self.plugins
            .read()
            .iter()
            .map(|p| (p.name.clone(), p.source_path.clone(), p.has_match, p.load_error.clone()))
            .collect()
    }

    pub async fn dispatch(
        &self,
        request: PluginRequest,
        forwarder: Arc<dyn Forwarder>,
        capture: Arc<dyn CaptureClient>,
    ) -> (DispatchOutcome, Vec<EmittedEvent>) {
        let mut events = Vec::new();
        let plugins: Vec<Arc<Plugin>> = self.plugins.read().clone();

        for plugin in plugins {
            if plugin.load_error.is_some() {
                continue;
            }
            let Some(ast) = plugin.ast.clone() else { continue };

            if plugin.has_match {
                match run_timed(self.match_timeout, {
                    let engine = self.engine.clone();
                    let ast = ast.clone();
                    let request = request.clone();
                    move || run_match(&engine, &ast, &request)
                })
                .await
                {
                    TimedResult::Ok(Ok(true)) => {}
                    TimedResult::Ok(Ok(false)) => continue,
                    TimedResult::Ok(Err(e)) => {
                        events.push(error_event(EventType::MatchError, Some(&plugin.name), "match predicate failed", e));
                        continue;
                    }
                    TimedResult::TimedOut => {
                        events.push(event(EventType::MatchTimeout, Some(&plugin.name), "match predicate timed out"));
                        continue;
                    }
                }
            }

            events.push(event(EventType::Matched, Some(&plugin.name), "interceptor matched"));

            let ctx = DispatchCtx {
                request: request.clone(),
                forwarder: forwarder.clone(),
                capture: capture.clone(),
                state: Arc::new(Mutex::new(CtxState::default())),
            };
            let ctx_state = ctx.state.clone();

            let outcome = run_timed(self.handler_timeout, {
                let engine = self.engine.clone();
                let ast = ast.clone();
                let request = request.clone();
                move || run_handle(&engine, &ast, &request, ctx)
            })
            .await;

            let state = ctx_state.lock();
            for log_line in &state.logs {
                events.push(event(EventType::UserLog, Some(&plugin.name), log_line.clone()));
            }
            if state.forward_after_complete {
                events.push(event(
                    EventType::ForwardAfterComplete,
                    Some(&plugin.name),
                    "forward() called more than once",
                ));
            }
            let forwarded_once = state.forwarded_once;
            drop(state);

            match outcome {
                TimedResult::Ok(Ok(None)) => {
                    events.push(event(EventType::Observed, Some(&plugin.name), "interceptor observed request"));
                    return (DispatchOutcome::Observed(plugin.name.clone()), events);
                }
                TimedResult::Ok(Ok(Some(response))) => {
                    if forwarded_once {
                        events.push(event(EventType::Modified, Some(&plugin.name), "interceptor modified response"));
                        return (DispatchOutcome::Modified(plugin.name.clone(), response), events);
                    }
                    events.push(event(EventType::Mocked, Some(&plugin.name), "interceptor mocked response"));
                    return (DispatchOutcome::Mocked(plugin.name.clone(), response), events);
                }
                TimedResult::Ok(Err(e)) => {
                    events.push(error_event(EventType::HandlerError, Some(&plugin.name), "handler failed", e));
                    return (
                        DispatchOutcome::Mocked(plugin.name.clone(), synthetic_response(500)),
                        events,
                    );
                }
                TimedResult::TimedOut => {
                    events.push(event(EventType::HandlerTimeout, Some(&plugin.name), "handler timed out"));
                    return (
                        DispatchOutcome::Mocked(plugin.name.clone(), synthetic_response(504)),
                        events,
                    );
                }
            }
        }

        (DispatchOutcome::Passthrough, events)
    }
}

fn synthetic_response(status: u16) -> PluginResponse {
    PluginResponse { status, headers: Default::default(), body_base64: None }
}

enum TimedResult<T> {
    Ok(T),
    TimedOut,
}

async fn run_timed<F, T>(timeout: Duration, f: F) -> TimedResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => TimedResult::Ok(value),
        Ok(Err(join_err)) => {
            warn!(error = %join_err, "interceptor task panicked");
            TimedResult::TimedOut
        }
        Err(_elapsed) => TimedResult::TimedOut,
    }
}

fn run_match(engine: &Engine, ast: &AST, request: &PluginRequest) -> std::result::Result<bool, String> {
    let mut scope = Scope::new();
    let req_dynamic = rhai::serde::to_dynamic(request).map_err(|e| e.to_string())?;
    engine
        .call_fn::<bool>(&mut scope, ast, "match_request", (req_dynamic,))
        .map_err(|e| e.to_string())
}

fn run_handle(
    engine: &Engine,
    ast: &AST,
    request: &PluginRequest,
    ctx: DispatchCtx,
) -> std::result::Result<Option<PluginResponse>, String> {
    let mut scope = Scope::new();
    let req_dynamic = rhai::serde::to_dynamic(request).map_err(|e| e.to_string())?;
    let result: Dynamic = engine
        .call_fn(&mut scope, ast, "handle_request", (req_dynamic, ctx))
        .map_err(|e| e.to_string())?;

    if result.is_unit() {
        return Ok(None);
    }
    rhai::serde::from_dynamic::<PluginResponse>(&result).map(Some).map_err(|e| e.to_string())
}

fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);
    engine
        .register_type_with_name::<DispatchCtx>("Ctx")
        .register_fn("log", DispatchCtx::log)
        .register_fn("forward", DispatchCtx::forward)
        .register_fn("store_count", DispatchCtx::store_count)
        .register_fn("store_list", DispatchCtx::store_list);
    engine
}

fn load(engine: &Engine, dir: &PathBuf) -> Result<Vec<Arc<Plugin>>> {
    let loaded = plugin::load_dir(engine, dir)
        .map_err(|e| SnoopdError::InterceptorLoad(format!("failed to read {}: {e}", dir.display())))?;
    Ok(loaded.into_iter().map(Arc::new).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snoopd_common::model::{BodyTarget, RequestFilter, RequestSummary};
    use tempfile::tempdir;

    struct StubForwarder;
    impl Forwarder for StubForwarder {
        fn forward(&self, _request: &PluginRequest) -> Result<PluginResponse> {
            Ok(PluginResponse { status: 200, headers: Default::default(), body_base64: None })
        }
    }

    struct StubCapture;
    impl CaptureClient for StubCapture {
        fn count(&self, _filter: RequestFilter) -> Result<u64> {
            Ok(0)
        }
        fn list_summaries(&self, _filter: RequestFilter, _limit: usize, _offset: usize) -> Result<Vec<RequestSummary>> {
            Ok(Vec::new())
        }
        fn search_bodies(
            &self,
            _query: String,
            _target: BodyTarget,
            _filter: RequestFilter,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<RequestSummary>> {
            Ok(Vec::new())
        }
    }

    fn sample_request() -> PluginRequest {
        PluginRequest {
            id: "r1".to_string(),
            method: "GET".to_string(),
            url: "https://example.com/a".to_string(),
            host: "example.com".to_string(),
            path: "/a".to_string(),
            headers: Default::default(),
            body_base64: None,
        }
    }

    #[tokio::test]
    async fn passthrough_with_no_plugins() {
        let dir = tempdir().unwrap();
        let runtime = InterceptorRuntime::new(dir.path().to_path_buf(), 250, 30_000).unwrap();
        let (outcome, events) = runtime.dispatch(sample_request(), Arc::new(StubForwarder), Arc::new(StubCapture)).await;
        assert!(matches!(outcome, DispatchOutcome::Passthrough));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn mocked_when_handler_returns_without_forwarding() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("mock.rhai"),
            r#"
            fn match_request(req) { req.path == "/a" }
            fn handle_request(req, ctx) {
                ctx.log("mocking");
                #{ status: 200, headers: #{}, body_base64: () }
            }
            "#,
        )
        .unwrap();
        let runtime = InterceptorRuntime::new(dir.path().to_path_buf(), 250, 30_000).unwrap();
        let (outcome, events) = runtime.dispatch(sample_request(), Arc::new(StubForwarder), Arc::new(StubCapture)).await;
        match outcome {
            DispatchOutcome::Mocked(name, response) => {
                assert_eq!(name, "mock");
                assert_eq!(response.status, 200);
            }
            other => panic!("expected Mocked, got {other:?}"),
        }
        assert!(events.iter().any(|e| matches!(e.event_type, EventType::UserLog)));
    }

    #[tokio::test]
    async fn modified_when_handler_forwards_then_rewrites() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("rewrite.rhai"),
            r#"
            fn handle_request(req, ctx) {
                let resp = ctx.forward();
                resp.status = 201;
                resp
            }
            "#,
        )
        .unwrap();
        let runtime = InterceptorRuntime::new(dir.path().to_path_buf(), 250, 30_000).unwrap();
        let (outcome, _events) = runtime.dispatch(sample_request(), Arc::new(StubForwarder), Arc::new(StubCapture)).await;
        match outcome {
            DispatchOutcome::Modified(_, response) => assert_eq!(response.status, 201),
            other => panic!("expected Modified, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn observed_when_handler_does_nothing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("observe.rhai"), "fn handle_request(req, ctx) { () }\n").unwrap();
        let runtime = InterceptorRuntime::new(dir.path().to_path_buf(), 250, 30_000).unwrap();
        let (outcome, _events) = runtime.dispatch(sample_request(), Arc::new(StubForwarder), Arc::new(StubCapture)).await;
        assert!(matches!(outcome, DispatchOutcome::Observed(_)));
    }

    #[tokio::test]
    async fn handler_timeout_synthesizes_504() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("slow.rhai"),
            "fn handle_request(req, ctx) { let x = 0; while true { x += 1; } }\n",
        )
        .unwrap();
        let runtime = InterceptorRuntime::new(dir.path().to_path_buf(), 250, 100).unwrap();
        let (outcome, events) = runtime.dispatch(sample_request(), Arc::new(StubForwarder), Arc::new(StubCapture)).await;
        match outcome {
            DispatchOutcome::Mocked(_, response) => assert_eq!(response.status, 504),
            other => panic!("expected synthesized 504, got {other:?}"),
        }
        assert!(events.iter().any(|e| matches!(e.event_type, EventType::HandlerTimeout)));
    }

    #[tokio::test]
    async fn reload_swaps_plugin_set() {
        let dir = tempdir().unwrap();
        let runtime = InterceptorRuntime::new(dir.path().to_path_buf(), 250, 30_000).unwrap();
        assert!(runtime.list().is_empty());
        std::fs::write(dir.path().join("new.rhai"), "fn handle_request(req, ctx) { () }\n").unwrap();
        runtime.reload().unwrap();
        assert_eq!(runtime.list().len(), 1);
    }
}

//! Probe script sandbox.
//!
//! # Responsibilities
//! - Compile the rules script and run it in a restricted Rhai engine
//! - Expose exactly the host calls `define`, `ping`, `commit`, `next` and `log`
//! - Expose endpoints to the script through the narrow `EndpointHandle` view
//!
//! # Design Decisions
//! - The engine has no file, network or process access; `eval` is disabled
//! - Scripts run on a blocking thread; `ping` blocks that thread on the runtime
//!   handle while the probes themselves run concurrently on the runtime
//! - Writing a read-only handle field is a script error naming the outbound URL

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, AST, FLOAT, INT};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::health::probe::{ProbeOptions, Prober};
use crate::health::scheduler::ProbeCommand;
use crate::load_balancer::endpoint::{Endpoint, EndpointConfig, Status, WafPolicy};
use crate::load_balancer::pool::{PortRequest, SharedEndpoints};
use crate::observability::logging;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Errors loading or running the rules script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read rules {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to compile rules: {0}")]
    Compile(String),

    #[error("{0}")]
    Runtime(String),
}

/// Everything the host calls need to reach.
#[derive(Clone)]
pub struct ScriptContext {
    pub endpoints: SharedEndpoints,
    pub prober: Prober,
    pub commands: mpsc::UnboundedSender<ProbeCommand>,
    pub ports: mpsc::UnboundedSender<PortRequest>,
    pub runtime: Handle,
    pub default_timeout_ms: u64,
    bags: Arc<DashMap<Uuid, Map>>,
}

impl ScriptContext {
    pub fn new(
        endpoints: SharedEndpoints,
        commands: mpsc::UnboundedSender<ProbeCommand>,
        ports: mpsc::UnboundedSender<PortRequest>,
        runtime: Handle,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            endpoints,
            prober: Prober::new(),
            commands,
            ports,
            runtime,
            default_timeout_ms,
            bags: Arc::new(DashMap::new()),
        }
    }

    fn handle(&self, id: Uuid) -> EndpointHandle {
        EndpointHandle {
            id,
            endpoints: self.endpoints.clone(),
            bags: self.bags.clone(),
        }
    }

    fn define(&self, mut config: Map) -> Dynamic {
        if let Some(weight) = config.get_mut("weight") {
            if let Ok(n) = weight.as_int() {
                *weight = Dynamic::from_float(n as FLOAT);
            }
        }
        let config: EndpointConfig = match rhai::serde::from_dynamic(&Dynamic::from_map(config)) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "endpoint declaration was skipped");
                return Dynamic::UNIT;
            }
        };

        let defined = self.endpoints.write().define(&config);
        match defined {
            Ok(definition) => {
                if let Some(request) = definition.new_port {
                    if self.ports.send(request).is_err() {
                        tracing::warn!(port = request.port, "no listener manager to open port");
                    }
                }
                Dynamic::from(self.handle(definition.id))
            }
            Err(e) => {
                tracing::error!(error = %e, "endpoint declaration was skipped");
                Dynamic::UNIT
            }
        }
    }

    fn ping(&self, handles: Vec<EndpointHandle>, options: Map) -> ScriptResult<()> {
        let timeout_ms = match options.get("timeout") {
            None => self.default_timeout_ms,
            Some(value) => match value.as_int() {
                Ok(ms) if ms > 0 => ms as u64,
                _ => return Err("ping: \"timeout\" must be a positive integer (ms)".into()),
            },
        };
        let options = ProbeOptions {
            timeout_ms: Some(timeout_ms),
        };
        let ids: Vec<Uuid> = handles.iter().map(|h| h.id).collect();
        self.runtime
            .block_on(self.prober.ping_all(&self.endpoints, &ids, &options));
        Ok(())
    }

    fn next(&self, ms: INT) {
        let delay = Duration::from_millis(ms.max(0) as u64);
        let _ = self.commands.send(ProbeCommand::Next(delay));
    }
}

fn handles_from_array(items: Array) -> Vec<EndpointHandle> {
    items
        .into_iter()
        .filter_map(|item| item.try_cast::<EndpointHandle>())
        .collect()
}

/// Script-visible view of an endpoint.
#[derive(Clone)]
pub struct EndpointHandle {
    id: Uuid,
    endpoints: SharedEndpoints,
    bags: Arc<DashMap<Uuid, Map>>,
}

impl EndpointHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn read<T>(&self, f: impl FnOnce(&Endpoint) -> T) -> Option<T> {
        self.endpoints.read().get(self.id).map(f)
    }

    fn outbound(&self) -> String {
        self.read(|ep| ep.outbound.href().to_string()).unwrap_or_default()
    }

    fn read_only(&self, field: &str) -> ScriptResult<()> {
        Err(format!(
            "ENDPOINT \"{}\": setting the {} is not supported.",
            self.outbound(),
            field
        )
        .into())
    }

    fn inbound(&self) -> String {
        self.read(|ep| ep.inbound.as_ref().map(|r| r.href().to_string()).unwrap_or_default())
            .unwrap_or_default()
    }

    fn method(&self) -> String {
        self.read(|ep| ep.method.clone()).unwrap_or_default()
    }

    fn set_method(&mut self, value: ImmutableString) {
        if let Some(ep) = self.endpoints.write().get_mut(self.id) {
            ep.method = value.to_ascii_uppercase();
        }
    }

    fn status(&self) -> String {
        self.read(|ep| ep.status().to_string()).unwrap_or_default()
    }

    fn set_status(&mut self, value: ImmutableString) -> ScriptResult<()> {
        let status = parse_status(&self.outbound(), &value)?;
        self.endpoints.write().set_status(self.id, status);
        Ok(())
    }

    fn actual(&self) -> String {
        self.read(|ep| ep.actual.to_string()).unwrap_or_default()
    }

    fn set_actual(&mut self, value: ImmutableString) -> ScriptResult<()> {
        let status = parse_status(&self.outbound(), &value)?;
        if let Some(ep) = self.endpoints.write().get_mut(self.id) {
            ep.actual = status;
        }
        Ok(())
    }

    fn weight(&self) -> FLOAT {
        self.read(|ep| ep.weight).unwrap_or(1.0)
    }

    fn set_weight(&mut self, value: FLOAT) {
        if let Some(ep) = self.endpoints.write().get_mut(self.id) {
            ep.weight = value;
        }
    }

    fn waf(&self) -> String {
        self.read(|ep| ep.waf.as_str().to_string()).unwrap_or_default()
    }

    fn set_waf(&mut self, value: ImmutableString) -> ScriptResult<()> {
        let policy: WafPolicy = value
            .parse()
            .map_err(|e: String| format!("ENDPOINT \"{}\": {}.", self.outbound(), e))?;
        if let Some(ep) = self.endpoints.write().get_mut(self.id) {
            ep.waf = policy;
        }
        Ok(())
    }

    fn code(&self) -> INT {
        self.read(|ep| ep.code.unwrap_or(0) as INT).unwrap_or(0)
    }

    fn body(&self) -> String {
        self.read(|ep| ep.body.clone().unwrap_or_default())
            .unwrap_or_default()
    }

    fn bag(&self) -> Map {
        self.bags.get(&self.id).map(|b| b.clone()).unwrap_or_default()
    }

    fn set_bag(&mut self, value: Map) {
        self.bags.insert(self.id, value);
    }
}

fn parse_status(outbound: &str, value: &str) -> ScriptResult<Status> {
    value
        .parse::<Status>()
        .map_err(|e| format!("ENDPOINT \"{}\": {}.", outbound, e).into())
}

fn register_handle(engine: &mut Engine) {
    engine.register_type_with_name::<EndpointHandle>("Endpoint");

    engine.register_get("id", |h: &mut EndpointHandle| h.id.to_string());
    engine.register_set("id", |h: &mut EndpointHandle, _: Dynamic| h.read_only("id"));

    engine.register_get("method", |h: &mut EndpointHandle| h.method());
    engine.register_set("method", EndpointHandle::set_method);

    for name in ["in", "inbound"] {
        engine.register_get(name, |h: &mut EndpointHandle| h.inbound());
        engine.register_set(name, |h: &mut EndpointHandle, _: Dynamic| h.read_only("in"));
    }
    for name in ["out", "outbound"] {
        engine.register_get(name, |h: &mut EndpointHandle| h.outbound());
        engine.register_set(name, |h: &mut EndpointHandle, _: Dynamic| h.read_only("out"));
    }

    engine.register_get("status", |h: &mut EndpointHandle| h.status());
    engine.register_set("status", EndpointHandle::set_status);

    engine.register_get("actual", |h: &mut EndpointHandle| h.actual());
    engine.register_set("actual", EndpointHandle::set_actual);

    engine.register_get("weight", |h: &mut EndpointHandle| h.weight());
    engine.register_set("weight", EndpointHandle::set_weight);
    engine.register_set("weight", |h: &mut EndpointHandle, value: INT| h.set_weight(value as FLOAT));

    engine.register_get("waf", |h: &mut EndpointHandle| h.waf());
    engine.register_set("waf", EndpointHandle::set_waf);

    engine.register_get("code", |h: &mut EndpointHandle| h.code());
    engine.register_set("code", |h: &mut EndpointHandle, _: Dynamic| h.read_only("code"));

    engine.register_get("body", |h: &mut EndpointHandle| h.body());
    engine.register_set("body", |h: &mut EndpointHandle, _: Dynamic| h.read_only("body"));

    engine.register_get("bag", |h: &mut EndpointHandle| h.bag());
    engine.register_set("bag", EndpointHandle::set_bag);

    engine.register_fn("to_string", |h: &mut EndpointHandle| {
        format!("{} ({})", h.id, h.outbound())
    });
}

fn register_host_calls(engine: &mut Engine, ctx: &ScriptContext) {
    let c = ctx.clone();
    engine.register_fn("define", move |config: Map| c.define(config));

    let c = ctx.clone();
    engine.register_fn("ping", move |h: EndpointHandle| c.ping(vec![h], Map::new()));
    let c = ctx.clone();
    engine.register_fn("ping", move |h: EndpointHandle, options: Map| c.ping(vec![h], options));
    let c = ctx.clone();
    engine.register_fn("ping", move |items: Array| c.ping(handles_from_array(items), Map::new()));
    let c = ctx.clone();
    engine.register_fn("ping", move |items: Array, options: Map| {
        c.ping(handles_from_array(items), options)
    });

    let c = ctx.clone();
    engine.register_fn("commit", move || c.endpoints.write().commit());

    let c = ctx.clone();
    engine.register_fn("next", move |ms: INT| c.next(ms));

    engine.register_fn("log", |message: ImmutableString| logging::script_log("info", &message));
    engine.register_fn("log", |level: ImmutableString, message: ImmutableString| {
        logging::script_log(&level, &message)
    });
}

/// A compiled rules script plus the sandboxed engine that runs it.
pub struct ProbeScript {
    engine: Engine,
    ast: ArcSwapOption<AST>,
}

impl ProbeScript {
    pub fn new(ctx: &ScriptContext, max_operations: u64) -> Self {
        let mut engine = Engine::new();
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.set_max_operations(max_operations);
        engine.on_print(|text| logging::script_log("info", text));
        engine.on_debug(|text, _, pos| {
            tracing::debug!(target: logging::SCRIPT_TARGET, position = %pos, "{}", text)
        });
        register_handle(&mut engine);
        register_host_calls(&mut engine, ctx);

        Self {
            engine,
            ast: ArcSwapOption::empty(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.ast.load().is_some()
    }

    /// Compile script source. A failed compile leaves the previous script in place.
    pub fn compile(&self, source: &str) -> Result<(), ScriptError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;
        self.ast.store(Some(Arc::new(ast)));
        Ok(())
    }

    /// Read and compile the script at `path`.
    pub fn load(&self, path: &Path) -> Result<(), ScriptError> {
        let source = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.compile(&source)
    }

    /// Run the loaded script once. Blocks the calling thread.
    pub fn run(&self) -> Result<(), ScriptError> {
        let Some(ast) = self.ast.load_full() else {
            return Ok(());
        };
        self.engine
            .run_ast(&ast)
            .map_err(|e| ScriptError::Runtime(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::pool::Endpoints;

    struct Harness {
        script: Arc<ProbeScript>,
        endpoints: SharedEndpoints,
        commands: mpsc::UnboundedReceiver<ProbeCommand>,
        ports: mpsc::UnboundedReceiver<PortRequest>,
    }

    fn harness() -> Harness {
        let endpoints = Endpoints::new().shared();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (ports_tx, ports) = mpsc::unbounded_channel();
        let ctx = ScriptContext::new(endpoints.clone(), commands_tx, ports_tx, Handle::current(), 1_000);
        Harness {
            script: Arc::new(ProbeScript::new(&ctx, 0)),
            endpoints,
            commands,
            ports,
        }
    }

    async fn run(script: &Arc<ProbeScript>, source: &str) -> Result<(), ScriptError> {
        script.compile(source)?;
        let script = script.clone();
        tokio::task::spawn_blocking(move || script.run()).await.unwrap()
    }

    #[tokio::test]
    async fn define_is_idempotent_and_opens_ports() {
        let mut h = harness();
        run(
            &h.script,
            r#"
            let a = define(#{ "in": "http://*:18080", out: "http://127.0.0.1:9", weight: 0.5 });
            let b = define(#{ "in": "http://*:18080", out: "http://127.0.0.1:9", weight: 0.5 });
            if a.id != b.id { throw "not idempotent"; }
            if a.weight != 0.5 { throw "weight"; }
            "#,
        )
        .await
        .unwrap();

        assert_eq!(h.endpoints.read().len(), 1);
        let request = h.ports.try_recv().unwrap();
        assert_eq!(request.port, 18080);
        assert!(h.ports.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_declaration_returns_unit() {
        let h = harness();
        run(
            &h.script,
            r#"
            let missing = define(#{ "in": "http://host/" });
            if type_of(missing) != "()" { throw "expected ()"; }
            let bad = define(#{ out: "not a url" });
            if type_of(bad) != "()" { throw "expected ()"; }
            let tls = define(#{ out: "https://secure-backend" });
            if type_of(tls) != "()" { throw "expected ()"; }
            "#,
        )
        .await
        .unwrap();
        assert!(h.endpoints.read().is_empty());
    }

    #[tokio::test]
    async fn read_only_fields_raise_errors() {
        let h = harness();
        let err = run(
            &h.script,
            r#"
            let ep = define(#{ out: "http://backend1:8100" });
            ep.code = 5;
            "#,
        )
        .await
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("ENDPOINT \"http://backend1:8100/\""), "{}", text);
        assert!(text.contains("setting the code is not supported"), "{}", text);
    }

    #[tokio::test]
    async fn writable_fields_reach_the_table() {
        let h = harness();
        run(
            &h.script,
            r#"
            let ep = define(#{ "in": "http://h/", out: "http://backend1:8100" });
            ep.method = "head";
            ep.weight = 2;
            ep.waf = "protect";
            ep.actual = "up";
            ep.bag.note = "kept";
            if ep.bag.note != "kept" { throw "bag"; }
            commit();
            "#,
        )
        .await
        .unwrap();

        let table = h.endpoints.read();
        let ep = table.iter().next().unwrap();
        assert_eq!(ep.method, "HEAD");
        assert_eq!(ep.weight, 2.0);
        assert_eq!(ep.waf, WafPolicy::Protect);
        assert_eq!(ep.status(), Status::Up);
    }

    #[tokio::test]
    async fn invalid_status_is_an_error() {
        let h = harness();
        let err = run(
            &h.script,
            r#"
            let ep = define(#{ out: "http://backend1" });
            ep.status = "sideways";
            "#,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not a valid status"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_stages_without_committing() {
        let h = harness();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = format!(
            r#"
            let eps = [define(#{{ "in": "http://h/", out: "http://{addr}" }}), ()];
            ping(eps, #{{ timeout: 500 }});
            if eps[0].actual != "down" {{ throw "actual"; }}
            if eps[0].code != 0 {{ throw "code"; }}
            if eps[0].status != "unknown" {{ throw "status"; }}
            "#
        );
        run(&h.script, &source).await.unwrap();
    }

    #[tokio::test]
    async fn next_schedules_the_following_run() {
        let mut h = harness();
        run(&h.script, "next(2500); next(10);").await.unwrap();
        assert!(matches!(
            h.commands.try_recv().unwrap(),
            ProbeCommand::Next(d) if d == Duration::from_millis(2500)
        ));
        assert!(matches!(
            h.commands.try_recv().unwrap(),
            ProbeCommand::Next(d) if d == Duration::from_millis(10)
        ));
    }

    #[tokio::test]
    async fn sandbox_cannot_import_files() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("secret.rhai");
        std::fs::write(&module, r#"export const LEAK = "read from disk";"#).unwrap();

        let stem = dir.path().join("secret");
        let source = format!(
            r#"import "{}" as m; if m::LEAK != "read from disk" {{ throw "no"; }}"#,
            stem.display()
        );
        let err = run(&h.script, &source).await.unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_) | ScriptError::Compile(_)), "{}", err);
    }

    #[tokio::test]
    async fn sandbox_rejects_eval() {
        let h = harness();
        assert!(h.script.compile(r#"eval("1 + 1")"#).is_err());
    }
}

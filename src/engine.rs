//! The engine: one interpreter, one active function, one error latch.
//!
//! Control-context operations (`handle_message`, `reload`, `switch_function`,
//! `set_format`) follow a fixed publication order: latch and unpublish first,
//! do the work, publish the new handle, clear the latch last, and only then
//! release the retired handle. The audio context (`process_block`) therefore
//! sees either the old function, the latched state, or the new function.

use crate::cache::FunctionCache;
use crate::config::{EngineConfig, ScriptSource};
use crate::env::ScriptEnvironment;
use crate::error::{FaultKind, ScriptError};
use crate::fault::{drain_faults, new_fault_queue};
use crate::invariant_ppt::{
    assert_invariant, COMMIT_CLEARS_LATCH, ENV_CREATED, FAILED_SWITCH_STAYS_LATCHED,
    FORMAT_PUBLISHED, LATCH_BEFORE_RELOAD, REF_INVALID_BEFORE_RELOAD, RELEASE_AFTER_COMMIT,
    SINGLE_ACTIVE_REF,
};
use crate::message::{Atom, Message};
use crate::params::{Applied, ParamStore, ParamWriter};
use crate::resolve::{PackageResolver, ScriptResolver};
use crate::shim::{DspShim, ShimContext};
use crate::state::{EngineMonitor, EngineState, FunctionRef, Published};
use mlua::Lua;
use rtrb::Consumer;
use std::sync::Arc;

type Binding = Box<dyn FnOnce(&Lua) -> mlua::Result<()>>;

/// Builds an [`Engine`] with optional host bindings and a custom resolver.
pub struct EngineBuilder {
    config: EngineConfig,
    resolver: Option<Box<dyn ScriptResolver>>,
    bindings: Vec<Binding>,
}

impl EngineBuilder {
    /// Uses `resolver` instead of the package resolver.
    pub fn with_resolver(mut self, resolver: impl ScriptResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Runs `bindings` on the interpreter before any script is loaded.
    pub fn with_bindings(mut self, bindings: impl FnOnce(&Lua) -> mlua::Result<()> + 'static) -> Self {
        self.bindings.push(Box::new(bindings));
        self
    }

    /// Creates the interpreter, installs bindings and runs the initial load.
    ///
    /// Only interpreter creation and binding failures are errors. A failed
    /// initial load leaves the engine latched, as a failed reload would.
    pub fn build(self) -> Result<Engine, ScriptError> {
        let config = self.config;
        let env = ScriptEnvironment::create(config.gc)?;
        assert_invariant(ENV_CREATED, true, "interpreter created", None);

        for binding in self.bindings {
            binding(env.lua()).map_err(|e| {
                let err = ScriptError::EnvironmentCreate(format!("custom bindings: {}", e));
                log::error!("{}", err);
                err
            })?;
        }
        env.set_sample_rate(config.sample_rate)?;
        env.set_block_size(config.block_size)?;

        let resolver = self
            .resolver
            .unwrap_or_else(|| Box::new(PackageResolver::new(config.package_dir.clone())));
        let (faults_tx, faults_rx) = new_fault_queue();

        let mut engine = Engine {
            env,
            cache: FunctionCache::new(),
            params: ParamStore::new(),
            published: Arc::new(Published::new(true)),
            shim: DspShim::new(faults_tx),
            faults: faults_rx,
            resolver,
            function_name: config.function_name,
            script: config.script,
            sample_rate: config.sample_rate,
            block_size: config.block_size,
        };

        if engine.script.is_some() {
            // Failures are logged and leave the engine latched.
            let _ = engine.reload();
        } else {
            log::info!("no script configured; engine is latched until one is loaded");
        }
        Ok(engine)
    }
}

/// A script-driven per-sample transfer function.
pub struct Engine {
    env: ScriptEnvironment,
    cache: FunctionCache,
    params: ParamStore,
    published: Arc<Published>,
    shim: DspShim,
    faults: Consumer<FaultKind>,
    resolver: Box<dyn ScriptResolver>,
    function_name: String,
    script: Option<ScriptSource>,
    sample_rate: f64,
    block_size: usize,
}

impl Engine {
    /// Creates an engine from `config` with default bindings and resolver.
    pub fn new(config: EngineConfig) -> Result<Self, ScriptError> {
        Self::builder(config).build()
    }

    /// Starts a builder.
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            resolver: None,
            bindings: Vec::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Control context
    // ---------------------------------------------------------------------

    /// Dispatches a control-surface message.
    pub fn handle_message(&mut self, msg: Message) -> Result<(), ScriptError> {
        self.service_faults();
        log::trace!("message: {}", msg.description());
        match msg {
            Message::Bang => self.reload().map(drop),
            Message::Float { inlet, value } => {
                if !self.params.bank().set(inlet, value) {
                    log::warn!("ignoring value for inlet {}: out of range", inlet);
                }
                Ok(())
            }
            Message::List(args) => self.apply_params(&args).map(drop),
            Message::Anything { selector, args } => self.handle_anything(selector, args),
        }
    }

    fn handle_anything(&mut self, selector: String, args: Vec<Atom>) -> Result<(), ScriptError> {
        if selector.is_empty() {
            return self.apply_params(&args).map(drop);
        }
        if args.is_empty() {
            return self.switch_function(&selector).map(drop);
        }
        if self.cache.probe(&self.env, &selector) {
            // Switch, then apply the rest while still latched.
            self.swap_function(&selector, false, false)?;
            let applied = self.apply_params(&args);
            self.published.reset();
            return applied.map(drop);
        }
        log::debug!("'{}' is not a function; treating message as named parameters", selector);
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(Atom::Symbol(selector));
        all.extend(args);
        self.apply_params(&all).map(drop)
    }

    fn apply_params(&mut self, args: &[Atom]) -> Result<Option<Applied>, ScriptError> {
        if args.is_empty() {
            return Ok(None);
        }
        self.params
            .apply(&self.env, args)
            .map(Some)
            .inspect_err(|e| log::error!("{}", e))
    }

    /// Loads new source and resolves the current function from it.
    pub fn load(&mut self, source: ScriptSource) -> Result<FunctionRef, ScriptError> {
        self.script = Some(source);
        self.reload()
    }

    /// Re-runs the current source and re-resolves the current function.
    ///
    /// A load error is logged but is not fatal on its own: if the function
    /// name still resolves afterwards, it is committed. Partial side effects
    /// of a failed load stay in the environment.
    pub fn reload(&mut self) -> Result<FunctionRef, ScriptError> {
        self.service_faults();
        let name = self.function_name.clone();
        self.swap_function(&name, true, true)
    }

    /// Switches to another function in the current environment.
    pub fn switch_function(&mut self, name: &str) -> Result<FunctionRef, ScriptError> {
        self.service_faults();
        self.swap_function(name, false, true)
    }

    fn swap_function(
        &mut self,
        name: &str,
        reload: bool,
        clear_latch: bool,
    ) -> Result<FunctionRef, ScriptError> {
        // 1. Unpublish before touching the environment.
        let old = self.published.retire();
        assert_invariant(LATCH_BEFORE_RELOAD, self.published.is_latched(), "latched before work", Some(name));
        assert_invariant(
            REF_INVALID_BEFORE_RELOAD,
            self.published.current().is_invalid(),
            "current handle unpublished before work",
            Some(name),
        );

        // 2. Reload, if asked. Errors are already logged.
        if reload {
            let _ = self.run_script();
        }

        // 3. Resolve and publish.
        let outcome = self.cache.cache_function(&self.env, name);
        match outcome {
            Ok(new_ref) => {
                self.published.commit(new_ref);
                if clear_latch {
                    self.published.reset();
                    assert_invariant(
                        COMMIT_CLEARS_LATCH,
                        !self.published.is_latched() && self.published.current() == new_ref,
                        "commit publishes then clears",
                        Some(name),
                    );
                }
                self.function_name = name.to_string();
                if reload {
                    log::info!("reloaded and cached function: {}", name);
                } else {
                    log::info!("funcname: {}", name);
                }
            }
            Err(_) => {
                assert_invariant(
                    FAILED_SWITCH_STAYS_LATCHED,
                    self.published.is_latched() && self.published.current().is_invalid(),
                    "failed switch stays latched",
                    Some(name),
                );
                if reload {
                    log::error!("function '{}' not found after reload", name);
                }
            }
        }

        // 4. Release the retired handle only now.
        self.cache.release_function(&self.env, old);
        assert_invariant(
            RELEASE_AFTER_COMMIT,
            !self.cache.is_valid(&self.env, old),
            "retired handle released after commit",
            Some(name),
        );
        assert_invariant(SINGLE_ACTIVE_REF, self.cache.live_count() <= 1, "one live handle", Some(name));
        outcome
    }

    fn run_script(&mut self) -> Result<(), ScriptError> {
        match &self.script {
            None => Ok(()),
            Some(ScriptSource::Text { name, code }) => {
                log::info!("run {}", name);
                self.env.run_source(name, code)
            }
            Some(ScriptSource::File(file)) => {
                let Some(path) = self.resolver.resolve(file) else {
                    let err = ScriptError::Load {
                        chunk: file.display().to_string(),
                        message: "file not found".to_string(),
                    };
                    log::error!("{}", err);
                    return Err(err);
                };
                self.env.run_file(&path)
            }
        }
    }

    /// Host format change: stores and republishes sample rate and block size.
    pub fn set_format(&mut self, sample_rate: f64, block_size: usize) -> Result<(), ScriptError> {
        log::info!("sample rate: {}", sample_rate);
        log::info!("maxvectorsize: {}", block_size);
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.env.set_sample_rate(sample_rate)?;
        self.env.set_block_size(block_size)?;
        assert_invariant(FORMAT_PUBLISHED, true, "format republished", None);
        Ok(())
    }

    /// Drains audio-context faults and logs them.
    pub fn service_faults(&mut self) -> Vec<FaultKind> {
        let faults = drain_faults(&mut self.faults);
        for &fault in &faults {
            let detail = match fault {
                FaultKind::Call => match self.shim.take_last_error() {
                    Some(err) => ScriptError::Call(err.to_string()).to_string(),
                    None => "script error".to_string(),
                },
                FaultKind::FunctionNotFound => {
                    ScriptError::FunctionNotFound(self.function_name.clone()).to_string()
                }
                FaultKind::ResultType => "function must return a number".to_string(),
                FaultKind::ResultRange => "function returned invalid value (NaN or Inf)".to_string(),
                FaultKind::Panic => "panic in audio callback".to_string(),
            };
            log::error!("[{}] {}: {}", fault.name(), self.function_name, detail);
        }
        faults
    }

    // ---------------------------------------------------------------------
    // Audio context
    // ---------------------------------------------------------------------

    fn shim_parts(&mut self) -> (&mut DspShim, ShimContext<'_>) {
        (
            &mut self.shim,
            ShimContext {
                env: &self.env,
                cache: &self.cache,
                published: &self.published,
                bank: self.params.bank(),
            },
        )
    }

    /// Processes one block of mono audio.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        let (shim, ctx) = self.shim_parts();
        shim.process_block(&ctx, input, output);
    }

    /// `process_block` with panic containment: a panic fills silence and latches.
    pub fn process_block_safe(&mut self, input: &[f32], output: &mut [f32]) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.process_block(input, &mut *output);
        }));
        if result.is_err() {
            // Fail closed: silence output
            output.fill(0.0);
            self.shim.fail(&self.published, FaultKind::Panic);
        }
    }

    /// A single call with explicit arguments, using the current parameters.
    pub fn invoke(&mut self, audio_in: f64, previous_output: f64, remaining: f64) -> f64 {
        let (shim, ctx) = self.shim_parts();
        shim.invoke(&ctx, audio_in, previous_output, remaining)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// Cross-thread view of the latch and published handle.
    pub fn monitor(&self) -> EngineMonitor {
        EngineMonitor::new(Arc::clone(&self.published))
    }

    /// Cross-thread positional parameter writer.
    pub fn param_writer(&self) -> ParamWriter {
        self.params.writer()
    }

    /// Parameter store.
    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    /// Current contents of the named-parameter table.
    pub fn named_params(&self) -> Vec<(String, f64)> {
        self.env.named_params()
    }

    /// The script environment.
    pub fn environment(&self) -> &ScriptEnvironment {
        &self.env
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        if self.published.is_latched() {
            EngineState::Error
        } else {
            EngineState::Ready
        }
    }

    /// Published function handle.
    pub fn current_function(&self) -> FunctionRef {
        self.published.current()
    }

    /// Whether `func` is live and callable.
    pub fn is_valid(&self, func: FunctionRef) -> bool {
        self.cache.is_valid(&self.env, func)
    }

    /// Number of function references held.
    pub fn live_functions(&self) -> usize {
        self.cache.live_count()
    }

    /// Name of the active (or last requested) function.
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Last emitted sample.
    pub fn previous_output(&self) -> f64 {
        self.shim.previous_output()
    }

    /// Current sample rate.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Current block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let old = self.published.retire();
        self.cache.release_function(&self.env, old);
        self.cache.release_all(&self.env);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("function_name", &self.function_name)
            .field("current", &self.published.current())
            .field("state", &self.state())
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
function base(x, prev, n, gain)
    return x * (gain or 1)
end

function half(x)
    return x * 0.5
end
"#;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default().with_script(ScriptSource::text("test", SCRIPT))).unwrap()
    }

    #[test]
    fn initial_load_resolves_default_function() {
        let engine = engine();
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(!engine.current_function().is_invalid());
        assert_eq!(engine.function_name(), "base");
    }

    #[test]
    fn no_script_starts_latched() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.state(), EngineState::Error);
        assert!(engine.current_function().is_invalid());
    }

    #[test]
    fn switch_releases_old_reference() {
        let mut engine = engine();
        let old = engine.current_function();
        let new = engine.switch_function("half").unwrap();
        assert_ne!(old, new);
        assert!(!engine.is_valid(old));
        assert_eq!(engine.live_functions(), 1);
        assert_eq!(engine.invoke(0.5, 0.0, 0.0), 0.25);
    }

    #[test]
    fn failed_switch_latches_and_keeps_name() {
        let mut engine = engine();
        let old = engine.current_function();
        assert!(engine.switch_function("missing").is_err());
        assert_eq!(engine.state(), EngineState::Error);
        assert!(engine.current_function().is_invalid());
        assert!(!engine.is_valid(old));
        assert_eq!(engine.live_functions(), 0);
        assert_eq!(engine.function_name(), "base");
    }

    #[test]
    fn float_on_inlet_sets_param() {
        let mut engine = engine();
        engine.handle_message(Message::Float { inlet: 2, value: 0.7 }).unwrap();
        assert_eq!(engine.params().bank().count(), 3);
        assert_eq!(engine.params().bank().get(2), Some(0.7));
        engine.handle_message(Message::Float { inlet: 99, value: 0.7 }).unwrap();
        assert_eq!(engine.params().bank().count(), 3);
    }

    #[test]
    fn function_with_params_switches_and_applies() {
        let mut engine = engine();
        engine
            .handle_message(Message::anything("half", vec![Atom::from("mix"), Atom::Float(0.3)]))
            .unwrap();
        assert_eq!(engine.function_name(), "half");
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.named_params(), vec![("mix".to_string(), 0.3)]);
    }

    #[test]
    fn non_function_selector_is_a_named_pair() {
        let mut engine = engine();
        engine
            .handle_message(Message::anything("delay", vec![Atom::Int(2), Atom::from("feedback"), Atom::Float(0.5)]))
            .unwrap();
        assert_eq!(engine.function_name(), "base");
        assert_eq!(
            engine.named_params(),
            vec![("delay".to_string(), 2.0), ("feedback".to_string(), 0.5)]
        );
    }

    #[test]
    fn format_is_published() {
        let mut engine = engine();
        engine.set_format(96000.0, 256).unwrap();
        engine.environment().run_source("probe", "sr, bs = SAMPLE_RATE, BLOCK_SIZE").unwrap();
        let globals = engine.environment().lua().globals();
        assert_eq!(globals.get::<f64>("sr").unwrap(), 96000.0);
        assert_eq!(globals.get::<f64>("bs").unwrap(), 256.0);
        assert_eq!(engine.sample_rate(), 96000.0);
    }

    #[test]
    fn faults_are_drained_by_control() {
        let mut engine = Engine::new(
            EngineConfig::default().with_script(ScriptSource::text("t", "function base() return 'x' end")),
        )
        .unwrap();
        let mut out = [0.0f32; 16];
        engine.process_block(&[0.0; 16], &mut out);
        assert_eq!(engine.service_faults(), vec![FaultKind::ResultType]);
        assert!(engine.service_faults().is_empty());
    }

    #[test]
    fn bindings_run_before_load() {
        let engine = Engine::builder(
            EngineConfig::default().with_script(ScriptSource::text("t", "function base() return OFFSET end")),
        )
        .with_bindings(|lua| lua.globals().set("OFFSET", 0.125))
        .build()
        .unwrap();
        let mut engine = engine;
        assert_eq!(engine.invoke(0.0, 0.0, 0.0), 0.125);
    }

    #[test]
    fn failing_bindings_abort_creation() {
        let result = Engine::builder(EngineConfig::default())
            .with_bindings(|_| Err(mlua::Error::runtime("no")))
            .build();
        assert!(matches!(result, Err(ScriptError::EnvironmentCreate(_))));
    }
}

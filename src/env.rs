//! Script environment: one interpreter per engine.
//!
//! Owns the Lua state, the well-known globals (`SAMPLE_RATE`, `BLOCK_SIZE`,
//! `PARAMS`, `api`) and the invocation trampoline used by the audio path.

use crate::config::{GcConfig, API_GLOBAL, BLOCK_SIZE_GLOBAL, PARAMS_GLOBAL, SAMPLE_RATE_GLOBAL};
use crate::error::ScriptError;
use crate::params::PARAM_CAPACITY;
use mlua::{Function, Lua, LuaOptions, StdLib, Table, Value};
use std::path::Path;

/// Spreads the staged positional parameters after the three fixed arguments.
/// Lives in the registry, not in the script's globals.
const TRAMPOLINE: &str = r#"
local unpack = unpack or table.unpack
return function(f, args, count, x, prev, remaining)
    return f(x, prev, remaining, unpack(args, 1, count))
end
"#;

/// Log target for `api.post` / `api.error`.
pub const SCRIPT_LOG_TARGET: &str = "lunadsp::script";

/// One interpreter instance and its bindings.
pub struct ScriptEnvironment {
    lua: Lua,
    trampoline: Function,
    args: Table,
}

impl ScriptEnvironment {
    /// Creates an interpreter with every standard library loaded and the
    /// collector switched to bounded incremental steps.
    pub fn create(gc: GcConfig) -> Result<Self, ScriptError> {
        let create_err = |e: mlua::Error| ScriptError::EnvironmentCreate(e.to_string());

        // SAFETY: scripts get the full host environment, `debug` and `ffi`
        // included. Nothing on the Rust side relies on the script being sandboxed.
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL, LuaOptions::new()) };
        lua.gc_stop();

        register_api(&lua).map_err(create_err)?;
        let trampoline: Function = lua
            .load(TRAMPOLINE)
            .set_name("=lunadsp.invoke")
            .eval()
            .map_err(create_err)?;
        let args = lua
            .create_table_with_capacity(PARAM_CAPACITY, 0)
            .map_err(create_err)?;

        lua.gc_restart();
        lua.gc_inc(gc.pause, gc.step_multiplier, gc.step_size);

        Ok(Self {
            lua,
            trampoline,
            args,
        })
    }

    /// The interpreter, for host bindings.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Compiles and runs inline source.
    ///
    /// Globals defined before a failure point stay defined; there is no rollback.
    pub fn run_source(&self, name: &str, code: &str) -> Result<(), ScriptError> {
        self.lua
            .load(code)
            .set_name(format!("={}", name))
            .exec()
            .map_err(|e| load_error(name, e.to_string()))
    }

    /// Reads and runs a script file.
    pub fn run_file(&self, path: &Path) -> Result<(), ScriptError> {
        let chunk = path.display().to_string();
        let code = std::fs::read_to_string(path).map_err(|e| load_error(&chunk, e.to_string()))?;
        self.lua
            .load(code.as_str())
            .set_name(format!("@{}", chunk))
            .exec()
            .map_err(|e| load_error(&chunk, e.to_string()))
    }

    /// Publishes the sample rate global.
    pub fn set_sample_rate(&self, hz: f64) -> Result<(), ScriptError> {
        self.set_number_global(SAMPLE_RATE_GLOBAL, hz)
    }

    /// Publishes the block size global.
    pub fn set_block_size(&self, frames: usize) -> Result<(), ScriptError> {
        self.set_number_global(BLOCK_SIZE_GLOBAL, frames as f64)
    }

    fn set_number_global(&self, name: &str, value: f64) -> Result<(), ScriptError> {
        self.lua
            .globals()
            .set(name, value)
            .map_err(binding_error)
    }

    /// Sets `PARAMS[name] = value`, creating the table if a script removed it.
    pub fn set_named_param(&self, name: &str, value: f64) -> Result<(), ScriptError> {
        let params = self.named_table().map_err(binding_error)?;
        params
            .set(name, value)
            .map_err(binding_error)
    }

    /// Replaces `PARAMS` with an empty table.
    pub fn clear_named_params(&self) -> Result<(), ScriptError> {
        let fresh = self
            .lua
            .create_table()
            .map_err(binding_error)?;
        self.lua
            .globals()
            .set(PARAMS_GLOBAL, fresh)
            .map_err(binding_error)
    }

    /// Current contents of `PARAMS`, sorted by key. Non-numeric entries are skipped.
    pub fn named_params(&self) -> Vec<(String, f64)> {
        let mut entries = Vec::new();
        if let Ok(Value::Table(params)) = self.lua.globals().get::<Value>(PARAMS_GLOBAL) {
            for (key, value) in params.pairs::<String, f64>().flatten() {
                entries.push((key, value));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn named_table(&self) -> mlua::Result<Table> {
        let globals = self.lua.globals();
        match globals.get::<Value>(PARAMS_GLOBAL)? {
            Value::Table(params) => Ok(params),
            _ => {
                let params = self.lua.create_table()?;
                globals.set(PARAMS_GLOBAL, params.clone())?;
                Ok(params)
            }
        }
    }

    /// Looks up a global by name.
    pub(crate) fn global(&self, name: &str) -> mlua::Result<Value> {
        self.lua.globals().get::<Value>(name)
    }

    /// Copies positional parameters into the staging table. Once per block.
    pub(crate) fn stage_params(&self, params: &[f64]) -> mlua::Result<()> {
        for (i, &value) in params.iter().enumerate() {
            self.args.raw_set(i + 1, value)?;
        }
        Ok(())
    }

    /// Protected call of `func(x, prev, remaining, args[1..=count])`.
    #[inline]
    pub(crate) fn invoke(
        &self,
        func: &Function,
        count: usize,
        x: f64,
        prev: f64,
        remaining: f64,
    ) -> mlua::Result<Value> {
        self.trampoline
            .call::<Value>((func.clone(), self.args.clone(), count, x, prev, remaining))
    }
}

impl std::fmt::Debug for ScriptEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEnvironment")
            .field("used_memory", &self.lua.used_memory())
            .finish()
    }
}

fn binding_error(e: mlua::Error) -> ScriptError {
    ScriptError::Binding(e.to_string())
}

fn load_error(chunk: &str, message: String) -> ScriptError {
    let err = ScriptError::Load {
        chunk: chunk.to_string(),
        message,
    };
    log::error!("{}", err);
    err
}

/// Installs `api.post` and `api.error`.
fn register_api(lua: &Lua) -> mlua::Result<()> {
    let api = lua.create_table()?;
    api.set(
        "post",
        lua.create_function(|_, msg: String| {
            log::info!(target: SCRIPT_LOG_TARGET, "{}", msg);
            Ok(())
        })?,
    )?;
    api.set(
        "error",
        lua.create_function(|_, msg: String| {
            log::error!(target: SCRIPT_LOG_TARGET, "{}", msg);
            Ok(())
        })?,
    )?;
    lua.globals().set(API_GLOBAL, api)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> ScriptEnvironment {
        ScriptEnvironment::create(GcConfig::default()).unwrap()
    }

    #[test]
    fn sample_rate_is_visible_to_scripts() {
        let env = env();
        env.set_sample_rate(48000.0).unwrap();
        env.run_source("probe", "seen = SAMPLE_RATE").unwrap();
        assert_eq!(env.lua().globals().get::<f64>("seen").unwrap(), 48000.0);
    }

    #[test]
    fn load_error_keeps_earlier_globals() {
        let env = env();
        let err = env
            .run_source("partial", "early = 1\nerror('boom')\nlate = 2")
            .unwrap_err();
        assert!(matches!(err, ScriptError::Load { .. }));
        assert_eq!(env.lua().globals().get::<f64>("early").unwrap(), 1.0);
        assert!(env.lua().globals().get::<Option<f64>>("late").unwrap().is_none());
    }

    #[test]
    fn syntax_error_is_a_load_error() {
        let env = env();
        assert!(matches!(
            env.run_source("bad", "function ("),
            Err(ScriptError::Load { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let env = env();
        let err = env.run_file(Path::new("/definitely/not/here.lua")).unwrap_err();
        assert!(matches!(err, ScriptError::Load { .. }));
    }

    #[test]
    fn named_params_are_created_lazily() {
        let env = env();
        env.run_source("wipe", "PARAMS = nil").unwrap();
        env.set_named_param("cutoff", 0.25).unwrap();
        assert_eq!(env.named_params(), vec![("cutoff".to_string(), 0.25)]);

        env.clear_named_params().unwrap();
        assert!(env.named_params().is_empty());
    }

    #[test]
    fn full_standard_library_is_loaded() {
        let env = env();
        env.run_source(
            "libs",
            "has_debug = debug ~= nil\nhas_ffi = pcall(require, 'ffi')\nhas_jit = jit ~= nil",
        )
        .unwrap();
        let globals = env.lua().globals();
        assert!(globals.get::<bool>("has_debug").unwrap());
        assert!(globals.get::<bool>("has_ffi").unwrap());
        assert!(globals.get::<bool>("has_jit").unwrap());
    }

    #[test]
    fn failed_global_write_is_a_binding_error() {
        let env = env();
        env.run_source(
            "locked",
            "PARAMS = nil\nsetmetatable(_G, { __newindex = function() error('read-only') end })",
        )
        .unwrap();
        assert!(matches!(env.clear_named_params(), Err(ScriptError::Binding(_))));
        assert!(matches!(env.set_named_param("gain", 1.0), Err(ScriptError::Binding(_))));
    }

    #[test]
    fn api_table_is_installed() {
        let env = env();
        env.run_source("api", "api.post('hello') api.error('oops')").unwrap();
    }

    #[test]
    fn trampoline_spreads_staged_params() {
        let env = env();
        env.run_source("sum", "function sum(x, p, n, a, b) return x + p + n + a + b end")
            .unwrap();
        let func: Function = env.lua().globals().get("sum").unwrap();
        env.stage_params(&[10.0, 20.0]).unwrap();
        match env.invoke(&func, 2, 1.0, 2.0, 3.0).unwrap() {
            Value::Number(n) => assert_eq!(n, 36.0),
            Value::Integer(i) => assert_eq!(i, 36),
            other => panic!("unexpected {:?}", other),
        }
    }
}

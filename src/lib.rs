//! lunadsp: per-sample audio processing driven by a hot-reloadable Lua script.
//!
//! An [`Engine`] owns one LuaJIT interpreter. The script defines functions of the
//! form `f(audio_in, previous_output, remaining, ...params)`; the engine calls the
//! active one once per sample, clamps its result to `[-1, 1]`, and fails closed to
//! silence on any script error until a reload or switch succeeds.
//!
//! ```no_run
//! use lunadsp::{Engine, EngineConfig, Message, ScriptSource};
//!
//! let config = EngineConfig::default()
//!     .with_script(ScriptSource::text("gain", "function base(x, p, n, g) return x * (g or 1) end"));
//! let mut engine = Engine::new(config)?;
//! engine.handle_message(Message::List(vec![0.5.into()]))?;
//!
//! let mut out = [0.0f32; 64];
//! engine.process_block(&[0.25; 64], &mut out);
//! # Ok::<(), lunadsp::ScriptError>(())
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod fault;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod message;
pub mod params;
pub mod render;
pub mod resolve;
mod shim;
pub mod state;

pub use config::{EngineConfig, GcConfig, ScriptSource};
pub use engine::{Engine, EngineBuilder};
pub use error::{FaultKind, ScriptError};
pub use message::{Atom, Message};
pub use params::{ParamBank, ParamWriter, PARAM_CAPACITY};
pub use render::{render_offline, write_wav};
pub use resolve::{PackageResolver, ScriptResolver};
pub use shim::{clamp_sample, validate_result, OUTPUT_MAX, OUTPUT_MIN};
pub use state::{EngineMonitor, EngineState, FunctionRef};

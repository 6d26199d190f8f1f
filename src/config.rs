//! Engine configuration.

use std::path::PathBuf;

/// Global holding the host sample rate.
pub const SAMPLE_RATE_GLOBAL: &str = "SAMPLE_RATE";
/// Global holding the host block size.
pub const BLOCK_SIZE_GLOBAL: &str = "BLOCK_SIZE";
/// Global table holding named parameters.
pub const PARAMS_GLOBAL: &str = "PARAMS";
/// Global table holding host helpers (`post`, `error`).
pub const API_GLOBAL: &str = "api";

/// Function resolved when nothing else was requested.
pub const DEFAULT_FUNCTION: &str = "base";

/// Where script source comes from. Reloads re-run the same source.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptSource {
    /// Inline source with a chunk name used in error messages.
    Text {
        /// Chunk name.
        name: String,
        /// Lua source.
        code: String,
    },
    /// Logical file name, resolved through a [`crate::resolve::ScriptResolver`].
    File(PathBuf),
}

impl ScriptSource {
    /// Inline source.
    pub fn text(name: impl Into<String>, code: impl Into<String>) -> Self {
        ScriptSource::Text {
            name: name.into(),
            code: code.into(),
        }
    }

    /// File source.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ScriptSource::File(path.into())
    }
}

/// Incremental collector settings, applied once at interpreter creation.
///
/// Collection is stopped while the interpreter is built and restarted in
/// incremental mode with these multipliers so a cycle cannot stall a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    /// Wait this percentage of live memory before the next cycle.
    pub pause: i32,
    /// Collection speed relative to allocation.
    pub step_multiplier: i32,
    /// Step size (log2 of bytes). Ignored by LuaJIT; 0 keeps the default.
    pub step_size: i32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            pause: 200,
            step_multiplier: 100,
            step_size: 0,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Initial sample rate; replaced on every format event.
    pub sample_rate: f64,
    /// Initial block size; replaced on every format event.
    pub block_size: usize,
    /// Name of the function to resolve after loading.
    pub function_name: String,
    /// Script run at creation and on every reload.
    pub script: Option<ScriptSource>,
    /// Collector settings.
    pub gc: GcConfig,
    /// Package root used as a fallback when resolving script files.
    pub package_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            block_size: 64,
            function_name: DEFAULT_FUNCTION.to_string(),
            script: None,
            gc: GcConfig::default(),
            package_dir: None,
        }
    }
}

impl EngineConfig {
    /// Sets the initial sample rate.
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Sets the initial block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the function resolved after loading.
    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    /// Sets the script source.
    pub fn with_script(mut self, script: ScriptSource) -> Self {
        self.script = Some(script);
        self
    }

    /// Sets collector settings.
    pub fn with_gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    /// Sets the package root for file resolution.
    pub fn with_package_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.package_dir = Some(dir.into());
        self
    }
}

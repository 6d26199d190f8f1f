//! Error taxonomy for script loading, function resolution and invocation.

use thiserror::Error;

/// Errors raised by the script environment, the function cache, the parameter
/// grammar and the invocation shim.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The interpreter could not be allocated or initialised.
    #[error("failed to create script environment: {0}")]
    EnvironmentCreate(String),

    /// Source failed to compile or raised while running.
    #[error("failed to load '{chunk}': {message}")]
    Load {
        /// Chunk name (file path or text label).
        chunk: String,
        /// Interpreter message.
        message: String,
    },

    /// The global is absent or is not callable.
    #[error("'{0}' is not a function")]
    FunctionNotFound(String),

    /// Malformed named-parameter message. Nothing was applied.
    #[error("named parameters must be (symbol, number) pairs: {0}")]
    NamedParamGrammar(String),

    /// A control-context write into the interpreter failed (globals,
    /// `PARAMS`, registry).
    #[error("failed to update script bindings: {0}")]
    Binding(String),

    /// Runtime failure inside a protected call.
    #[error("script error: {0}")]
    Call(String),

    /// The function returned something other than a number.
    #[error("function must return a number, got {0}")]
    ResultType(&'static str),

    /// The function returned NaN or an infinity.
    #[error("function returned invalid value ({0})")]
    ResultRange(f64),
}

/// Allocation-free fault codes raised by the audio path.
///
/// These travel over the fault queue; the control context turns them into
/// log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Published reference was invalid or no longer callable.
    FunctionNotFound,
    /// Protected call failed.
    Call,
    /// Non-numeric result.
    ResultType,
    /// NaN or infinite result.
    ResultRange,
    /// A panic was caught at the block boundary.
    Panic,
}

impl FaultKind {
    /// Short label used in log lines.
    pub const fn name(self) -> &'static str {
        match self {
            FaultKind::FunctionNotFound => "FUNCTION_NOT_FOUND",
            FaultKind::Call => "CALL",
            FaultKind::ResultType => "RESULT_TYPE",
            FaultKind::ResultRange => "RESULT_RANGE",
            FaultKind::Panic => "PANIC",
        }
    }
}

impl ScriptError {
    /// Maps an error to the fault code the audio path would signal for it, if any.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            ScriptError::FunctionNotFound(_) => Some(FaultKind::FunctionNotFound),
            ScriptError::Call(_) => Some(FaultKind::Call),
            ScriptError::ResultType(_) => Some(FaultKind::ResultType),
            ScriptError::ResultRange(_) => Some(FaultKind::ResultRange),
            _ => None,
        }
    }
}

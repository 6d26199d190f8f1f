//! DSP invocation shim: calls the published function once per sample.

// IMPORTANT: Do not call assert_invariant or any logging in RT paths to avoid locks/allocs.
// Each call still takes mlua's reentrant interpreter guard. The engine owns the
// interpreter exclusively, so that guard is never contended.

use crate::cache::FunctionCache;
use crate::env::ScriptEnvironment;
use crate::error::{FaultKind, ScriptError};
use crate::fault::signal_fault;
use crate::params::{ParamBank, PARAM_CAPACITY};
use crate::state::Published;
use mlua::{Function, Value};
use rtrb::Producer;

/// Lowest sample the shim emits.
pub const OUTPUT_MIN: f64 = -1.0;
/// Highest sample the shim emits.
pub const OUTPUT_MAX: f64 = 1.0;

/// Checks a script result: it must be a finite number.
#[inline]
pub fn validate_result(value: &Value) -> Result<f64, ScriptError> {
    let y = match value {
        Value::Number(n) => *n,
        Value::Integer(i) => *i as f64,
        other => return Err(ScriptError::ResultType(other.type_name())),
    };
    if y.is_finite() {
        Ok(y)
    } else {
        Err(ScriptError::ResultRange(y))
    }
}

/// Clamps a finite sample into the output range.
#[inline]
pub fn clamp_sample(y: f64) -> f64 {
    y.clamp(OUTPUT_MIN, OUTPUT_MAX)
}

/// Borrowed view of the engine parts the shim reads.
pub(crate) struct ShimContext<'a> {
    pub env: &'a ScriptEnvironment,
    pub cache: &'a FunctionCache,
    pub published: &'a Published,
    pub bank: &'a ParamBank,
}

/// Audio-side state: single-sample feedback, parameter scratch, fault producer.
pub(crate) struct DspShim {
    prev: f64,
    scratch: [f64; PARAM_CAPACITY],
    faults: Producer<FaultKind>,
    // The interpreter already allocated this error; it is moved here, never formatted.
    last_error: Option<mlua::Error>,
}

impl DspShim {
    pub(crate) fn new(faults: Producer<FaultKind>) -> Self {
        Self {
            prev: 0.0,
            scratch: [0.0; PARAM_CAPACITY],
            faults,
            last_error: None,
        }
    }

    /// Last emitted sample, fed back as `previous_output`.
    pub(crate) fn previous_output(&self) -> f64 {
        self.prev
    }

    pub(crate) fn take_last_error(&mut self) -> Option<mlua::Error> {
        self.last_error.take()
    }

    /// Latches and signals. Always returns silence.
    #[inline]
    pub(crate) fn fail(&mut self, published: &Published, fault: FaultKind) -> f64 {
        published.trip();
        signal_fault(&mut self.faults, fault);
        0.0
    }

    /// Resolves the published function and stages parameters for a run of calls.
    /// Returns the callable and the active parameter count, or `None` if latched.
    fn prepare(&mut self, ctx: &ShimContext<'_>) -> Option<(Function, usize)> {
        if ctx.published.is_latched() {
            return None;
        }
        let Some(func) = ctx.cache.function(ctx.env, ctx.published.current()) else {
            self.fail(ctx.published, FaultKind::FunctionNotFound);
            return None;
        };
        let count = ctx.bank.snapshot(&mut self.scratch);
        if let Err(e) = ctx.env.stage_params(&self.scratch[..count]) {
            self.last_error = Some(e);
            self.fail(ctx.published, FaultKind::Call);
            return None;
        }
        Some((func, count))
    }

    /// One protected call with result validation and clamping.
    #[inline]
    fn call(
        &mut self,
        ctx: &ShimContext<'_>,
        func: &Function,
        count: usize,
        x: f64,
        prev: f64,
        remaining: f64,
    ) -> f64 {
        if ctx.published.is_latched() {
            return 0.0;
        }
        let value = match ctx.env.invoke(func, count, x, prev, remaining) {
            Ok(value) => value,
            Err(e) => {
                self.last_error = Some(e);
                return self.fail(ctx.published, FaultKind::Call);
            }
        };
        match validate_result(&value) {
            Ok(y) => clamp_sample(y),
            Err(ScriptError::ResultRange(_)) => self.fail(ctx.published, FaultKind::ResultRange),
            Err(_) => self.fail(ctx.published, FaultKind::ResultType),
        }
    }

    /// A single invocation with explicit arguments. Does not touch the
    /// feedback state.
    pub(crate) fn invoke(&mut self, ctx: &ShimContext<'_>, x: f64, prev: f64, remaining: f64) -> f64 {
        match self.prepare(ctx) {
            Some((func, count)) => self.call(ctx, &func, count, x, prev, remaining),
            None => 0.0,
        }
    }

    /// Processes one block. `input` shorter than `output` reads as silence.
    ///
    /// The published handle cannot change while the engine is borrowed for the
    /// block, so the liveness probe and parameter snapshot run once per block.
    pub(crate) fn process_block(&mut self, ctx: &ShimContext<'_>, input: &[f32], output: &mut [f32]) {
        let Some((func, count)) = self.prepare(ctx) else {
            output.fill(0.0);
            return;
        };
        let frames = output.len();
        let mut prev = self.prev;
        for (i, out) in output.iter_mut().enumerate() {
            let x = input.get(i).copied().unwrap_or(0.0) as f64;
            let remaining = (frames - 1 - i) as f64;
            prev = self.call(ctx, &func, count, x, prev, remaining);
            *out = prev as f32;
        }
        self.prev = prev;
    }
}

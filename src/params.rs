//! Parameter store: a fixed-capacity positional bank plus the named `PARAMS`
//! table mirrored into the script environment.
//!
//! The positional bank is a fixed array of atomics. Writers never resize it,
//! so the audio context can snapshot it once per block while a control-side
//! write is in flight. Values are stored first and the active count last.

use crate::env::ScriptEnvironment;
use crate::error::ScriptError;
use crate::invariant_ppt::{assert_invariant, NAMED_PARAMS_REPLACED, POSITIONAL_TRUNCATED};
use crate::message::Atom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of positional parameter slots.
pub const PARAM_CAPACITY: usize = 32;

/// Lock-free positional parameter array.
#[derive(Debug)]
pub struct ParamBank {
    values: [AtomicU64; PARAM_CAPACITY],
    count: AtomicUsize,
}

impl Default for ParamBank {
    fn default() -> Self {
        Self {
            values: std::array::from_fn(|_| AtomicU64::new(0.0f64.to_bits())),
            count: AtomicUsize::new(0),
        }
    }
}

impl ParamBank {
    /// Writes from index 0, truncating at capacity. Returns the new active count.
    pub fn set_positional(&self, values: &[f64]) -> usize {
        let count = values.len().min(PARAM_CAPACITY);
        for (slot, &value) in self.values.iter().zip(values) {
            slot.store(value.to_bits(), Ordering::Relaxed);
        }
        self.count.store(count, Ordering::Release);
        count
    }

    /// Writes one slot, extending the active count to cover it.
    /// Returns `false` if the index is out of range.
    pub fn set(&self, index: usize, value: f64) -> bool {
        let Some(slot) = self.values.get(index) else {
            return false;
        };
        slot.store(value.to_bits(), Ordering::Relaxed);
        self.count.fetch_max(index + 1, Ordering::Release);
        true
    }

    /// Active parameter count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Value at `index` (active or not).
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values
            .get(index)
            .map(|slot| f64::from_bits(slot.load(Ordering::Relaxed)))
    }

    /// Copies the active parameters into `out` and returns how many.
    /// Allocation-free; the audio path calls this once per block.
    #[inline]
    pub fn snapshot(&self, out: &mut [f64; PARAM_CAPACITY]) -> usize {
        let count = self.count.load(Ordering::Acquire);
        for (dst, slot) in out.iter_mut().zip(&self.values).take(count) {
            *dst = f64::from_bits(slot.load(Ordering::Relaxed));
        }
        count
    }
}

/// Clonable handle for writing positional parameters from any thread.
#[derive(Debug, Clone)]
pub struct ParamWriter {
    bank: Arc<ParamBank>,
}

impl ParamWriter {
    /// Sets one slot. See [`ParamBank::set`].
    pub fn set(&self, index: usize, value: f64) -> bool {
        self.bank.set(index, value)
    }

    /// Sets all positional parameters. See [`ParamBank::set_positional`].
    pub fn set_all(&self, values: &[f64]) -> usize {
        self.bank.set_positional(values)
    }
}

/// A parsed parameter message.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamUpdate {
    /// All-numeric list, written from index 0.
    Positional(Vec<f64>),
    /// Alternating (name, value) pairs; replaces the whole named table.
    Named(Vec<(String, f64)>),
}

/// Picks the grammar for a flat argument list.
///
/// All-numeric lists are positional. Anything else must be (symbol, number)
/// pairs; an odd count or a misplaced atom rejects the whole message.
pub fn parse_params(args: &[Atom]) -> Result<ParamUpdate, ScriptError> {
    if args.iter().all(Atom::is_number) {
        return Ok(ParamUpdate::Positional(
            args.iter().filter_map(Atom::as_number).collect(),
        ));
    }

    if args.len() % 2 != 0 {
        return Err(ScriptError::NamedParamGrammar(format!(
            "odd argument count {}",
            args.len()
        )));
    }

    let mut pairs = Vec::with_capacity(args.len() / 2);
    for (i, pair) in args.chunks_exact(2).enumerate() {
        let name = pair[0].as_symbol().ok_or_else(|| {
            ScriptError::NamedParamGrammar(format!("argument {} is not a name", i * 2))
        })?;
        let value = pair[1].as_number().ok_or_else(|| {
            ScriptError::NamedParamGrammar(format!("value for '{}' is not a number", name))
        })?;
        pairs.push((name.to_string(), value));
    }
    Ok(ParamUpdate::Named(pairs))
}

/// What a parameter message changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Positional bank updated; new active count.
    Positional(usize),
    /// Named table replaced; number of entries.
    Named(usize),
}

/// Positional bank plus the named-parameter mirror.
#[derive(Debug, Default)]
pub struct ParamStore {
    bank: Arc<ParamBank>,
}

impl ParamStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The positional bank.
    pub fn bank(&self) -> &ParamBank {
        &self.bank
    }

    /// A cross-thread writer for the positional bank.
    pub fn writer(&self) -> ParamWriter {
        ParamWriter {
            bank: Arc::clone(&self.bank),
        }
    }

    /// Parses and applies a parameter list. Nothing is applied on a grammar error.
    pub fn apply(&self, env: &ScriptEnvironment, args: &[Atom]) -> Result<Applied, ScriptError> {
        match parse_params(args)? {
            ParamUpdate::Positional(values) => {
                let count = self.bank.set_positional(&values);
                assert_invariant(
                    POSITIONAL_TRUNCATED,
                    count == values.len().min(PARAM_CAPACITY),
                    "positional count is min(argc, capacity)",
                    None,
                );
                log::debug!("set {} params: positional", count);
                Ok(Applied::Positional(count))
            }
            ParamUpdate::Named(pairs) => {
                env.clear_named_params()?;
                for (name, value) in &pairs {
                    env.set_named_param(name, *value)?;
                }
                assert_invariant(
                    NAMED_PARAMS_REPLACED,
                    env.named_params().len() <= pairs.len(),
                    "named table holds only the latest message",
                    None,
                );
                log::debug!("set {} named params", pairs.len());
                Ok(Applied::Named(pairs.len()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    #[test]
    fn positional_truncates_at_capacity() {
        let bank = ParamBank::default();
        let values: Vec<f64> = (0..40).map(f64::from).collect();
        assert_eq!(bank.set_positional(&values), PARAM_CAPACITY);
        assert_eq!(bank.count(), PARAM_CAPACITY);
        assert_eq!(bank.get(31), Some(31.0));
    }

    #[test]
    fn single_set_extends_count() {
        let bank = ParamBank::default();
        bank.set_positional(&[1.0]);
        assert!(bank.set(3, 0.5));
        assert_eq!(bank.count(), 4);
        assert!(bank.set(0, 2.0));
        assert_eq!(bank.count(), 4);
        assert!(!bank.set(PARAM_CAPACITY, 1.0));
    }

    #[test]
    fn snapshot_copies_active_slots_only() {
        let bank = ParamBank::default();
        bank.set_positional(&[0.1, 0.2, 0.3]);
        bank.set_positional(&[0.9]);
        let mut out = [0.0; PARAM_CAPACITY];
        assert_eq!(bank.snapshot(&mut out), 1);
        assert_eq!(out[0], 0.9);
    }

    #[test]
    fn grammar_selects_positional() {
        let args = vec![Atom::Int(10), Atom::Float(0.1), Atom::Int(4)];
        assert_eq!(
            parse_params(&args).unwrap(),
            ParamUpdate::Positional(vec![10.0, 0.1, 4.0])
        );
    }

    #[test]
    fn grammar_selects_named() {
        let args = vec![Atom::from("delay"), Atom::Int(2), Atom::from("feedback"), Atom::Float(0.5)];
        assert_eq!(
            parse_params(&args).unwrap(),
            ParamUpdate::Named(vec![("delay".into(), 2.0), ("feedback".into(), 0.5)])
        );
    }

    #[test]
    fn grammar_rejects_odd_and_misplaced() {
        let odd = vec![Atom::from("delay"), Atom::Int(2), Atom::from("feedback")];
        assert!(matches!(parse_params(&odd), Err(ScriptError::NamedParamGrammar(_))));

        let swapped = vec![Atom::Int(2), Atom::from("delay")];
        assert!(matches!(parse_params(&swapped), Err(ScriptError::NamedParamGrammar(_))));

        let bad_value = vec![Atom::from("a"), Atom::from("b")];
        assert!(matches!(parse_params(&bad_value), Err(ScriptError::NamedParamGrammar(_))));
    }

    #[test]
    fn named_message_replaces_table() {
        let env = ScriptEnvironment::create(GcConfig::default()).unwrap();
        let store = ParamStore::new();
        store
            .apply(&env, &[Atom::from("A"), Atom::Int(1), Atom::from("B"), Atom::Int(2)])
            .unwrap();
        store.apply(&env, &[Atom::from("C"), Atom::Int(3)]).unwrap();
        assert_eq!(env.named_params(), vec![("C".to_string(), 3.0)]);
    }

    #[test]
    fn rejected_message_changes_nothing() {
        let env = ScriptEnvironment::create(GcConfig::default()).unwrap();
        let store = ParamStore::new();
        store.apply(&env, &[Atom::from("A"), Atom::Int(1)]).unwrap();
        store.apply(&env, &[Atom::Float(0.5)]).unwrap();

        let err = store.apply(&env, &[Atom::from("B"), Atom::Int(2), Atom::from("C")]);
        assert!(err.is_err());
        assert_eq!(env.named_params(), vec![("A".to_string(), 1.0)]);
        assert_eq!(store.bank().count(), 1);
    }

    #[test]
    fn writer_shares_the_bank() {
        let store = ParamStore::new();
        let writer = store.writer();
        std::thread::spawn(move || {
            writer.set_all(&[0.25, 0.75]);
        })
        .join()
        .unwrap();
        assert_eq!(store.bank().count(), 2);
        assert_eq!(store.bank().get(1), Some(0.75));
    }
}

//! Control-surface messages.
//!
//! These are what a host delivers to the control context: bare numbers,
//! lists, symbol-led messages and bang. They never reach the audio callback.

/// A single message argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Symbol (name).
    Symbol(String),
}

impl Atom {
    /// Shorthand for a symbol atom.
    pub fn symbol(name: impl Into<String>) -> Self {
        Atom::Symbol(name.into())
    }

    /// Numeric value, if this atom is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Atom::Int(i) => Some(*i as f64),
            Atom::Float(f) => Some(*f),
            Atom::Symbol(_) => None,
        }
    }

    /// Symbol name, if this atom is a symbol.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Atom::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this atom is a number.
    pub fn is_number(&self) -> bool {
        self.as_number().is_some()
    }
}

impl From<f64> for Atom {
    fn from(value: f64) -> Self {
        Atom::Float(value)
    }
}

impl From<i64> for Atom {
    fn from(value: i64) -> Self {
        Atom::Int(value)
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Atom::Symbol(value.to_string())
    }
}

/// Messages handled by the control context.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Reload the current source and re-resolve the current function.
    Bang,

    /// A single number arriving on an inlet. Sets `param[inlet]`.
    Float {
        /// Inlet index (0 = leftmost).
        inlet: usize,
        /// Value.
        value: f64,
    },

    /// A list: positional numbers or named pairs.
    List(Vec<Atom>),

    /// Symbol-led message: function switch, optionally with parameters, or
    /// a named-parameter list whose first name is the selector.
    Anything {
        /// Leading symbol.
        selector: String,
        /// Remaining arguments.
        args: Vec<Atom>,
    },
}

impl Message {
    /// Single number on the leftmost inlet.
    pub fn float(value: f64) -> Self {
        Message::Float { inlet: 0, value }
    }

    /// Symbol-led message.
    pub fn anything(selector: impl Into<String>, args: Vec<Atom>) -> Self {
        Message::Anything {
            selector: selector.into(),
            args,
        }
    }

    /// Returns a human-readable description (for logging).
    pub fn description(&self) -> &'static str {
        match self {
            Message::Bang => "Bang",
            Message::Float { .. } => "Float",
            Message::List(_) => "List",
            Message::Anything { .. } => "Anything",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atoms_classify() {
        assert_eq!(Atom::Int(3).as_number(), Some(3.0));
        assert_eq!(Atom::from(0.5).as_number(), Some(0.5));
        assert_eq!(Atom::from("gain").as_symbol(), Some("gain"));
        assert!(!Atom::symbol("gain").is_number());
    }

    #[test]
    fn constructors() {
        assert_eq!(Message::float(1.0), Message::Float { inlet: 0, value: 1.0 });
        let msg = Message::anything("lowpass", vec![Atom::Float(0.3)]);
        assert_eq!(msg.description(), "Anything");
    }
}

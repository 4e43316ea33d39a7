//! The tagged value type a command dispatcher passes to and receives from
//! core operations. The dispatcher itself (the scripting front-end that
//! parses `tnew`/`tdel`/`ctlconf`-style statements and looks up named
//! arguments) lives outside this crate; what belongs here is the value
//! contract those calls trade in, since [`crate::song::Song`]'s methods
//! are the thing a dispatcher ultimately calls.
//!
//! Grounded on `examples/original_source/data.h`'s `struct data` (`DATA_NIL,
//! DATA_LONG, DATA_STRING, DATA_REF, DATA_LIST, DATA_USER, DATA_RANGE`
//! tagged union, one-way-linked for lists). `DATA_USER` (an opaque `void *`
//! payload for values the interpreter only round-trips) has no analogue
//! here: every value this crate would ever hand across the boundary is one
//! of the other six kinds.

use std::fmt;

/// One value exchanged between a command dispatcher and the core
/// (`struct data`, minus its `DATA_USER` escape hatch and intrusive `next`
/// link — a `Vec` replaces the linked list for [`Value::List`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Long(i64),
    Str(String),
    /// A name resolved elsewhere (a track/channel/filter/sysex-bank name);
    /// kept as the bare string rather than a resolved [`crate::pool::Handle`]
    /// since the dispatcher, not this crate, owns the resolution step.
    Ref(String),
    List(Vec<Value>),
    Range(i64, i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Long(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Ref(name) => write!(f, "{name}"),
            Value::List(items) => {
                write!(f, "{{")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
            Value::Range(lo, hi) => write!(f, "{lo}:{hi}"),
        }
    }
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// `data_eval`'s boolean coercion: nil and the long `0` are falsy,
    /// everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Long(0))
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Ref(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_and_zero_are_falsy_everything_else_is_truthy() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Long(0).is_truthy());
        assert!(Value::Long(1).is_truthy());
        assert!(Value::Str(String::new()).is_truthy());
    }

    #[test]
    fn display_renders_a_list_as_brace_delimited_values() {
        let v = Value::List(vec![Value::Long(1), Value::Str("x".into())]);
        assert_eq!(v.to_string(), r#"{1 "x"}"#);
    }
}

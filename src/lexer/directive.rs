// Skein Directives
// `#name literal;` markers that configure the running thread

use crate::vm::value::ValueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Directive {
    /// `#trace 1` turns per-action tracing on, `#trace 0` off
    Trace = 0,
    /// `#label "name"` names the thread in diagnostics
    Label = 1,
    /// `#limit n` caps the number of actions the thread may run (0 = no cap)
    Limit = 2,
}

const TABLE: &[(&str, Directive, ValueKind)] = &[
    ("trace", Directive::Trace, ValueKind::Int),
    ("label", Directive::Label, ValueKind::Str),
    ("limit", Directive::Limit, ValueKind::Int),
];

impl Directive {
    pub fn from_name(name: &str) -> Option<Self> {
        TABLE.iter().find(|(n, _, _)| *n == name).map(|(_, d, _)| *d)
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        TABLE.iter().find(|(_, d, _)| *d as u8 == byte).map(|(_, d, _)| *d)
    }

    pub fn name(&self) -> &'static str {
        TABLE
            .iter()
            .find(|(_, d, _)| d == self)
            .map(|(n, _, _)| *n)
            .unwrap_or("?")
    }

    /// The literal kind the directive's argument must have
    pub fn required_kind(&self) -> ValueKind {
        TABLE
            .iter()
            .find(|(_, d, _)| d == self)
            .map(|(_, _, k)| *k)
            .unwrap_or(ValueKind::Int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup() {
        assert_eq!(Directive::from_name("trace"), Some(Directive::Trace));
        assert_eq!(Directive::from_name("nope"), None);
        assert_eq!(Directive::Label.required_kind(), ValueKind::Str);
        assert_eq!(Directive::from_u8(2), Some(Directive::Limit));
        assert_eq!(Directive::Limit.name(), "limit");
    }
}

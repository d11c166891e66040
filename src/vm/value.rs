// Skein Runtime Values
// A closed tagged union: integers, floats, strings, arrays and structures.
// Composite values are deep-copied on assignment; in-place mutation only
// happens through a value reference (see reference.rs).

use crate::error::{ErrorCode, ScriptError, SkeinResult};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_STRUCTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Const state of a variable or structure field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Constness {
    #[default]
    Mutable = 0,
    /// Declared const, not yet given a value
    Unassigned = 1,
    /// Declared const and assigned; further writes are rejected
    Assigned = 2,
}

impl Constness {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Constness::Mutable),
            1 => Some(Constness::Unassigned),
            2 => Some(Constness::Assigned),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        !matches!(self, Constness::Mutable)
    }

    /// Apply one write; returns the new state or `None` if the write is rejected
    pub fn after_write(self) -> Option<Self> {
        match self {
            Constness::Mutable => Some(Constness::Mutable),
            Constness::Unassigned => Some(Constness::Assigned),
            Constness::Assigned => None,
        }
    }
}

/// One named field of a structure
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
    pub constness: Constness,
}

/// Ordered name -> value map with per-field const flags.
/// Equality is by identity: copies of one structure share its id.
#[derive(Debug, Clone)]
pub struct Structure {
    id: u64,
    pub is_static: bool,
    pub fields: Vec<Field>,
}

impl Structure {
    pub fn new(is_static: bool) -> Self {
        Self {
            id: NEXT_STRUCTURE_ID.fetch_add(1, AtomicOrdering::Relaxed),
            is_static,
            fields: Vec::new(),
        }
    }

    /// Rebuild a structure with a known identity (used when loading snapshots)
    pub fn with_id(id: u64, is_static: bool, fields: Vec<Field>) -> Self {
        NEXT_STRUCTURE_ID.fetch_max(id + 1, AtomicOrdering::Relaxed);
        Self {
            id,
            is_static,
            fields,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Declare a field while building a literal; later duplicates replace earlier ones
    pub fn declare(&mut self, name: impl Into<String>, value: Value, constness: Constness) {
        let name = name.into();
        let constness = match constness {
            Constness::Unassigned => Constness::Assigned,
            other => other,
        };
        match self.field_mut(&name) {
            Some(field) => {
                field.value = value;
                field.constness = constness;
            }
            None => self.fields.push(Field {
                name,
                value,
                constness,
            }),
        }
    }

    /// Write a field from script code: honors const fields and the static flag
    pub fn assign(&mut self, name: &str, value: Value) -> SkeinResult<()> {
        let is_static = self.is_static;
        match self.field_mut(name) {
            Some(field) => {
                field.constness = field.constness.after_write().ok_or_else(|| {
                    ScriptError::runtime(
                        ErrorCode::ConstViolation,
                        format!("Cannot assign to constant field '{}'", name),
                    )
                })?;
                field.value = value;
                Ok(())
            }
            None if is_static => Err(ScriptError::runtime(
                ErrorCode::BadAccessor,
                format!("Cannot add field '{}' to a static structure", name),
            )),
            None => {
                self.fields.push(Field {
                    name: name.to_string(),
                    value,
                    constness: Constness::Mutable,
                });
                Ok(())
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

impl PartialEq for Structure {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// The kind tag of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Int = 0,
    Float = 1,
    Str = 2,
    Array = 3,
    Structure = 4,
}

impl ValueKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ValueKind::Int),
            1 => Some(ValueKind::Float),
            2 => Some(ValueKind::Str),
            3 => Some(ValueKind::Array),
            4 => Some(ValueKind::Structure),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::Array => "array",
            ValueKind::Structure => "structure",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime value types
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Structure(Structure),
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Array(_) => ValueKind::Array,
            Value::Structure(_) => ValueKind::Structure,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn from_bool(b: bool) -> Self {
        Value::Int(b as i64)
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Truthiness: non-zero numbers, non-empty strings and arrays, every structure
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Structure(_) => true,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&Structure> {
        match self {
            Value::Structure(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric conversion used by `int(...)`: floats truncate, strings parse
    pub fn to_int(&self) -> SkeinResult<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(n) => Ok(*n as i64),
            Value::Str(s) => {
                let trimmed = s.trim();
                if let Some(hex) = trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                {
                    return i64::from_str_radix(hex, 16).map_err(|_| {
                        ScriptError::bad_operand(format!("Cannot convert '{}' to int", s))
                    });
                }
                trimmed
                    .parse::<i64>()
                    .or_else(|_| trimmed.parse::<f64>().map(|f| f as i64))
                    .map_err(|_| ScriptError::bad_operand(format!("Cannot convert '{}' to int", s)))
            }
            other => Err(ScriptError::bad_operand(format!(
                "Cannot convert {} to int",
                other.type_name()
            ))),
        }
    }

    pub fn to_float(&self) -> SkeinResult<f64> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(n) => Ok(*n),
            Value::Str(s) => s.trim().parse::<f64>().map_err(|_| {
                ScriptError::bad_operand(format!("Cannot convert '{}' to float", s))
            }),
            other => Err(ScriptError::bad_operand(format!(
                "Cannot convert {} to float",
                other.type_name()
            ))),
        }
    }

    /// Number of elements for arrays, characters for strings, fields for structures
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            Value::Structure(s) => Some(s.len()),
            _ => None,
        }
    }

    /// Equality as seen by `==` and `switch`: numbers compare across int/float,
    /// strings and arrays compare by content, structures by identity
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_float() == other.as_float()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Structure(a), Value::Structure(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering for relational operators; only numbers and strings are ordered
    pub fn compare(&self, other: &Value) -> SkeinResult<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let (a, b) = (self.as_float().unwrap_or(0.0), other.as_float().unwrap_or(0.0));
                a.partial_cmp(&b).ok_or_else(|| {
                    ScriptError::bad_operand("Cannot order NaN values")
                })
            }
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Ok(ord),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(ScriptError::bad_operand(format!(
                "Cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Read an element by integer index (arrays and strings)
    pub fn index(&self, index: &Value) -> SkeinResult<Value> {
        match self {
            Value::Array(items) => {
                let at = checked_index(index, items.len())?;
                Ok(items[at].clone())
            }
            Value::Str(s) => {
                let count = s.chars().count();
                let at = checked_index(index, count)?;
                Ok(Value::Str(s.chars().nth(at).map(String::from).unwrap_or_default()))
            }
            Value::Structure(st) => match index {
                Value::Str(name) => self.field(name),
                _ => st
                    .fields
                    .get(checked_index(index, st.len())?)
                    .map(|f| f.value.clone())
                    .ok_or_else(|| ScriptError::runtime(ErrorCode::IndexOutOfBounds, "Field index out of bounds")),
            },
            other => Err(ScriptError::runtime(
                ErrorCode::BadAccessor,
                format!("Cannot index into {}", other.type_name()),
            )),
        }
    }

    /// Read a structure field by name
    pub fn field(&self, name: &str) -> SkeinResult<Value> {
        match self {
            Value::Structure(st) => st.get(name).cloned().ok_or_else(|| {
                ScriptError::runtime(
                    ErrorCode::BadAccessor,
                    format!("Structure has no field '{}'", name),
                )
            }),
            other => Err(ScriptError::runtime(
                ErrorCode::BadAccessor,
                format!("Cannot read field '{}' of {}", name, other.type_name()),
            )),
        }
    }

    /// Render for string conversion: strings are raw at the top level
    pub fn render(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Render with strings quoted, as they appear inside arrays
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("\"{}\"", escape(s)),
            other => other.to_string(),
        }
    }

    fn write_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "\"{}\"", escape(s)),
            other => write!(f, "{}", other),
        }
    }
}

/// Validate an index value against a length
pub fn checked_index(index: &Value, len: usize) -> SkeinResult<usize> {
    let raw = match index {
        Value::Int(n) => *n,
        Value::Float(n) if n.fract() == 0.0 => *n as i64,
        other => {
            return Err(ScriptError::runtime(
                ErrorCode::BadAccessor,
                format!("Index must be an int, got {}", other.type_name()),
            ))
        }
    };
    if len == 0 {
        return Err(ScriptError::runtime(
            ErrorCode::EmptyIndex,
            format!("Cannot index an empty value (index {})", raw),
        ));
    }
    if raw < 0 || raw as usize >= len {
        return Err(ScriptError::runtime(
            ErrorCode::IndexOutOfBounds,
            format!("Index {} out of bounds for length {}", raw, len),
        ));
    }
    Ok(raw as usize)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

/// Structural equality for tests and caches. Script-level `==` uses `equals`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Structure(a), Value::Structure(b)) => {
                a.is_static == b.is_static && a.fields == b.fields
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.write_nested(f)?;
                }
                write!(f, "]")
            }
            Value::Structure(st) => {
                if st.is_static {
                    write!(f, "static ")?;
                }
                write!(f, "{{")?;
                for (i, field) in st.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if field.constness.is_const() {
                        write!(f, "const ")?;
                    }
                    write!(f, "{}=", field.name)?;
                    field.value.write_nested(f)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Value {
        let mut st = Structure::new(false);
        st.declare("x", Value::Int(1), Constness::Mutable);
        st.declare("y", Value::Int(2), Constness::Unassigned);
        Value::Structure(st)
    }

    #[test]
    fn test_truthiness_is_consistent() {
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-3).is_truthy());
        assert!(Value::Float(0.25).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("0").is_truthy());
        assert!(!Value::Array(vec![]).is_truthy());
        assert!(point().is_truthy());
    }

    #[test]
    fn test_equality_across_numbers_and_identity() {
        assert!(Value::Int(2).equals(&Value::Float(2.0)));
        assert!(!Value::Int(2).equals(&Value::str("2")));
        let a = point();
        let copy = a.clone();
        assert!(a.equals(&copy));
        assert!(!a.equals(&point()));
    }

    #[test]
    fn test_rendering() {
        let arr = Value::Array(vec![Value::Int(1), Value::Float(2.0), Value::str("a\"b")]);
        assert_eq!(arr.to_string(), "[1, 2.0, \"a\\\"b\"]");
        assert_eq!(point().to_string(), "{x=1, const y=2}");
        assert_eq!(Value::str("plain").render(), "plain");
    }

    #[test]
    fn test_index_errors() {
        let empty = Value::Array(vec![]);
        let err = empty.index(&Value::Int(0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::EmptyIndex);

        let arr = Value::Array(vec![Value::Int(5)]);
        let err = arr.index(&Value::Int(3)).unwrap_err();
        assert_eq!(err.code, ErrorCode::IndexOutOfBounds);
        assert_eq!(Value::str("abc").index(&Value::Int(1)).unwrap(), Value::str("b"));
    }

    #[test]
    fn test_structure_assign_rules() {
        let mut st = Structure::new(true);
        st.declare("k", Value::Int(1), Constness::Unassigned);
        st.declare("m", Value::Int(1), Constness::Mutable);
        assert_eq!(
            st.assign("k", Value::Int(2)).unwrap_err().code,
            ErrorCode::ConstViolation
        );
        assert!(st.assign("m", Value::Int(9)).is_ok());
        assert_eq!(
            st.assign("extra", Value::Int(0)).unwrap_err().code,
            ErrorCode::BadAccessor
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::str(" 42 ").to_int().unwrap(), 42);
        assert_eq!(Value::str("0x1F").to_int().unwrap(), 31);
        assert_eq!(Value::Float(3.9).to_int().unwrap(), 3);
        assert!(Value::str("nope").to_float().is_err());
    }
}

// Skein Value References
// A value plus the route back to the variable that owns it: which table
// (global, thread-local or an inline call's scope), which slot, and the
// chain of index/field steps below it. References are resolved to a slot
// only when a write happens and are never kept across a pause.

use super::value::{checked_index, Constness, Value};
use super::variable::Variable;
use crate::error::{ErrorCode, ScriptError, SkeinResult};
use smallvec::SmallVec;
use std::fmt;

/// One step of an accessor chain
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Index(i64),
    Field(String),
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Index(i) => write!(f, "[{}]", i),
            Accessor::Field(name) => write!(f, ".{}", name),
        }
    }
}

pub type AccessChain = SmallVec<[Accessor; 4]>;

/// Which variable arena a reference points into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Global(u32),
    Local(u32),
    /// Slot in the scope of the inline call at `depth` (0 = outermost call)
    Frame { depth: u32, slot: u32 },
}

impl Origin {
    pub fn is_global(&self) -> bool {
        matches!(self, Origin::Global(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefTarget {
    pub origin: Origin,
    pub chain: AccessChain,
}

/// A stack item: a value, optionally assignable through `target`
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRef {
    pub value: Value,
    pub target: Option<Box<RefTarget>>,
}

impl ValueRef {
    /// A plain value with no owning variable
    pub fn rvalue(value: Value) -> Self {
        Self {
            value,
            target: None,
        }
    }

    pub fn variable(origin: Origin, value: Value) -> Self {
        Self {
            value,
            target: Some(Box::new(RefTarget {
                origin,
                chain: AccessChain::new(),
            })),
        }
    }

    pub fn is_assignable(&self) -> bool {
        self.target.is_some()
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Like `access`, but a missing field of a non-static structure
    /// variable resolves to a placeholder so a following `Set` can add it
    pub fn access_slot(self, key: &Value) -> SkeinResult<ValueRef> {
        let missing = match (&self.value, key) {
            (Value::Structure(st), Value::Str(name)) => !st.is_static && st.get(name).is_none(),
            _ => false,
        };
        match (missing, key, self.target) {
            (true, Value::Str(name), Some(mut target)) => {
                target.chain.push(Accessor::Field(name.clone()));
                Ok(ValueRef {
                    value: Value::Int(0),
                    target: Some(target),
                })
            }
            (_, _, target) => ValueRef {
                value: self.value,
                target,
            }
            .access(key),
        }
    }

    /// Step into an element or field, extending the chain if assignable
    pub fn access(self, key: &Value) -> SkeinResult<ValueRef> {
        let (value, step) = match (&self.value, key) {
            (Value::Structure(_), Value::Str(name)) => {
                (self.value.field(name)?, Accessor::Field(name.clone()))
            }
            (_, Value::Str(name)) => {
                return Err(ScriptError::runtime(
                    ErrorCode::BadAccessor,
                    format!(
                        "Cannot read field '{}' of {}",
                        name,
                        self.value.type_name()
                    ),
                ))
            }
            _ => {
                let element = self.value.index(key)?;
                let at = key.as_int().unwrap_or_else(|| key.as_float().unwrap_or(0.0) as i64);
                (element, Accessor::Index(at))
            }
        };
        let target = self.target.map(|mut t| {
            t.chain.push(step);
            t
        });
        Ok(ValueRef { value, target })
    }
}

/// Replay a chain from a root value, returning the sub-value it reaches
pub fn resolve(root: &Value, chain: &[Accessor]) -> SkeinResult<Value> {
    let mut current = root.clone();
    for step in chain {
        current = match step {
            Accessor::Index(i) => current.index(&Value::Int(*i))?,
            Accessor::Field(name) => current.field(name)?,
        };
    }
    Ok(current)
}

/// Write `value` into `var` through `chain`
pub fn write_through(var: &mut Variable, chain: &[Accessor], value: Value) -> SkeinResult<()> {
    if chain.is_empty() {
        return var.assign(value);
    }
    if var.constness == Constness::Assigned {
        return Err(ScriptError::runtime(
            ErrorCode::ConstViolation,
            format!("Cannot modify part of constant '{}'", var.name),
        ));
    }
    write_into(&mut var.value, chain, value)
}

fn write_into(target: &mut Value, chain: &[Accessor], value: Value) -> SkeinResult<()> {
    let Some((step, rest)) = chain.split_first() else {
        *target = value;
        return Ok(());
    };

    match (step, target) {
        (Accessor::Index(i), Value::Array(items)) => {
            let at = checked_index(&Value::Int(*i), items.len())?;
            write_into(&mut items[at], rest, value)
        }
        (Accessor::Index(i), Value::Str(s)) if rest.is_empty() => {
            let at = checked_index(&Value::Int(*i), s.chars().count())?;
            let replacement = value.render();
            *s = s
                .chars()
                .enumerate()
                .map(|(n, c)| if n == at { replacement.clone() } else { c.to_string() })
                .collect();
            Ok(())
        }
        (Accessor::Index(i), Value::Structure(st)) => {
            let at = checked_index(&Value::Int(*i), st.len())?;
            let field = &mut st.fields[at];
            if rest.is_empty() {
                field.constness = field.constness.after_write().ok_or_else(|| {
                    ScriptError::runtime(
                        ErrorCode::ConstViolation,
                        format!("Cannot assign to constant field '{}'", field.name),
                    )
                })?;
                field.value = value;
                Ok(())
            } else if field.constness == Constness::Assigned {
                Err(ScriptError::runtime(
                    ErrorCode::ConstViolation,
                    format!("Cannot modify part of constant field '{}'", field.name),
                ))
            } else {
                write_into(&mut field.value, rest, value)
            }
        }
        (Accessor::Field(name), Value::Structure(st)) => {
            if rest.is_empty() {
                return st.assign(name, value);
            }
            let field = st.field_mut(name).ok_or_else(|| {
                ScriptError::runtime(
                    ErrorCode::BadAccessor,
                    format!("Structure has no field '{}'", name),
                )
            })?;
            if field.constness == Constness::Assigned {
                return Err(ScriptError::runtime(
                    ErrorCode::ConstViolation,
                    format!("Cannot modify part of constant field '{}'", name),
                ));
            }
            write_into(&mut field.value, rest, value)
        }
        (step, other) => Err(ScriptError::runtime(
            ErrorCode::BadAccessor,
            format!("Cannot assign through {} on {}", step, other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::value::Structure;

    fn nested() -> Value {
        let mut inner = Structure::new(false);
        inner.declare("b", Value::Array(vec![Value::Int(1), Value::Int(2)]), Constness::Mutable);
        Value::Array(vec![Value::Int(0), Value::Structure(inner)])
    }

    #[test]
    fn test_chain_replays_to_same_value() {
        let root = ValueRef::variable(Origin::Local(0), nested());
        let r = root
            .access(&Value::Int(1))
            .and_then(|r| r.access(&Value::str("b")))
            .and_then(|r| r.access(&Value::Int(1)))
            .unwrap();
        assert_eq!(r.value, Value::Int(2));
        let target = r.target.unwrap();
        assert_eq!(target.chain.len(), 3);
        assert_eq!(resolve(&nested(), &target.chain).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_write_through_deep_chain() {
        let mut var = Variable::new("a", nested(), Constness::Mutable);
        let chain = [
            Accessor::Index(1),
            Accessor::Field("b".into()),
            Accessor::Index(0),
        ];
        write_through(&mut var, &chain, Value::Int(9)).unwrap();
        assert_eq!(resolve(&var.value, &chain).unwrap(), Value::Int(9));
        assert_eq!(resolve(&var.value, &chain[..2]).unwrap().to_string(), "[9, 2]");
    }

    #[test]
    fn test_write_into_const_variable_rejected() {
        let mut var = Variable::new("c", nested(), Constness::Assigned);
        let err = write_through(&mut var, &[Accessor::Index(0)], Value::Int(1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConstViolation);
    }

    #[test]
    fn test_string_element_write() {
        let mut var = Variable::new("s", Value::str("cat"), Constness::Mutable);
        write_through(&mut var, &[Accessor::Index(0)], Value::str("b")).unwrap();
        assert_eq!(var.value, Value::str("bat"));
    }

    #[test]
    fn test_rvalue_access_has_no_target() {
        let r = ValueRef::rvalue(nested()).access(&Value::Int(0)).unwrap();
        assert!(!r.is_assignable());
        assert_eq!(r.value, Value::Int(0));
    }
}

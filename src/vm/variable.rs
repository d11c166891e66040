// Skein Variables
// Named slots with const state, kept in index-addressed tables

use super::value::{Constness, Value};
use crate::error::{ErrorCode, ScriptError, SkeinResult};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    pub constness: Constness,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Value, constness: Constness) -> Self {
        Self {
            name: name.into(),
            value,
            constness,
        }
    }

    /// Whole-value write; moves a const from unassigned to assigned
    pub fn assign(&mut self, value: Value) -> SkeinResult<()> {
        self.constness = self.constness.after_write().ok_or_else(|| {
            ScriptError::runtime(
                ErrorCode::ConstViolation,
                format!("Cannot assign to constant '{}'", self.name),
            )
        })?;
        self.value = value;
        Ok(())
    }
}

/// An arena of variables addressed by slot, with a name index
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    slots: Vec<Variable>,
    names: FxHashMap<String, usize>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable. Redeclaring an existing name resets it in place,
    /// keeping its slot so outstanding slot numbers stay valid.
    pub fn declare(&mut self, name: &str, value: Value, constness: Constness) -> usize {
        if let Some(&slot) = self.names.get(name) {
            let var = &mut self.slots[slot];
            var.value = value;
            var.constness = constness;
            return slot;
        }
        let slot = self.slots.len();
        self.slots.push(Variable::new(name, value, constness));
        self.names.insert(name.to_string(), slot);
        slot
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn get(&self, slot: usize) -> Option<&Variable> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Variable> {
        self.slots.get_mut(slot)
    }

    pub fn by_name(&self, name: &str) -> Option<&Variable> {
        self.lookup(name).and_then(|slot| self.slots.get(slot))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.slots.iter()
    }

    /// Rebuild a table from variables in slot order
    pub fn from_variables(vars: Vec<Variable>) -> Self {
        let mut table = Self::new();
        for var in vars {
            let slot = table.slots.len();
            table.names.insert(var.name.clone(), slot);
            table.slots.push(var);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_transitions() {
        let mut var = Variable::new("k", Value::Int(0), Constness::Unassigned);
        assert!(var.assign(Value::Int(1)).is_ok());
        assert_eq!(var.constness, Constness::Assigned);
        let err = var.assign(Value::Int(2)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConstViolation);
        assert_eq!(var.value, Value::Int(1));
    }

    #[test]
    fn test_redeclare_keeps_slot() {
        let mut table = VariableTable::new();
        let a = table.declare("a", Value::Int(1), Constness::Mutable);
        let b = table.declare("b", Value::Int(2), Constness::Mutable);
        let again = table.declare("a", Value::Int(7), Constness::Unassigned);
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(table.by_name("a").map(|v| v.value.clone()), Some(Value::Int(7)));
        assert_eq!(table.len(), 2);
    }
}

// Skein Operators
// Unary and binary operators with per-kind dispatch over Value.
// The same functions back runtime execution and compile-time folding.

use super::value::Value;
use crate::error::{ErrorCode, ScriptError, SkeinResult};
use std::cmp::Ordering;
use std::fmt;

/// Largest string an operator may build, in bytes
pub const MAX_STRING_BYTES: usize = 16 * 1024 * 1024;

/// Binary operators, ordered by their wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinaryOp {
    Mul = 0,
    Div = 1,
    Mod = 2,
    Add = 3,
    Sub = 4,
    Shl = 5,
    Shr = 6,
    BitAnd = 7,
    BitXor = 8,
    BitOr = 9,
    Less = 10,
    LessEqual = 11,
    Greater = 12,
    GreaterEqual = 13,
    Equal = 14,
    NotEqual = 15,
    And = 16,
    Or = 17,
}

impl BinaryOp {
    pub fn from_u8(byte: u8) -> Option<Self> {
        use BinaryOp::*;
        let all = [
            Mul, Div, Mod, Add, Sub, Shl, Shr, BitAnd, BitXor, BitOr, Less, LessEqual, Greater,
            GreaterEqual, Equal, NotEqual, And, Or,
        ];
        all.get(byte as usize).copied()
    }

    /// Binding priority: lower binds tighter, the high nibble is the class
    pub fn priority(&self) -> u8 {
        match self {
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 0x10,
            BinaryOp::Add | BinaryOp::Sub => 0x20,
            BinaryOp::Shl | BinaryOp::Shr => 0x30,
            BinaryOp::BitAnd => 0x40,
            BinaryOp::BitXor => 0x41,
            BinaryOp::BitOr => 0x42,
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                0x50
            }
            BinaryOp::Equal | BinaryOp::NotEqual => 0x51,
            BinaryOp::And => 0x60,
            BinaryOp::Or => 0x61,
        }
    }

    pub fn class(&self) -> u8 {
        self.priority() >> 4
    }

    pub fn is_short_circuit(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Apply the operator to two resolved values
    pub fn apply(&self, left: &Value, right: &Value) -> SkeinResult<Value> {
        match self {
            BinaryOp::Add => add(left, right),
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                arithmetic(*self, left, right)
            }
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitXor | BinaryOp::BitOr => {
                bitwise(*self, left, right)
            }
            BinaryOp::Less => Ok(Value::from_bool(left.compare(right)? == Ordering::Less)),
            BinaryOp::LessEqual => Ok(Value::from_bool(left.compare(right)? != Ordering::Greater)),
            BinaryOp::Greater => Ok(Value::from_bool(left.compare(right)? == Ordering::Greater)),
            BinaryOp::GreaterEqual => Ok(Value::from_bool(left.compare(right)? != Ordering::Less)),
            BinaryOp::Equal => Ok(Value::from_bool(left.equals(right))),
            BinaryOp::NotEqual => Ok(Value::from_bool(!left.equals(right))),
            // Short-circuit result: the last operand that decided the outcome
            BinaryOp::And => Ok(if left.is_truthy() {
                right.clone()
            } else {
                left.clone()
            }),
            BinaryOp::Or => Ok(if left.is_truthy() {
                left.clone()
            } else {
                right.clone()
            }),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Unary prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnaryOp {
    Negate = 0,
    Plus = 1,
    Not = 2,
    BitNot = 3,
}

impl UnaryOp {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(UnaryOp::Negate),
            1 => Some(UnaryOp::Plus),
            2 => Some(UnaryOp::Not),
            3 => Some(UnaryOp::BitNot),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }

    pub fn apply(&self, operand: &Value) -> SkeinResult<Value> {
        match (self, operand) {
            (UnaryOp::Negate, Value::Int(n)) => Ok(Value::Int(n.wrapping_neg())),
            (UnaryOp::Negate, Value::Float(n)) => Ok(Value::Float(-n)),
            (UnaryOp::Plus, Value::Int(_) | Value::Float(_)) => Ok(operand.clone()),
            (UnaryOp::Not, v) => Ok(Value::from_bool(!v.is_truthy())),
            (UnaryOp::BitNot, Value::Int(n)) => Ok(Value::Int(!n)),
            (op, v) => Err(ScriptError::bad_operand(format!(
                "Operator '{}' cannot be applied to {}",
                op.symbol(),
                v.type_name()
            ))),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

fn add(left: &Value, right: &Value) -> SkeinResult<Value> {
    match (left, right) {
        (Value::Str(a), b) => {
            let tail = b.render();
            check_string_len(a.len().checked_add(tail.len()))?;
            let mut out = a.clone();
            out.push_str(&tail);
            Ok(Value::Str(out))
        }
        (a, Value::Str(b)) if a.is_number() => {
            let head = a.render();
            check_string_len(head.len().checked_add(b.len()))?;
            Ok(Value::Str(format!("{}{}", head, b)))
        }
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Array(out))
        }
        (Value::Array(a), b) => {
            let mut out = a.clone();
            out.push(b.clone());
            Ok(Value::Array(out))
        }
        _ => arithmetic(BinaryOp::Add, left, right),
    }
}

fn check_string_len(len: Option<usize>) -> SkeinResult<()> {
    match len {
        Some(len) if len <= MAX_STRING_BYTES => Ok(()),
        _ => Err(ScriptError::bad_operand(format!(
            "String result would exceed {} bytes",
            MAX_STRING_BYTES
        ))),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> SkeinResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = left.as_float().unwrap_or_default();
            let b = right.as_float().unwrap_or_default();
            float_arithmetic(op, a, b)
        }
        (Value::Str(s), Value::Int(n)) if op == BinaryOp::Mul => {
            if *n < 0 {
                return Err(ScriptError::bad_operand("Cannot repeat a string a negative number of times"));
            }
            let count = usize::try_from(*n).unwrap_or(usize::MAX);
            check_string_len(s.len().checked_mul(count))?;
            Ok(Value::Str(s.repeat(count)))
        }
        _ => Err(operand_error(op, left, right)),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> SkeinResult<Value> {
    let result = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(division_by_zero());
            }
            a.wrapping_div(b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(division_by_zero());
            }
            a.wrapping_rem(b)
        }
        _ => return Err(operand_error(op, &Value::Int(a), &Value::Int(b))),
    };
    Ok(Value::Int(result))
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> SkeinResult<Value> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(division_by_zero());
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(division_by_zero());
            }
            a % b
        }
        _ => return Err(operand_error(op, &Value::Float(a), &Value::Float(b))),
    };
    Ok(Value::Float(result))
}

fn bitwise(op: BinaryOp, left: &Value, right: &Value) -> SkeinResult<Value> {
    let (a, b) = match (left, right) {
        (Value::Int(a), Value::Int(b)) => (*a, *b),
        _ => return Err(operand_error(op, left, right)),
    };
    let result = match op {
        BinaryOp::Shl | BinaryOp::Shr => {
            if !(0..64).contains(&b) {
                return Err(ScriptError::bad_operand(format!(
                    "Shift amount {} out of range 0..63",
                    b
                )));
            }
            if op == BinaryOp::Shl {
                a.wrapping_shl(b as u32)
            } else {
                a.wrapping_shr(b as u32)
            }
        }
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::BitOr => a | b,
        _ => return Err(operand_error(op, left, right)),
    };
    Ok(Value::Int(result))
}

fn division_by_zero() -> ScriptError {
    ScriptError::runtime(ErrorCode::DivisionByZero, "Division by zero")
}

fn operand_error(op: BinaryOp, left: &Value, right: &Value) -> ScriptError {
    ScriptError::bad_operand(format!(
        "Operator '{}' cannot be applied to {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_and_float_arithmetic() {
        assert_eq!(BinaryOp::Add.apply(&Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(BinaryOp::Div.apply(&Value::Int(7), &Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(
            BinaryOp::Mul.apply(&Value::Int(2), &Value::Float(1.5)).unwrap(),
            Value::Float(3.0)
        );
        let err = BinaryOp::Mod.apply(&Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::DivisionByZero);
    }

    #[test]
    fn test_string_and_array_add() {
        assert_eq!(
            BinaryOp::Add.apply(&Value::str("n="), &Value::Int(4)).unwrap(),
            Value::str("n=4")
        );
        assert_eq!(
            BinaryOp::Add.apply(&Value::Int(4), &Value::str("x")).unwrap(),
            Value::str("4x")
        );
        let joined = BinaryOp::Add
            .apply(&Value::Array(vec![Value::Int(1)]), &Value::Array(vec![Value::Int(2)]))
            .unwrap();
        assert_eq!(joined, Value::Array(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(
            BinaryOp::Mul.apply(&Value::str("ab"), &Value::Int(3)).unwrap(),
            Value::str("ababab")
        );
    }

    #[test]
    fn test_string_growth_is_bounded() {
        let err = BinaryOp::Mul.apply(&Value::str("ab"), &Value::Int(i64::MAX)).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadOperand);
        let half = Value::Str("x".repeat(MAX_STRING_BYTES / 2 + 1));
        let err = BinaryOp::Add.apply(&half, &half).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadOperand);
        let exact = BinaryOp::Mul.apply(&Value::str("x"), &Value::Int(MAX_STRING_BYTES as i64)).unwrap();
        assert!(matches!(exact, Value::Str(ref s) if s.len() == MAX_STRING_BYTES));
    }

    #[test]
    fn test_comparisons_yield_ints() {
        assert_eq!(BinaryOp::Less.apply(&Value::Int(1), &Value::Float(1.5)).unwrap(), Value::Int(1));
        assert_eq!(
            BinaryOp::GreaterEqual.apply(&Value::str("b"), &Value::str("a")).unwrap(),
            Value::Int(1)
        );
        assert!(BinaryOp::Less.apply(&Value::Int(1), &Value::str("a")).is_err());
        assert_eq!(BinaryOp::NotEqual.apply(&Value::Int(1), &Value::str("1")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_bitwise_and_shift_bounds() {
        assert_eq!(BinaryOp::Shl.apply(&Value::Int(1), &Value::Int(4)).unwrap(), Value::Int(16));
        assert_eq!(BinaryOp::BitXor.apply(&Value::Int(6), &Value::Int(3)).unwrap(), Value::Int(5));
        assert!(BinaryOp::Shr.apply(&Value::Int(1), &Value::Int(64)).is_err());
        assert!(BinaryOp::BitOr.apply(&Value::Float(1.0), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_priority_classes() {
        assert!(BinaryOp::Mul.priority() < BinaryOp::Add.priority());
        assert!(BinaryOp::Add.priority() < BinaryOp::Shl.priority());
        assert!(BinaryOp::BitOr.priority() < BinaryOp::Less.priority());
        assert!(BinaryOp::Equal.priority() < BinaryOp::And.priority());
        assert_eq!(BinaryOp::BitAnd.class(), BinaryOp::BitOr.class());
        for code in 0..18u8 {
            assert_eq!(BinaryOp::from_u8(code).map(|op| op as u8), Some(code));
        }
    }

    #[test]
    fn test_unary() {
        assert_eq!(UnaryOp::Negate.apply(&Value::Int(5)).unwrap(), Value::Int(-5));
        assert_eq!(UnaryOp::Not.apply(&Value::str("")).unwrap(), Value::Int(1));
        assert_eq!(UnaryOp::BitNot.apply(&Value::Int(0)).unwrap(), Value::Int(-1));
        assert!(UnaryOp::Negate.apply(&Value::str("x")).is_err());
    }
}

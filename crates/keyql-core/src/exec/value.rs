use std::borrow::Cow;

use crate::error::{KeyqlError, Result};

/// Runtime value. Keys and values come off the store as bytes; everything
/// else is produced by literals, functions, and operators.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    Json(serde_json::Map<String, serde_json::Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Byte view of string-like values.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Lossy conversion to an integer; strings parse as int then float,
    /// floats truncate, everything else yields `default`.
    pub fn to_int(&self, default: i64) -> i64 {
        match self {
            Value::Int(i) => *i,
            Value::Float(f) => *f as i64,
            Value::Bytes(_) | Value::Str(_) => {
                let s = self.display_string();
                if let Ok(i) = s.parse::<i64>() {
                    i
                } else if let Ok(f) = s.parse::<f64>() {
                    f as i64
                } else {
                    default
                }
            }
            _ => default,
        }
    }

    /// Lossy conversion to a float; strings parse, ints widen, everything
    /// else yields `default`.
    pub fn to_float(&self, default: f64) -> f64 {
        match self {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Bytes(_) | Value::Str(_) => {
                self.display_string().parse::<f64>().unwrap_or(default)
            }
            _ => default,
        }
    }

    /// The textual form used by `str()`, concatenation, join, and group
    /// keys. Floats render with six decimals; lists and JSON render empty.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => "<nil>".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f:.6}"),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Json(_) => String::new(),
        }
    }

    /// Integer/float split used by the aggregates: returns `(int form,
    /// float form, came from a float)`.
    pub fn to_number_parts(&self) -> (i64, f64, bool) {
        match self {
            Value::Int(i) => (*i, *i as f64, false),
            Value::Float(f) => (*f as i64, *f, true),
            Value::Bool(true) => (1, 1.0, false),
            Value::Bytes(_) | Value::Str(_) => {
                let s = self.display_string();
                if let Ok(i) = s.parse::<i64>() {
                    (i, i as f64, false)
                } else if let Ok(f) = s.parse::<f64>() {
                    (f as i64, f, true)
                } else {
                    (0, 0.0, false)
                }
            }
            _ => (0, 0.0, false),
        }
    }

    /// Length of a string or list; scalar numerics are 0 by definition.
    pub fn length(&self) -> Result<i64> {
        match self {
            Value::Str(s) => Ok(s.len() as i64),
            Value::Bytes(b) => Ok(b.len() as i64),
            Value::Int(_) | Value::Float(_) => Ok(0),
            Value::List(items) => Ok(items.len() as i64),
            _ => Err(KeyqlError::execute(None, "invalid type")),
        }
    }

    /// Numeric vector for the distance functions; every element must be
    /// numeric or numeric-parseable.
    pub fn to_float_vec(&self) -> Result<Vec<f64>> {
        let items = self
            .as_list()
            .ok_or_else(|| KeyqlError::execute(None, "Cannot convert to float list"))?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let f = match item {
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                Value::Bytes(_) | Value::Str(_) => item
                    .display_string()
                    .parse::<f64>()
                    .map_err(|_| KeyqlError::execute(None, "Cannot convert to float list"))?,
                _ => {
                    return Err(KeyqlError::execute(None, "Cannot convert to float list"));
                }
            };
            out.push(f);
        }
        Ok(out)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Json(map),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Json(map) => serde_json::Value::Object(map.clone()),
        }
    }
}

/// Integer-preferring arithmetic: int op int stays int, any float operand
/// promotes, divide by zero is a runtime error reported at `right_pos`.
pub fn math_op(left: &Value, right: &Value, op: u8, right_pos: usize) -> Result<Value> {
    if let (Some(li), Some(ri)) = (int_operand(left), int_operand(right)) {
        return match op {
            b'+' => Ok(Value::Int(li.wrapping_add(ri))),
            b'-' => Ok(Value::Int(li.wrapping_sub(ri))),
            b'*' => Ok(Value::Int(li.wrapping_mul(ri))),
            b'/' => {
                if ri == 0 {
                    Err(KeyqlError::execute(right_pos, "Divide by zero"))
                } else {
                    Ok(Value::Int(li / ri))
                }
            }
            _ => Err(KeyqlError::execute(right_pos, "Unknown operator")),
        };
    }
    let lf = float_operand(left)
        .ok_or_else(|| KeyqlError::execute(right_pos, "Invalid operator left parameter type"))?;
    let rf = float_operand(right)
        .ok_or_else(|| KeyqlError::execute(right_pos, "Invalid operator right parameter type"))?;
    match op {
        b'+' => Ok(Value::Float(lf + rf)),
        b'-' => Ok(Value::Float(lf - rf)),
        b'*' => Ok(Value::Float(lf * rf)),
        b'/' => {
            if rf == 0.0 {
                Err(KeyqlError::execute(right_pos, "Divide by zero"))
            } else {
                Ok(Value::Float(lf / rf))
            }
        }
        _ => Err(KeyqlError::execute(right_pos, "Unknown operator")),
    }
}

fn int_operand(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

fn float_operand(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Compare two numeric values, promoting mixed int/float to float.
pub fn number_compare(left: &Value, right: &Value, op: CmpOp) -> Result<bool> {
    if let (Some(li), Some(ri)) = (int_operand(left), int_operand(right)) {
        return Ok(match op {
            CmpOp::Gt => li > ri,
            CmpOp::Gte => li >= ri,
            CmpOp::Lt => li < ri,
            CmpOp::Lte => li <= ri,
            CmpOp::Eq => li == ri,
        });
    }
    let lf = float_operand(left).ok_or_else(|| {
        KeyqlError::execute(None, "Invalid operator left or right parameter type")
    })?;
    let rf = float_operand(right).ok_or_else(|| {
        KeyqlError::execute(None, "Invalid operator left or right parameter type")
    })?;
    Ok(match op {
        CmpOp::Gt => lf > rf,
        CmpOp::Gte => lf >= rf,
        CmpOp::Lt => lf < rf,
        CmpOp::Lte => lf <= rf,
        CmpOp::Eq => lf == rf,
    })
}

/// Byte-lexicographic comparison of string-like values.
pub fn string_compare(left: &Value, right: &Value, op: CmpOp) -> Result<bool> {
    let (lb, rb) = match (left.as_bytes(), right.as_bytes()) {
        (Some(l), Some(r)) => (l, r),
        _ => {
            return Err(KeyqlError::execute(
                None,
                "Invalid operator left or right parameter type",
            ));
        }
    };
    let ord = lb.cmp(rb);
    Ok(match op {
        CmpOp::Gt => ord.is_gt(),
        CmpOp::Gte => ord.is_ge(),
        CmpOp::Lt => ord.is_lt(),
        CmpOp::Lte => ord.is_le(),
        CmpOp::Eq => ord.is_eq(),
    })
}

/// Byte rendering used for group keys. Lists and JSON have no byte form.
pub fn group_key_bytes(v: &Value) -> Result<Cow<'_, [u8]>> {
    match v {
        Value::Null => Ok(Cow::Borrowed(&[][..])),
        Value::Bool(true) => Ok(Cow::Borrowed(b"true".as_ref())),
        Value::Bool(false) => Ok(Cow::Borrowed(b"false".as_ref())),
        Value::Bytes(b) => Ok(Cow::Borrowed(b.as_slice())),
        Value::Str(s) => Ok(Cow::Borrowed(s.as_bytes())),
        Value::Int(i) => Ok(Cow::Owned(i.to_string().into_bytes())),
        Value::Float(f) => Ok(Cow::Owned(format!("{f:.6}").into_bytes())),
        Value::List(_) | Value::Json(_) => Err(KeyqlError::execute(
            None,
            "Expression result type not support",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_math_int_preference() {
        let v = math_op(&Value::Int(7), &Value::Int(2), b'/', 0).unwrap();
        assert_eq!(v, Value::Int(3));
        let v = math_op(&Value::Int(7), &Value::Float(2.0), b'/', 0).unwrap();
        assert_eq!(v, Value::Float(3.5));
        let v = math_op(&Value::Float(1.5), &Value::Int(2), b'*', 0).unwrap();
        assert_eq!(v, Value::Float(3.0));
    }

    #[test]
    fn test_math_divide_by_zero() {
        let err = math_op(&Value::Int(1), &Value::Int(0), b'/', 9).unwrap_err();
        assert!(err.is_execute());
        assert!(err.to_string().contains("Divide by zero"));
        assert!(math_op(&Value::Float(1.0), &Value::Float(0.0), b'/', 0).is_err());
    }

    #[test]
    fn test_number_compare_promotion() {
        assert!(number_compare(&Value::Int(2), &Value::Float(1.5), CmpOp::Gt).unwrap());
        assert!(number_compare(&Value::Int(2), &Value::Int(2), CmpOp::Eq).unwrap());
        assert!(number_compare(&Value::Str("x".into()), &Value::Int(1), CmpOp::Eq).is_err());
    }

    #[test]
    fn test_string_compare_is_bytewise() {
        let a = Value::Str("abc".into());
        let b = Value::Bytes(b"abd".to_vec());
        assert!(string_compare(&a, &b, CmpOp::Lt).unwrap());
        assert!(string_compare(&a, &a, CmpOp::Eq).unwrap());
    }

    #[test]
    fn test_to_int_parses_strings() {
        assert_eq!(Value::Str("42".into()).to_int(0), 42);
        assert_eq!(Value::Str("4.9".into()).to_int(0), 4);
        assert_eq!(Value::Str("nope".into()).to_int(7), 7);
        assert_eq!(Value::Bool(true).to_int(7), 7);
    }

    #[test]
    fn test_display_string_float_format() {
        assert_eq!(Value::Float(2.5).display_string(), "2.500000");
        assert_eq!(Value::Int(2).display_string(), "2");
    }

    #[test]
    fn test_json_round_trip() {
        let j: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": [1.5, "x"]}"#).unwrap();
        let v = Value::from(j);
        match &v {
            Value::Json(map) => {
                assert_eq!(Value::from(map["a"].clone()), Value::Int(1));
            }
            other => panic!("expected json, got {other:?}"),
        }
    }

    #[test]
    fn test_length() {
        assert_eq!(Value::Str("abc".into()).length().unwrap(), 3);
        assert_eq!(Value::Int(5).length().unwrap(), 0);
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Int(2)]).length().unwrap(),
            2
        );
        assert!(Value::Null.length().is_err());
    }

    #[test]
    fn test_float_vec_conversion() {
        let v = Value::List(vec![Value::Int(1), Value::Str("2.5".into())]);
        assert_eq!(v.to_float_vec().unwrap(), vec![1.0, 2.5]);
        assert!(Value::Str("not a list".into()).to_float_vec().is_err());
    }
}

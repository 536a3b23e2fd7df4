//! Canonical structured values for entity snapshots.
//!
//! `before_state` and `after_state` can hold any business entity's shape, so
//! they are modelled as a small sum type rather than a fixed schema. Maps use
//! `BTreeMap` so key order is always sorted, which is what makes the canonical
//! encoding independent of field-population order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChainError, ChainResult};

/// A canonically-serializable snapshot value.
///
/// Serialized as plain JSON (`#[serde(untagged)]`), so a stored
/// `{"total": 100}` reads back as `Map { "total": Integer(100) }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Null,
    Bool(bool),
    Integer(i64),
    /// Must be finite; the encoder rejects NaN and infinities.
    Float(f64),
    String(String),
    List(Vec<StateValue>),
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Build a map value from `(key, value)` pairs.
    pub fn map<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, StateValue)>,
    {
        StateValue::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Look up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        match self {
            StateValue::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Render back to a `serde_json::Value`.
    ///
    /// Non-finite floats, which the encoder would reject anyway, become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            StateValue::Null => Value::Null,
            StateValue::Bool(b) => Value::Bool(*b),
            StateValue::Integer(i) => Value::from(*i),
            StateValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            StateValue::String(s) => Value::String(s.clone()),
            StateValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            StateValue::Map(m) => Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl TryFrom<Value> for StateValue {
    type Error = ChainError;

    /// Convert arbitrary JSON into a canonical value.
    ///
    /// Integers outside the `i64` range have no canonical form and fail with
    /// `EncodingError` rather than being silently widened to a float.
    fn try_from(value: Value) -> ChainResult<Self> {
        Ok(match value {
            Value::Null => StateValue::Null,
            Value::Bool(b) => StateValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    StateValue::Integer(i)
                } else if n.is_u64() {
                    return Err(ChainError::EncodingError {
                        reason: format!("integer {n} is outside the canonical i64 range"),
                    });
                } else {
                    match n.as_f64() {
                        Some(f) => StateValue::Float(f),
                        None => {
                            return Err(ChainError::EncodingError {
                                reason: format!("number {n} has no canonical representation"),
                            })
                        }
                    }
                }
            }
            Value::String(s) => StateValue::String(s),
            Value::Array(items) => StateValue::List(
                items
                    .into_iter()
                    .map(StateValue::try_from)
                    .collect::<ChainResult<Vec<_>>>()?,
            ),
            Value::Object(obj) => StateValue::Map(
                obj.into_iter()
                    .map(|(k, v)| Ok((k, StateValue::try_from(v)?)))
                    .collect::<ChainResult<BTreeMap<_, _>>>()?,
            ),
        })
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Integer(v)
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::String(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::String(v)
    }
}

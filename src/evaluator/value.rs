use serde::{Deserialize, Serialize};

/// A runtime value crossing the evaluator boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Unit,
    Int(i64),
    Bool(bool),
    Str(String),
    /// Marker produced by the backtracking search when pruned.
    Cut,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "undefined",
            Value::Int(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Cut => "cut",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_cut(&self) -> bool {
        matches!(self, Value::Cut)
    }

    /// Integer representation used by the wasm ABI.
    pub fn to_wasm_int(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            Value::Bool(b) => i64::from(*b),
            _ => 0,
        }
    }

    /// Parse a value rendered by a remote device.
    pub fn from_device_text(text: &str) -> Value {
        let trimmed = text.trim();
        if let Ok(n) = trimmed.parse::<i64>() {
            return Value::Int(n);
        }
        match trimmed {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "undefined" | "" => Value::Unit,
            _ => Value::Str(text.to_string()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Unit => f.write_str("undefined"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => f.write_str(s),
            Value::Cut => f.write_str("cut"),
        }
    }
}

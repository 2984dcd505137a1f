//! Raw dataset cell values
//!
//! A cell holds whatever the upload produced: text, a number, a boolean or
//! nothing. Interpretation (missing, numeric, binary-coded) happens here so
//! every analysis reads cells the same way.

use serde::{Deserialize, Serialize};

/// Text tokens that mark a cell as missing
pub const MISSING_TOKENS: [&str; 4] = ["", "NA", "null", "NULL"];

/// Raw value of a single dataset cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Number(f64),
    Bool(bool),
    Text(String),
}

impl RawValue {
    // ========== Safe Accessors (never panic) ==========

    /// True for null, empty text and the `NA`/`null` tokens
    pub fn is_missing(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Number(n) => n.is_nan(),
            RawValue::Bool(_) => false,
            RawValue::Text(s) => MISSING_TOKENS.contains(&s.trim()),
        }
    }

    /// Numeric reading of the cell (text is parsed, booleans are 0/1)
    pub fn as_f64(&self) -> Option<f64> {
        if self.is_missing() {
            return None;
        }
        match self {
            RawValue::Number(n) => Some(*n),
            RawValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            RawValue::Null => None,
        }
    }

    /// Binary coding: `1`/`yes`/`true` → true, `0`/`no`/`false` → false.
    /// Anything else is uncoded.
    pub fn as_binary(&self) -> Option<bool> {
        match self {
            RawValue::Bool(b) => Some(*b),
            RawValue::Number(n) if *n == 1.0 => Some(true),
            RawValue::Number(n) if *n == 0.0 => Some(false),
            RawValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "1" | "yes" | "true" => Some(true),
                "0" | "no" | "false" => Some(false),
                other => match other.parse::<f64>() {
                    Ok(v) if v == 1.0 => Some(true),
                    Ok(v) if v == 0.0 => Some(false),
                    _ => None,
                },
            },
            _ => None,
        }
    }

    /// Category label used for grouping; `None` when missing
    pub fn label(&self) -> Option<String> {
        if self.is_missing() {
            return None;
        }
        Some(self.to_string())
    }
}

impl std::fmt::Display for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawValue::Null => write!(f, ""),
            RawValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Bool(b) => write!(f, "{}", b),
            RawValue::Text(s) => write!(f, "{}", s.trim()),
        }
    }
}

impl Default for RawValue {
    fn default() -> Self {
        RawValue::Null
    }
}

// From implementations for convenience
impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        RawValue::Number(n)
    }
}

impl From<i64> for RawValue {
    fn from(n: i64) -> Self {
        RawValue::Number(n as f64)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        RawValue::Bool(b)
    }
}

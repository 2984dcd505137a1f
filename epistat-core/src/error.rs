//! Structured errors for analysis callers
//!
//! Validation problems abort a request. Sparse data never does: it is
//! reported as a `Severity::Warning` value attached to the affected result
//! while the rest of the batch completes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard error codes (machine-readable)
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const INSUFFICIENT_DATA: &str = "INSUFFICIENT_DATA";
    pub const NUMERIC_DEGENERACY: &str = "NUMERIC_DEGENERACY";
    pub const DOMAIN_ERROR: &str = "DOMAIN_ERROR";
    pub const ARG_TYPE: &str = "ARG_TYPE";
    pub const UNKNOWN_FUNCTION: &str = "UNKNOWN_FUNCTION";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INTERNAL: &str = "INTERNAL";
}

/// Severity level of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Computation continued with degraded result
    Warning,
    /// The requested computation failed
    Error,
    /// The engine itself is in a bad state
    Fatal,
}

/// Context about where an error occurred
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Column involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    /// Operation that raised the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// Propagation notes
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub notes: Vec<String>,
}

/// Structured error value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpiError {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Suggestion for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    /// Where the error occurred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,

    /// Severity level
    pub severity: Severity,
}

impl EpiError {
    /// Create a new error
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            suggestion: None,
            context: None,
            severity: Severity::Error,
        }
    }

    /// Builder: add suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Builder: set column context
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::default);
        ctx.column = Some(column.into());
        self
    }

    /// Builder: set operation context
    pub fn in_operation(mut self, operation: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::default);
        ctx.operation = Some(operation.into());
        self
    }

    /// Builder: add propagation note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::default);
        ctx.notes.push(note.into());
        self
    }

    /// Builder: set severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    // ========== Common Error Constructors ==========

    pub fn validation(details: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_ERROR, format!("Invalid input: {}", details.into()))
            .with_suggestion("Check the selected columns and parameters")
    }

    pub fn same_column(role_a: &str, role_b: &str, column: &str) -> Self {
        Self::validation(format!("{} and {} must be different variables", role_a, role_b))
            .with_column(column)
    }

    pub fn missing_column(role: &str) -> Self {
        Self::validation(format!("no column selected for {}", role))
            .with_suggestion(format!("Select a column for {}", role))
    }

    pub fn unknown_column(column: &str) -> Self {
        Self::validation(format!("column '{}' does not exist in the dataset", column))
            .with_column(column)
    }

    /// Non-fatal: the affected sub-result carries a neutral estimate
    pub fn insufficient_data(details: impl Into<String>) -> Self {
        Self::new(codes::INSUFFICIENT_DATA, format!("Insufficient data: {}", details.into()))
            .with_severity(Severity::Warning)
    }

    pub fn domain_error(details: impl Into<String>) -> Self {
        Self::new(codes::DOMAIN_ERROR, format!("Domain error: {}", details.into()))
    }

    pub fn arg_type(func: &str, details: impl Into<String>) -> Self {
        Self::new(codes::ARG_TYPE, format!("{}() arguments: {}", func, details.into()))
            .with_suggestion(format!("Use help('{}') for usage", func))
    }

    pub fn unknown_function(name: &str) -> Self {
        Self::new(codes::UNKNOWN_FUNCTION, format!("Unknown function: {}", name))
            .with_suggestion("Use list_functions to see what is available")
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(codes::NOT_FOUND, format!("No function named '{}'", name))
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, format!("Internal error: {}", details.into()))
            .with_suggestion("This is a bug, please report it")
            .with_severity(Severity::Fatal)
    }
}

impl std::fmt::Display for EpiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " (suggestion: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for EpiError {}

/// Error type for the numeric primitives and closed-form formulas
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericError {
    #[error("gamma({0}) is outside the supported domain (positive multiples of 0.5 up to 171.5)")]
    UnsupportedGammaArgument(f64),

    #[error("Division by zero: {0}")]
    DivisionByZero(String),

    #[error("Domain error: {0}")]
    Domain(String),
}

impl From<NumericError> for EpiError {
    fn from(err: NumericError) -> Self {
        match err {
            NumericError::UnsupportedGammaArgument(_) => {
                Self::new(codes::NUMERIC_DEGENERACY, err.to_string())
                    .with_suggestion("Only half-integer arguments are supported")
            }
            NumericError::DivisionByZero(_) => Self::new(codes::NUMERIC_DEGENERACY, err.to_string())
                .with_suggestion("Adjust the parameters so the effect size is non-null"),
            NumericError::Domain(s) => Self::domain_error(s),
        }
    }
}

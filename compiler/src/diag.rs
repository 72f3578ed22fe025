// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0103`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes emitted by the front end.
pub mod codes {
    use super::DiagCode;

    /// Reference to an undeclared tensor.
    pub const UNKNOWN_TENSOR: DiagCode = DiagCode("E0101");
    /// Access arity does not match the tensor's declared order.
    pub const ARITY_MISMATCH: DiagCode = DiagCode("E0102");
    /// An index variable is used with conflicting dimension sizes.
    pub const DIMENSION_MISMATCH: DiagCode = DiagCode("E0103");
    /// Format string length does not match the declared rank.
    pub const FORMAT_MISMATCH: DiagCode = DiagCode("E0104");
    /// Tensor declared more than once.
    pub const DUPLICATE_TENSOR: DiagCode = DiagCode("E0105");
    /// Additive and multiplicative operators mixed in one assignment.
    pub const MIXED_OPERATORS: DiagCode = DiagCode("E0201");
    /// Unary minus applied to more than a single access.
    pub const NEGATED_CHAIN: DiagCode = DiagCode("E0202");
    /// Unknown character in a format string.
    pub const BAD_FORMAT_CHAR: DiagCode = DiagCode("E0203");
    /// Result index variable not used by any operand.
    pub const UNUSED_RESULT_VAR: DiagCode = DiagCode("W0102");
    /// Reduction variable unreachable from every result variable; it will
    /// be silently absent from the lowered loop nest.
    pub const DISCONNECTED_REDUCTION: DiagCode = DiagCode("W0103");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

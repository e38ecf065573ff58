//! Shared error type for the compilation pipeline.
//!
//! Every pass reports at most one error: the first failure aborts the pass
//! and no later pass runs. Backend invariant violations are compiler bugs
//! and panic instead.

use thiserror::Error;

use crate::token::Token;

pub type CompileResult<T> = Result<T, CompileError>;

/// A located compile-time error, rendered as `line:col: message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{col}: {message}")]
pub struct CompileError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl CompileError {
    /// Construct an error anchored at a token.
    pub fn at(token: &Token, message: impl Into<String>) -> Self {
        Self {
            line: token.line,
            col: token.col,
            message: message.into(),
        }
    }
}

//! Error types for script compilation and execution.
//!
//! Compile-time problems split into lex errors and parse errors, both
//! carrying the source location of the offending token. When both occur,
//! the lex error wins: a malformed token must never be reported as a
//! confusing parse failure further downstream.

use std::io;

use thiserror::Error;

use crate::lexer::Location;

/// Error produced while tokenizing a script.
#[derive(Debug, Error)]
#[error("{message} at {location}")]
pub struct LexError {
    pub message: String,
    pub location: Location,
}

impl LexError {
    pub fn new(message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

/// Error produced while compiling the token stream into a program.
#[derive(Debug, Error)]
#[error("{message} at {location}")]
pub struct ParseError {
    pub message: String,
    pub location: Location,
}

impl ParseError {
    pub fn new(message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

/// Everything that can go wrong while compiling a script.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Failure while running a compiled program. The engine stops at the
/// first error; output produced before the failure is retained.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

//! Diagnostics for the interpreter.
//!
//! Errors are plain values carrying their source position. They accumulate in
//! a FIFO queue on the context and are drained by the embedder (or the `paws`
//! driver) after a run.

use std::{error::Error, fmt::Display, rc::Rc};

use crate::lexer::Token;

/// Broad classification of an error, matching the stage that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Invalid codepoint, invalid digit, unterminated construct, invalid token
    Lex,
    /// Expected X, unknown identifier, undefined type
    Parse,
    /// No matching operator, missing struct field, incomplete/void misuse
    Type,
    /// Invalid dereference, constant mutation, pointer arithmetic on functions
    Memory,
    /// Symbol not found or disallowed by the visibility policy
    Linkage,
    /// Included file cannot be read
    Io,
    /// Variadic misuse and other conditions only detectable while running
    Runtime,
}

/// A single diagnostic with `(row, col, file)` provenance.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PawError {
    pub row: u32,
    pub col: u32,
    pub file: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl PawError {
    pub fn new(kind: ErrorKind, token: &Token, message: impl Into<String>) -> Self {
        PawError {
            row: token.row,
            col: token.col,
            file: token.file.as_ref().map(|f| f.to_string()),
            kind,
            message: message.into(),
        }
    }

    pub fn at(
        kind: ErrorKind,
        file: Option<&Rc<str>>,
        row: u32,
        col: u32,
        message: impl Into<String>,
    ) -> Self {
        PawError {
            row,
            col,
            file: file.map(|f| f.to_string()),
            kind,
            message: message.into(),
        }
    }
}

impl Display for PawError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let file = self.file.as_deref().unwrap_or("<memory>");
        write!(f, "{file}:{}:{}: {}", self.row, self.col, self.message)
    }
}

impl Error for PawError {}

/// FIFO queue of diagnostics owned by the context.
///
/// Pushed errors stay queued until the embedder drains them; `any` reports
/// whether undrained errors remain.
#[derive(Debug, Default)]
pub struct ErrorQueue {
    errors: Vec<PawError>,
    drained: usize,
}

impl ErrorQueue {
    pub fn push(&mut self, error: PawError) {
        self.errors.push(error);
    }

    pub fn any(&self) -> bool {
        self.drained < self.errors.len()
    }

    pub fn next(&mut self) -> Option<PawError> {
        let error = self.errors.get(self.drained).cloned();
        if error.is_some() {
            self.drained += 1;
        }
        error
    }
}

/// Marker for an evaluation that stopped after queueing a diagnostic.
///
/// The error itself lives in the queue; this type only unwinds the current
/// statement via `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt;

/// Result alias used throughout the evaluator.
pub type Exec<T> = Result<T, Interrupt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = ErrorQueue::default();
        let token = Token::eof();
        queue.push(PawError::new(ErrorKind::Lex, &token, "first"));
        queue.push(PawError::new(ErrorKind::Parse, &token, "second"));

        assert!(queue.any());
        assert_eq!(queue.next().unwrap().message, "first");
        assert_eq!(queue.next().unwrap().message, "second");
        assert!(!queue.any());
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn test_display_contains_position() {
        let error = PawError::at(ErrorKind::Io, None, 3, 7, "Cannot open file");
        assert_eq!(format!("{error}"), "<memory>:3:7: Cannot open file");
    }
}

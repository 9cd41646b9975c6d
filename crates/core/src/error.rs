//! Marshalling and engine errors
//!
//! Every failure raised by the core funnels into [`Error`]. Engine-level
//! failures (syntax, memory, runtime) come out of loading and protected
//! calls; marshalling failures are raised where a stack slot does not match
//! the host type being extracted.

use std::ffi::c_int;
use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by a marshalling or engine operation
#[derive(Debug)]
pub enum Error {
    /// Source failed to compile
    Syntax(String),
    /// Engine allocation failure
    Memory(String),
    /// Error raised while running engine code, with the traceback captured
    /// by the message handler
    Runtime {
        message: String,
        traceback: Option<String>,
    },
    /// The message handler itself failed
    MessageHandler(String),
    /// A required field (or one segment of a dotted path) resolved to nil
    MissingField { path: String },
    /// The slot at `index` holds a kind the host type cannot be built from
    Type {
        expected: &'static str,
        found: &'static str,
        index: c_int,
    },
    /// Table length does not match a fixed arity
    Length { expected: usize, found: usize },
    /// Value has the right kind but does not fit the host type
    Conversion { target: &'static str, detail: String },
    /// Stack depth differs from what the caller expected
    StackSize { expected: c_int, found: c_int },
    /// String slot is not valid UTF-8
    Utf8 { index: c_int },
    /// Script file could not be read
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    /// Build a runtime error from message-handler output.
    ///
    /// The handler appends `"\nstack traceback:\n..."` to the message; the two
    /// halves are kept apart so callers can print either.
    pub fn runtime(output: &str) -> Self {
        match output.split_once("\nstack traceback:") {
            Some((message, trace)) => Error::Runtime {
                message: message.to_string(),
                traceback: Some(format!("stack traceback:{}", trace)),
            },
            None => Error::Runtime {
                message: output.to_string(),
                traceback: None,
            },
        }
    }

    /// Traceback captured for a runtime error, if any
    pub fn traceback(&self) -> Option<&str> {
        match self {
            Error::Runtime { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Syntax(msg) => write!(f, "Syntax error: {}", msg),
            Error::Memory(msg) => write!(f, "Memory error: {}", msg),
            Error::Runtime { message, traceback } => match traceback {
                Some(tb) => write!(f, "Runtime error: {}\n{}", message, tb),
                None => write!(f, "Runtime error: {}", message),
            },
            Error::MessageHandler(msg) => {
                write!(f, "Error running the error message handler: {}", msg)
            }
            Error::MissingField { path } => write!(f, "Field '{}' not found.", path),
            Error::Type {
                expected,
                found,
                index,
            } => write!(
                f,
                "Type unexpected at stack index {} (expected {}, found {})",
                index, expected, found
            ),
            Error::Length { expected, found } => {
                write!(f, "Expected table of length {}, found {}", expected, found)
            }
            Error::Conversion { target, detail } => {
                write!(f, "Cannot convert to {}: {}", target, detail)
            }
            Error::StackSize { expected, found } => write!(
                f,
                "Stack size expected to be {}, but found to be {}",
                expected, found
            ),
            Error::Utf8 { index } => {
                write!(f, "String at stack index {} is not valid UTF-8", index)
            }
            Error::Io { path, source } => {
                write!(f, "Could not open file '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Format a panic payload into an error message
pub fn format_panic_payload(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error handling for grouping operations
//!
//! Errors fall into four families: usage errors (`Invalid`, `IndexError`,
//! `KeyError`, `TypeError`), shape errors raised by the apply engine
//! (`ShapeMismatch`), Arrow failures, and `Internal` invariant violations that
//! indicate a defect in the partitioner rather than a caller mistake.

use std::fmt;

/// Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    KeyError = 2,
    TypeError = 3,
    Invalid = 4,
    IndexError = 7,
    NotImplemented = 10,
    ValueError = 14,
    ExecutionError = 42,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::KeyError => write!(f, "Key error"),
            Code::TypeError => write!(f, "Type error"),
            Code::Invalid => write!(f, "Invalid"),
            Code::IndexError => write!(f, "Index error"),
            Code::NotImplemented => write!(f, "Not implemented"),
            Code::ValueError => write!(f, "Value error"),
            Code::ExecutionError => write!(f, "Execution error"),
        }
    }
}

/// Main error type for grouping operations
#[derive(thiserror::Error, Debug)]
pub enum CylonError {
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Invalid argument: {0}")]
    Invalid(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Index out of bounds: {0}")]
    IndexError(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Key not found: {0}")]
    KeyError(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Internal consistency failure: {0}")]
    Internal(String),

    #[error("Generic error with code {code}: {message}")]
    Generic { code: Code, message: String },
}

impl CylonError {
    /// Create a new error with a specific code and message
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Code::Invalid => CylonError::Invalid(message),
            Code::IndexError => CylonError::IndexError(message),
            Code::TypeError => CylonError::TypeError(message),
            Code::KeyError => CylonError::KeyError(message),
            Code::NotImplemented => CylonError::NotImplemented(message),
            code => CylonError::Generic { code, message },
        }
    }

    /// Shorthand for an argument error
    pub fn invalid(message: impl Into<String>) -> Self {
        CylonError::Invalid(message.into())
    }

    /// Shorthand for a result shape error raised by the apply engine
    pub fn shape(message: impl Into<String>) -> Self {
        CylonError::ShapeMismatch(message.into())
    }

    /// Get the error code
    pub fn code(&self) -> Code {
        match self {
            CylonError::Arrow(_) => Code::Invalid,
            CylonError::Invalid(_) => Code::Invalid,
            CylonError::NotImplemented(_) => Code::NotImplemented,
            CylonError::IndexError(_) => Code::IndexError,
            CylonError::TypeError(_) => Code::TypeError,
            CylonError::KeyError(_) => Code::KeyError,
            CylonError::ShapeMismatch(_) => Code::ValueError,
            CylonError::Internal(_) => Code::ExecutionError,
            CylonError::Generic { code, .. } => *code,
        }
    }

    /// True for errors caused by the caller (bad arguments, shapes or data),
    /// false for internal invariant violations
    pub fn is_usage_error(&self) -> bool {
        !matches!(self, CylonError::Internal(_))
    }
}

/// Type alias for Results using CylonError
pub type CylonResult<T> = Result<T, CylonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_routes_codes_to_variants() {
        assert!(matches!(CylonError::new(Code::Invalid, "x"), CylonError::Invalid(_)));
        assert!(matches!(CylonError::new(Code::KeyError, "x"), CylonError::KeyError(_)));
        let err = CylonError::new(Code::ExecutionError, "boom");
        assert_eq!(err.code(), Code::ExecutionError);
    }

    #[test]
    fn every_code_round_trips() {
        for code in [
            Code::KeyError,
            Code::TypeError,
            Code::Invalid,
            Code::IndexError,
            Code::NotImplemented,
            Code::ValueError,
            Code::ExecutionError,
        ] {
            assert_eq!(CylonError::new(code, "x").code(), code);
        }
    }

    #[test]
    fn internal_is_not_a_usage_error() {
        assert!(!CylonError::Internal("bad".into()).is_usage_error());
        assert!(CylonError::shape("bad").is_usage_error());
        assert_eq!(CylonError::shape("bad").code(), Code::ValueError);
    }
}

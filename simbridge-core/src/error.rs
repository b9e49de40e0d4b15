//! # Error Handling
//!
//! One error taxonomy shared by the engine, the Rust boundary API and the C
//! call surface.
//!
//! ## Design Principles
//!
//! 1. **Stable codes**: every variant maps to an [`ErrorCode`] whose numeric
//!    value is part of the C ABI and never changes
//! 2. **Located**: every error remembers the `file:line` that raised it
//! 3. **No ambient state**: Rust callers get `Result<T>`; only the C edge
//!    keeps a per-thread "last error" slot, fed from these values

use std::fmt;
use std::panic::Location;

use thiserror::Error;

/// Result type alias for simbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes exposed across the C boundary
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success = 0,
    NullPointer = 1,
    InvalidArgument = 2,
    OutOfMemory = 3,
    BufferTooSmall = 4,
    SpaceIncompatible = 5,
    QueryTooLarge = 6,
    InvalidSparseElement = 7,
    IndexBuildFailed = 8,
    QueryExecutionFailed = 9,
    DataIoFailed = 10,
    Internal = 12,
    Runtime = 13,
    IndexNotBuilt = 14,
    IndexAlreadyBuilt = 15,
    HandleDestroyed = 16,
}

impl ErrorCode {
    /// Symbolic name, suitable for logs and monitoring
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::NullPointer => "NULL_POINTER",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::OutOfMemory => "OUT_OF_MEMORY",
            ErrorCode::BufferTooSmall => "BUFFER_TOO_SMALL",
            ErrorCode::SpaceIncompatible => "SPACE_INCOMPATIBLE",
            ErrorCode::QueryTooLarge => "QUERY_TOO_LARGE",
            ErrorCode::InvalidSparseElement => "INVALID_SPARSE_ELEMENT",
            ErrorCode::IndexBuildFailed => "INDEX_BUILD_FAILED",
            ErrorCode::QueryExecutionFailed => "QUERY_EXECUTION_FAILED",
            ErrorCode::DataIoFailed => "DATA_IO_FAILED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Runtime => "RUNTIME",
            ErrorCode::IndexNotBuilt => "INDEX_NOT_BUILT",
            ErrorCode::IndexAlreadyBuilt => "INDEX_ALREADY_BUILT",
            ErrorCode::HandleDestroyed => "HANDLE_DESTROYED",
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        let code = match value {
            0 => ErrorCode::Success,
            1 => ErrorCode::NullPointer,
            2 => ErrorCode::InvalidArgument,
            3 => ErrorCode::OutOfMemory,
            4 => ErrorCode::BufferTooSmall,
            5 => ErrorCode::SpaceIncompatible,
            6 => ErrorCode::QueryTooLarge,
            7 => ErrorCode::InvalidSparseElement,
            8 => ErrorCode::IndexBuildFailed,
            9 => ErrorCode::QueryExecutionFailed,
            10 => ErrorCode::DataIoFailed,
            12 => ErrorCode::Internal,
            13 => ErrorCode::Runtime,
            14 => ErrorCode::IndexNotBuilt,
            15 => ErrorCode::IndexAlreadyBuilt,
            16 => ErrorCode::HandleDestroyed,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source position that raised an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
}

impl SourceLocation {
    /// Location of the (tracked) caller
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Primary error type for simbridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("null pointer: {message}")]
    NullPointer { message: String, location: SourceLocation },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String, location: SourceLocation },

    #[error("out of memory: allocator returned null for {requested} bytes")]
    OutOfMemory { requested: usize, location: SourceLocation },

    #[error("result buffer too small: {required} results, capacity {capacity}")]
    BufferTooSmall { required: usize, capacity: usize, location: SourceLocation },

    #[error("space incompatible: {message}")]
    SpaceIncompatible { message: String, location: SourceLocation },

    #[error("query too large: {message}")]
    QueryTooLarge { message: String, location: SourceLocation },

    #[error("invalid sparse element: {message}")]
    InvalidSparseElement { message: String, location: SourceLocation },

    #[error("index build failed: {message}")]
    IndexBuildFailed { message: String, location: SourceLocation },

    #[error("query execution failed: {message}")]
    QueryExecutionFailed { message: String, location: SourceLocation },

    #[error("data I/O failed: {message}")]
    DataIo {
        message: String,
        location: SourceLocation,
        source: Option<std::io::Error>,
    },

    #[error("internal error: {message}")]
    Internal { message: String, location: SourceLocation },

    #[error("runtime error: {message}")]
    Runtime { message: String, location: SourceLocation },

    #[error("index is not built; call build first")]
    IndexNotBuilt { location: SourceLocation },

    #[error("index is already built; reset it before building again")]
    IndexAlreadyBuilt { location: SourceLocation },

    #[error("index handle is unknown or already destroyed")]
    HandleDestroyed { location: SourceLocation },
}

impl Error {
    #[track_caller]
    pub fn null_pointer(message: impl Into<String>) -> Self {
        Error::NullPointer { message: message.into(), location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument { message: message.into(), location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn out_of_memory(requested: usize) -> Self {
        Error::OutOfMemory { requested, location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn buffer_too_small(required: usize, capacity: usize) -> Self {
        Error::BufferTooSmall { required, capacity, location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn space_incompatible(message: impl Into<String>) -> Self {
        Error::SpaceIncompatible { message: message.into(), location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn query_too_large(message: impl Into<String>) -> Self {
        Error::QueryTooLarge { message: message.into(), location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn invalid_sparse_element(message: impl Into<String>) -> Self {
        Error::InvalidSparseElement { message: message.into(), location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn index_build_failed(message: impl Into<String>) -> Self {
        Error::IndexBuildFailed { message: message.into(), location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn query_execution_failed(message: impl Into<String>) -> Self {
        Error::QueryExecutionFailed { message: message.into(), location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn data_io(message: impl Into<String>) -> Self {
        Error::DataIo { message: message.into(), location: SourceLocation::caller(), source: None }
    }

    /// Wrap an I/O failure with a description of what was being done
    #[track_caller]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::DataIo {
            message: format!("{}: {}", message.into(), source),
            location: SourceLocation::caller(),
            source: Some(source),
        }
    }

    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal { message: message.into(), location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime { message: message.into(), location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn index_not_built() -> Self {
        Error::IndexNotBuilt { location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn index_already_built() -> Self {
        Error::IndexAlreadyBuilt { location: SourceLocation::caller() }
    }

    #[track_caller]
    pub fn handle_destroyed() -> Self {
        Error::HandleDestroyed { location: SourceLocation::caller() }
    }

    /// Numeric code for the C boundary
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NullPointer { .. } => ErrorCode::NullPointer,
            Error::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Error::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            Error::BufferTooSmall { .. } => ErrorCode::BufferTooSmall,
            Error::SpaceIncompatible { .. } => ErrorCode::SpaceIncompatible,
            Error::QueryTooLarge { .. } => ErrorCode::QueryTooLarge,
            Error::InvalidSparseElement { .. } => ErrorCode::InvalidSparseElement,
            Error::IndexBuildFailed { .. } => ErrorCode::IndexBuildFailed,
            Error::QueryExecutionFailed { .. } => ErrorCode::QueryExecutionFailed,
            Error::DataIo { .. } => ErrorCode::DataIoFailed,
            Error::Internal { .. } => ErrorCode::Internal,
            Error::Runtime { .. } => ErrorCode::Runtime,
            Error::IndexNotBuilt { .. } => ErrorCode::IndexNotBuilt,
            Error::IndexAlreadyBuilt { .. } => ErrorCode::IndexAlreadyBuilt,
            Error::HandleDestroyed { .. } => ErrorCode::HandleDestroyed,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn location(&self) -> SourceLocation {
        match self {
            Error::NullPointer { location, .. }
            | Error::InvalidArgument { location, .. }
            | Error::OutOfMemory { location, .. }
            | Error::BufferTooSmall { location, .. }
            | Error::SpaceIncompatible { location, .. }
            | Error::QueryTooLarge { location, .. }
            | Error::InvalidSparseElement { location, .. }
            | Error::IndexBuildFailed { location, .. }
            | Error::QueryExecutionFailed { location, .. }
            | Error::DataIo { location, .. }
            | Error::Internal { location, .. }
            | Error::Runtime { location, .. }
            | Error::IndexNotBuilt { location }
            | Error::IndexAlreadyBuilt { location }
            | Error::HandleDestroyed { location } => *location,
        }
    }

    /// Check if the caller can retry the same call after adjusting its inputs
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::BufferTooSmall { .. }
                | Error::IndexNotBuilt { .. }
                | Error::IndexAlreadyBuilt { .. }
        )
    }

    /// Snapshot as a plain `{code, message, file, line}` record
    pub fn detail(&self) -> ErrorDetail {
        let location = self.location();
        ErrorDetail {
            code: self.code(),
            message: self.to_string(),
            file: location.file,
            line: location.line,
        }
    }

    fn message_mut(&mut self) -> Option<&mut String> {
        match self {
            Error::NullPointer { message, .. }
            | Error::InvalidArgument { message, .. }
            | Error::SpaceIncompatible { message, .. }
            | Error::QueryTooLarge { message, .. }
            | Error::InvalidSparseElement { message, .. }
            | Error::IndexBuildFailed { message, .. }
            | Error::QueryExecutionFailed { message, .. }
            | Error::DataIo { message, .. }
            | Error::Internal { message, .. }
            | Error::Runtime { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Prefix the message, keeping code and location intact
    pub fn context(mut self, prefix: &str) -> Self {
        if let Some(message) = self.message_mut() {
            *message = format!("{}: {}", prefix, message);
        }
        self
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Error::DataIo {
            message: err.to_string(),
            location: SourceLocation::caller(),
            source: Some(err),
        }
    }
}

/// Plain error record handed across the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    pub file: &'static str,
    pub line: u32,
}

impl ErrorDetail {
    /// Success record located at the caller
    #[track_caller]
    pub fn success(message: impl Into<String>) -> Self {
        let location = SourceLocation::caller();
        Self {
            code: ErrorCode::Success,
            message: message.into(),
            file: location.file,
            line: location.line,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Success
    }
}

impl From<&Error> for ErrorDetail {
    fn from(err: &Error) -> Self {
        err.detail()
    }
}

impl From<Error> for ErrorDetail {
    fn from(err: Error) -> Self {
        err.detail()
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({}:{})", self.code, self.message, self.file, self.line)
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(&f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorCode::Success as u32, 0);
        assert_eq!(ErrorCode::NullPointer as u32, 1);
        assert_eq!(ErrorCode::BufferTooSmall as u32, 4);
        assert_eq!(ErrorCode::InvalidSparseElement as u32, 7);
        assert_eq!(ErrorCode::DataIoFailed as u32, 10);
        assert_eq!(ErrorCode::IndexNotBuilt as u32, 14);
        for raw in 0..20 {
            if let Some(code) = ErrorCode::from_u32(raw) {
                assert_eq!(code as u32, raw);
            }
        }
        assert!(ErrorCode::from_u32(11).is_none());
    }

    #[test]
    fn test_location_points_at_raise_site() {
        let line = line!() + 1;
        let err = Error::invalid_argument("k must be positive");
        let detail = err.detail();
        assert_eq!(detail.code, ErrorCode::InvalidArgument);
        assert!(detail.file.ends_with("error.rs"));
        assert_eq!(detail.line, line);
        assert!(detail.message.contains("k must be positive"));
    }

    #[test]
    fn test_context_keeps_code() {
        let result: Result<()> = Err(Error::query_execution_failed("engine rejected query"));
        let err = result.with_context(|| "query 3".to_string()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::QueryExecutionFailed);
        assert!(err.to_string().contains("query 3: engine rejected query"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.dat");
        let err: Error = io.into();
        assert_eq!(err.code(), ErrorCode::DataIoFailed);
        assert!(!err.is_recoverable());
    }
}

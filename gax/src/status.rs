use std::fmt::{Display, Formatter};

/// A transport-level status describing the result of a pub/sub operation.
///
/// Mirrors the gRPC status vocabulary, because every real transport binding
/// (cloud pub/sub, an in-memory bus, ...) ends up reporting errors in these
/// terms, but `Status` itself carries no dependency on a particular backend.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// Get the `Code` of this `Status`.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the text error message of this `Status`.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Status codes used by [`Status`].
///
/// These variants match the [gRPC status codes], since that is the
/// vocabulary cloud pub/sub transports report errors in.
///
/// [gRPC status codes]: https://github.com/grpc/grpc/blob/master/doc/statuscodes.md#status-codes-and-their-use-in-grpc
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Code {
    /// The operation completed successfully.
    Ok,

    /// The operation was cancelled.
    Cancelled,

    /// Unknown error.
    Unknown,

    /// Client specified an invalid argument.
    InvalidArgument,

    /// Deadline expired before operation could complete.
    DeadlineExceeded,

    /// Some requested entity was not found.
    NotFound,

    /// Some entity that we attempted to create already exists.
    AlreadyExists,

    /// The caller does not have permission to execute the specified operation.
    PermissionDenied,

    /// Some resource has been exhausted.
    ResourceExhausted,

    /// The system is not in a state required for the operation's execution.
    FailedPrecondition,

    /// The operation was aborted.
    Aborted,

    /// Operation was attempted past the valid range.
    OutOfRange,

    /// Operation is not implemented or not supported.
    Unimplemented,

    /// Internal error.
    Internal,

    /// The service is currently unavailable.
    Unavailable,

    /// Unrecoverable data loss or corruption.
    DataLoss,

    /// The request does not have valid authentication credentials.
    Unauthenticated,
}

impl Code {
    /// The codes the retry policy treats as transient (§4.1): worth another
    /// attempt within the deadline rather than surfacing immediately.
    pub const TRANSIENT: &'static [Code] = &[
        Code::NotFound,
        Code::Aborted,
        Code::DeadlineExceeded,
        Code::Internal,
        Code::ResourceExhausted,
        Code::Unavailable,
        Code::Unknown,
        Code::Cancelled,
    ];

    pub fn is_transient(&self) -> bool {
        Self::TRANSIENT.contains(self)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Code::Ok => "the operation completed successfully",
            Code::Cancelled => "the operation was cancelled",
            Code::Unknown => "unknown error",
            Code::InvalidArgument => "client specified an invalid argument",
            Code::DeadlineExceeded => "deadline expired before the operation could complete",
            Code::NotFound => "the requested resource was not found",
            Code::AlreadyExists => "the resource already exists",
            Code::PermissionDenied => "the caller does not have permission to perform this operation",
            Code::ResourceExhausted => "a resource has been exhausted",
            Code::FailedPrecondition => "the system is not in a state required for the operation's execution",
            Code::Aborted => "the operation was aborted",
            Code::OutOfRange => "operation was attempted past the valid range",
            Code::Unimplemented => "operation is not implemented or not supported",
            Code::Internal => "internal error",
            Code::Unavailable => "the service is currently unavailable",
            Code::DataLoss => "unrecoverable data loss or corruption",
            Code::Unauthenticated => "the request does not have valid authentication credentials",
        }
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self.description(), f)
    }
}

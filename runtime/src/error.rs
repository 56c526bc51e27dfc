use octue_gax::retry::TryAs;
use octue_gax::status::Status;

/// Every fallible operation in the runtime returns this. Transport-transient
/// variants round-trip through [`Status`] so they can be retried by
/// `octue_gax::retry::invoke` without the retry loop knowing about
/// service-level error shapes.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Transport(#[from] Status),

    #[error("failed to encode or decode a message envelope: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no service found with id '{0}'")]
    ServiceNotFound(String),

    #[error("the input manifest references a local file path but allow_local_files was not set")]
    FileLocationError,

    #[error("a reply subscription cannot be a push subscription")]
    PushSubscriptionCannotBePulled,

    #[error("monitor message failed schema validation: {0}")]
    InvalidMonitorMessage(String),

    #[error("no acknowledgement of question delivery was received within the re-ask budget")]
    QuestionNotDelivered,

    #[error("timed out waiting for an answer")]
    AnswerTimeout,

    #[error("the server received a malformed message: {0}")]
    ProtocolViolation(String),

    /// A terminal error envelope whose `exception_type` matched a constructor
    /// registered in the exception mapping.
    #[error("{exception_type}: {message}")]
    Known {
        exception_type: &'static str,
        message: String,
        traceback: Vec<String>,
    },

    /// A terminal error envelope whose `exception_type` had no local
    /// constructor. The original name, message and traceback are preserved
    /// verbatim rather than coerced into a specific variant.
    #[error("{type_name}: {message}")]
    Remote {
        type_name: String,
        message: String,
        traceback: Vec<String>,
    },
}

impl TryAs<Status> for RuntimeError {
    fn try_as(&self) -> Option<&Status> {
        match self {
            RuntimeError::Transport(status) => Some(status),
            _ => None,
        }
    }
}

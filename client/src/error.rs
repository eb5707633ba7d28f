//! Client error type.

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("could not decode {syscall}: {message}")]
    Decode { syscall: String, message: String },
    /// The server answered a request with an error frame or status.
    #[error("{message}")]
    Request { code: Option<String>, message: String },
    #[error("task {0} is not on this board")]
    UnknownTask(Uuid),
    #[error("column {0} is not on this board")]
    UnknownColumn(Uuid),
    #[error("index {index} is out of range for a column of {len}")]
    InvalidIndex { index: usize, len: usize },
    #[error("task {0} already has a move in flight")]
    MoveInFlight(Uuid),
    #[error("no drag in progress")]
    NotDragging,
    #[error("no board loaded")]
    NoBoard,
}

impl ClientError {
    /// Build a request error from a terminal error frame.
    #[must_use]
    pub fn from_error_frame(frame: &frames::Frame) -> Self {
        let code = frame
            .data
            .get(frames::FRAME_CODE)
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        let message = frame
            .data
            .get(frames::FRAME_MESSAGE)
            .and_then(|v| v.as_str())
            .unwrap_or("request failed")
            .to_owned();
        Self::Request { code, message }
    }
}

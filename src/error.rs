use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    /// The create request was malformed. Nothing was stored.
    #[error("{0}")]
    Validation(String),
    #[error("Poll {0} not found")]
    NotFound(String),
    /// The requested option is missing, negative or past the last option.
    #[error("Invalid option, the poll has {count} options")]
    InvalidOption { count: usize },
    /// Expected outcome of the one-vote-per-voter policy, not a fault.
    #[error("You already voted")]
    DuplicateVote,
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl warp::reject::Reject for PollError {}

impl From<std::io::Error> for PollError {
    fn from(error: std::io::Error) -> Self {
        PollError::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for PollError {
    fn from(error: serde_json::Error) -> Self {
        PollError::Storage(error.to_string())
    }
}

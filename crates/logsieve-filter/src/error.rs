use logsieve_types::MessageEventError;

/// Errors raised while building filter criteria
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown text match mode '{0}'")]
    UnknownTextMode(String),

    #[error(transparent)]
    MessageType(#[from] MessageEventError),
}

/// Bus failures, classified by whether the caller should keep polling.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Nothing to read yet. Not an error for a polling consumer.
    #[error("no data available")]
    NoData,
    #[error("bus closed")]
    Closed,
    #[error("topic unavailable: {0}")]
    TopicUnavailable(String),
    #[error("bus backend error: {0}")]
    Backend(String),
}

impl BusError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoData)
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::Closed => "closed",
            Self::TopicUnavailable(_) => "topic_unavailable",
            Self::Backend(_) => "backend",
        }
    }
}

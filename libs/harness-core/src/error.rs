use harness_api::ChannelError;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Bad workload bounds. Rejected before any publish.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A single publish or subscribe failed. Local to one operation.
    #[error("transport ({context}): {source}")]
    Transport { context: String, source: ChannelError },

    /// Arrival recorder used outside a valid run lifecycle.
    #[error("state: {0}")]
    State(String),
}

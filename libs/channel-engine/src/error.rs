#[derive(Debug, thiserror::Error)]
pub enum ChannelEngineError {
    #[error("channel '{0}' is closed")]
    Closed(String),

    #[error("injected publish failure for sequence {sequence_id} on '{channel}'")]
    InjectedFailure { channel: String, sequence_id: i64 },
}

impl ChannelEngineError {
    /// Convert to ChannelError preserving the transport/closed distinction.
    ///
    /// `Closed` → Closed kind.
    /// `InjectedFailure` → Transport kind (looks like a broker error to the harness).
    pub fn into_channel_error(self) -> harness_api::ChannelError {
        match self {
            ChannelEngineError::Closed(_) => harness_api::ChannelError::closed(self.to_string()),
            ChannelEngineError::InjectedFailure { .. } => {
                harness_api::ChannelError::transport(self.to_string())
            }
        }
    }
}

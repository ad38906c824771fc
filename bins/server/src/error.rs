#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Harness(#[from] harness_core::HarnessError),

    #[error("output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

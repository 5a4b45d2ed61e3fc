#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("log: {0}")]
    LogOpen(#[from] score_log::OpenError),

    #[error("log: {0}")]
    Log(#[from] score_api::LogError),

    #[error("{0}")]
    Pipeline(#[from] ingest_pipeline::PipelineError),

    #[error("output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

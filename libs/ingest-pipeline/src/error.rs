/// A record grew past the framing bound. Connection-fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("record too long: {len} bytes (max {max})")]
pub struct FramingError {
    pub len: usize,
    pub max: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("config: {0}")]
    Config(String),

    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
}

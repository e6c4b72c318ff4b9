#[derive(Debug, thiserror::Error)]
pub enum AccelError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Pipeline(#[from] pipeline::PipelineError),
}

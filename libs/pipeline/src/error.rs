use telemetry_api::TelemetryError;

/// Ошибки старта pipeline. Только они доходят до хоста.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("{0}")]
    Telemetry(#[from] TelemetryError),
}

use thiserror::Error;

/// Everything that can go fatally wrong in the pipeline. All variants are
/// terminal for the invocation; there are no retries.
#[derive(Debug, Error)]
pub enum Error {
    /// The dataset files could not be read or are not valid IDX data.
    #[error("dataset unavailable: {context}")]
    DataUnavailable {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Image and label batches disagree in length, or an image is not 28x28.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The training loss became NaN or infinite. Parameters are considered
    /// corrupted and the run is discarded.
    #[error("training loss became non-finite at epoch {epoch}, mini-batch {batch}")]
    NumericalDivergence { epoch: usize, batch: usize },
}

impl Error {
    pub(crate) fn data(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::DataUnavailable {
            context: context.into(),
            source: Some(source),
        }
    }

    pub(crate) fn malformed(context: impl Into<String>) -> Self {
        Error::DataUnavailable {
            context: context.into(),
            source: None,
        }
    }
}

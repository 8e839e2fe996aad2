use thiserror::Error;

use crate::diagnostic::Diagnostics;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("compilation failed:\n{0}")]
    Diagnostics(Diagnostics),
    #[error("malformed IR in `{function}`: {message}")]
    MalformedIr { function: String, message: String },
    #[error("entry point `{0}` is not defined")]
    MissingEntryPoint(String),
}

impl CoreError {
    pub fn malformed(function: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::MalformedIr {
            function: function.into(),
            message: message.into(),
        }
    }
}

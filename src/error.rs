use std::path::PathBuf;

/// Errors surfaced by the engine. Transport failures are not represented
/// here; they are recorded in the emitted [`Sample`](crate::sample::Sample).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("script parse error: {0}")]
    ScriptParse(String),

    #[error("bad pause directive: {0:?}")]
    BadPause(String),

    #[error("cannot read body file {path}: {source}")]
    BodyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("result log write failed: {0}")]
    Encode(#[source] std::io::Error),

    #[error("result log read failed: {0}")]
    Decode(String),

    #[error("setup error: {0}")]
    Setup(String),
}

impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ScriptParse(msg.into())
    }

    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }
}

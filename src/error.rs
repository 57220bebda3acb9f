use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum F4stError {
    #[error("failed to read observation information file at {0}")]
    ObsInfoRead(PathBuf),

    #[error("failed to parse observation information YAML: {0}")]
    ObsInfoParse(String),

    #[error("missing observation information key: {0}")]
    MissingObsKey(String),

    #[error("invalid observation information value at {key}: expected {expected}")]
    InvalidObsValue { key: String, expected: &'static str },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid wavelength: {0}")]
    InvalidWavelength(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("JSOC search failed: {0}")]
    SearchHttp(String),

    #[error("JSOC search returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("file transfer failed: {0}")]
    TransferHttp(String),

    #[error("file transfer returned status {status}: {message}")]
    TransferStatus { status: u16, message: String },
}

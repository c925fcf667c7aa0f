//! CLI error types.

use std::path::PathBuf;

use vimd_config::ConfigError;
use vimd_server::{GatewayError, WatchError};
use vimd_session::RegistryError;

use crate::convert::ConvertError;

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Convert(#[from] ConvertError),

    #[error("{0}")]
    Server(#[from] GatewayError),

    #[error("{0}")]
    Watch(#[from] WatchError),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("File not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Output would overwrite the source file: {}", .0.display())]
    OutputIsSource(PathBuf),
}

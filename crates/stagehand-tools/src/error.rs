//! Error types for tool acquisition

use std::path::PathBuf;
use thiserror::Error;

/// Result type for tool operations
pub type Result<T> = std::result::Result<T, ToolError>;

/// Tool resolution and acquisition errors
#[derive(Error, Debug)]
pub enum ToolError {
    /// Tool is not installed and cannot be fetched
    #[error("Required tool '{tool}' was not found")]
    NotFound { tool: String },

    /// No download is known for the running platform
    #[error("No download of '{tool}' is available for platform {platform}")]
    UnsupportedPlatform { tool: String, platform: String },

    /// Download returned an unusable response
    #[error("Downloading {url} failed: {message}")]
    DownloadFailed { url: String, message: String },

    /// Download was canceled before it completed
    #[error("Download of '{tool}' was canceled")]
    Canceled { tool: String },

    /// Installed file is missing after the download finished
    #[error("Tool was installed to {0} but is not present")]
    InstallMissing(PathBuf),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

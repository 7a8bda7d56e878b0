use std::path::PathBuf;
use thiserror::Error;

use crate::paths::AssetClass;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no path table entry for asset class {class}")]
    MissingPathSpec { class: AssetClass },

    #[error("malformed glob pattern '{pattern}'")]
    BadPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to clean output directory {path}")]
    CleanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} transform failed for {path}: {message}")]
    Transform {
        stage: AssetClass,
        path: PathBuf,
        message: String,
    },

    #[error("failed to read {path}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory {path}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to initialize file watcher: {message}")]
    WatchInit { message: String },

    #[error("failed to bind preview server on port {port}")]
    ServerBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_missing_path_spec() {
        let err = PipelineError::MissingPathSpec {
            class: AssetClass::Fonts,
        };
        assert_eq!(err.to_string(), "no path table entry for asset class fonts");
    }

    #[test]
    fn test_error_display_transform() {
        let err = PipelineError::Transform {
            stage: AssetClass::Styles,
            path: PathBuf::from("src/assets/styles/main.css"),
            message: "unexpected token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "styles transform failed for src/assets/styles/main.css: unexpected token"
        );
    }

    #[test]
    fn test_error_display_clean_failed() {
        let err = PipelineError::CleanFailed {
            path: PathBuf::from("dist"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "failed to clean output directory dist");
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = PipelineError::from(io);
        assert!(matches!(err, PipelineError::Io(_)));
    }
}

//! Schema file loading.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tidesync_engine::{ModelDefinition, ModelRegistry, SchemaError};

/// Errors raised while loading a schema file.
#[derive(Debug, thiserror::Error)]
pub enum SchemaFileError {
    /// The file could not be read.
    #[error("cannot read schema {path}: {source}")]
    Io {
        /// Schema path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not a valid schema document.
    #[error("malformed schema {path}: {source}")]
    Parse {
        /// Schema path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The models do not form a valid registry.
    #[error("invalid schema {path}: {source}")]
    Invalid {
        /// Schema path.
        path: PathBuf,
        /// Underlying error.
        source: SchemaError,
    },
}

/// On-disk schema document: `{ "models": [...] }`.
#[derive(Debug, Deserialize)]
pub struct SchemaFile {
    /// Model definitions, in registration order.
    pub models: Vec<ModelDefinition>,
}

/// Loads a schema file and builds its registry.
pub fn load(path: &Path) -> Result<ModelRegistry, SchemaFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| SchemaFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: SchemaFile =
        serde_json::from_str(&text).map_err(|source| SchemaFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(models = file.models.len(), path = %path.display(), "loaded schema");

    ModelRegistry::from_definitions(file.models).map_err(|source| SchemaFileError::Invalid {
        path: path.to_path_buf(),
        source,
    })
}

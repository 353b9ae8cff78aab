//! Descriptor parser for loading configuration files.
//!
//! This module handles loading the descriptor from YAML files and
//! environment variables, with proper precedence and error handling.

use crate::error::{DescriptorError, GroundworkError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::Descriptor;

/// File names probed when no explicit descriptor path is given.
const DESCRIPTOR_FILE_NAMES: &[&str] = &["groundwork.infra.yaml", "groundwork.yaml"];

/// Descriptor parser.
#[derive(Debug, Default)]
pub struct DescriptorParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl DescriptorParser {
    /// Creates a new descriptor parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a `.env` file from the base path, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a `.env` file exists but cannot be parsed.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_deref()
            .unwrap_or_else(|| Path::new("."))
            .join(".env");

        if env_path.exists() {
            debug!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                GroundworkError::Descriptor(DescriptorError::ParseError {
                    message: format!("Failed to load .env: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        }

        Ok(())
    }

    /// Loads a descriptor from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Descriptor> {
        let path = path.as_ref();
        info!("Loading descriptor from: {}", path.display());

        if !path.exists() {
            return Err(GroundworkError::Descriptor(DescriptorError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            GroundworkError::Descriptor(DescriptorError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a descriptor from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Descriptor> {
        debug!("Parsing YAML descriptor");

        let descriptor: Descriptor = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            GroundworkError::Descriptor(DescriptorError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Successfully parsed descriptor for project: {}",
            descriptor.project.name
        );
        Ok(descriptor)
    }

    /// Loads a descriptor with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `GROUNDWORK_<SECTION>_<KEY>` (e.g., `GROUNDWORK_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Descriptor> {
        let mut descriptor = self.load_file(path)?;
        Self::apply_env_overrides(&mut descriptor);
        Ok(descriptor)
    }

    /// Applies environment variable overrides to the descriptor.
    fn apply_env_overrides(descriptor: &mut Descriptor) {
        // Project overrides
        if let Ok(name) = std::env::var("GROUNDWORK_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            descriptor.project.name = name;
        }

        if let Ok(env) = std::env::var("GROUNDWORK_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            descriptor.project.environment = env;
        }

        if let Ok(region) = std::env::var("GROUNDWORK_PROJECT_REGION") {
            debug!("Overriding project.region from environment");
            descriptor.project.region = Some(region);
        }

        // State overrides
        if let Ok(bucket) = std::env::var("GROUNDWORK_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            descriptor.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("GROUNDWORK_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            descriptor.state.prefix = Some(prefix);
        }

        if let Ok(region) = std::env::var("GROUNDWORK_STATE_REGION") {
            debug!("Overriding state.region from environment");
            descriptor.state.region = Some(region);
        }

        if let Ok(path) = std::env::var("GROUNDWORK_STATE_PATH") {
            debug!("Overriding state.path from environment");
            descriptor.state.path = Some(path);
        }
    }
}

/// Searches a directory for a descriptor file using the default names.
///
/// # Errors
///
/// Returns an error if no descriptor file is found.
pub fn find_descriptor_file(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();

    for name in DESCRIPTOR_FILE_NAMES {
        let candidate = dir.join(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(GroundworkError::Descriptor(DescriptorError::FileNotFound {
        path: dir.join(DESCRIPTOR_FILE_NAMES[0]),
    }))
}

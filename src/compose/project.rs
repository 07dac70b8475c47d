//! Project loading: descriptor files, environment and project name

use super::config::ComposeConfig;
use super::parser::{parse_env_str, ComposeParser};
use crate::error::{Result, StackError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the descriptor file(s), `:`-separated
pub const COMPOSE_FILE_ENV: &str = "COMPOSE_FILE";

/// Environment variable naming the project
pub const COMPOSE_PROJECT_NAME_ENV: &str = "COMPOSE_PROJECT_NAME";

/// How to locate and load a project
#[derive(Debug, Clone, Default)]
pub struct ProjectOptions {
    /// Explicit descriptor files, in overlay order
    pub files: Vec<PathBuf>,
    /// Project directory; defaults to the first file's directory
    pub project_directory: Option<PathBuf>,
    /// Explicit project name
    pub project_name: Option<String>,
    /// Explicit env file; defaults to `.env` in the project directory
    pub env_file: Option<PathBuf>,
    /// Variables that override the env file, usually the process environment
    pub environment: HashMap<String, String>,
    /// Directory used to discover a descriptor when no file is given
    pub working_dir: PathBuf,
}

impl ProjectOptions {
    /// Options for discovering a project from `working_dir`, with the
    /// process environment
    pub fn from_env(working_dir: PathBuf) -> Self {
        Self {
            environment: std::env::vars().collect(),
            working_dir,
            ..Self::default()
        }
    }
}

/// A loaded project
#[derive(Debug, Clone)]
pub struct Project {
    /// Normalized project name
    pub name: String,
    /// Directory relative paths in the descriptor resolve against
    pub directory: PathBuf,
    /// Descriptor files the configuration was loaded from
    pub files: Vec<PathBuf>,
    /// Merged descriptor
    pub config: ComposeConfig,
    /// Environment used for interpolation
    pub environment: HashMap<String, String>,
}

impl Project {
    /// Load a project
    pub fn load(options: &ProjectOptions) -> Result<Self> {
        let files = Self::resolve_files(options)?;

        let directory = match &options.project_directory {
            Some(dir) => dir.clone(),
            None => files
                .first()
                .and_then(|f| f.parent())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| options.working_dir.clone()),
        };

        let environment = Self::resolve_environment(options, &directory)?;
        let config = ComposeParser::parse_files(&files, &environment)?;

        let raw_name = options
            .project_name
            .clone()
            .or_else(|| config.name.clone())
            .or_else(|| environment.get(COMPOSE_PROJECT_NAME_ENV).cloned())
            .or_else(|| {
                directory
                    .canonicalize()
                    .ok()
                    .unwrap_or_else(|| directory.clone())
                    .file_name()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "default".to_string());

        let name = normalize_project_name(&raw_name).ok_or_else(|| {
            StackError::InvalidConfig(format!("Invalid project name: '{}'", raw_name))
        })?;

        tracing::debug!(
            "Loaded project {} from {} file(s) in {}",
            name,
            files.len(),
            directory.display()
        );

        Ok(Self {
            name,
            directory,
            files,
            config,
            environment,
        })
    }

    /// Build a project directly from a parsed descriptor
    pub fn from_config(name: &str, directory: PathBuf, config: ComposeConfig) -> Result<Self> {
        let name = normalize_project_name(name)
            .ok_or_else(|| StackError::InvalidConfig(format!("Invalid project name: '{}'", name)))?;

        Ok(Self {
            name,
            directory,
            files: Vec::new(),
            config,
            environment: HashMap::new(),
        })
    }

    fn resolve_files(options: &ProjectOptions) -> Result<Vec<PathBuf>> {
        let base = options
            .project_directory
            .clone()
            .unwrap_or_else(|| options.working_dir.clone());

        let mut files: Vec<PathBuf> = options
            .files
            .iter()
            .map(|f| if f.is_absolute() { f.clone() } else { options.working_dir.join(f) })
            .collect();

        if files.is_empty() {
            if let Some(list) = options.environment.get(COMPOSE_FILE_ENV) {
                files = list
                    .split(':')
                    .filter(|s| !s.is_empty())
                    .map(|f| base.join(f))
                    .collect();
            }
        }

        if files.is_empty() {
            let found = ComposeParser::find_compose_file(&base).ok_or_else(|| {
                StackError::ComposeParse(format!(
                    "No compose file found in {}",
                    base.display()
                ))
            })?;
            files.push(found);
        }

        for file in &files {
            if !file.is_file() {
                return Err(StackError::ComposeParse(format!(
                    "Compose file not found: {}",
                    file.display()
                )));
            }
        }

        Ok(files)
    }

    fn resolve_environment(
        options: &ProjectOptions,
        directory: &Path,
    ) -> Result<HashMap<String, String>> {
        let mut environment = match &options.env_file {
            Some(path) => ComposeParser::load_env_file(path)?,
            None => {
                let default = directory.join(".env");
                if default.is_file() {
                    parse_env_str(&std::fs::read_to_string(default)?)
                } else {
                    HashMap::new()
                }
            }
        };

        for (key, value) in &options.environment {
            environment.insert(key.clone(), value.clone());
        }

        Ok(environment)
    }
}

/// Lowercase, keep `[a-z0-9_-]`, and require a leading letter or digit
pub fn normalize_project_name(name: &str) -> Option<String> {
    let normalized: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    let normalized = normalized.trim_start_matches(['_', '-']).to_string();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

use super::StackConfig;

use std::fmt::{self, Display};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

pub const STACK_CONFIG_ENV_VAR: &str = "STACK_CONFIG";
pub const CREDENTIALS_ENV_VAR: &str = "GOOGLE_CREDENTIALS";
const DEFAULT_STACK_CONFIG_PATH: &str = "stack.yaml";

/// Error representing a problem with loading a stack config file, or with the config itself
#[derive(Debug)]
pub enum StackConfigError {
    Io(io::Error),
    Format(serde_yaml::Error),
    Invalid(String),
}

impl From<serde_yaml::Error> for StackConfigError {
    fn from(err: serde_yaml::Error) -> StackConfigError {
        StackConfigError::Format(err)
    }
}

impl From<io::Error> for StackConfigError {
    fn from(err: io::Error) -> StackConfigError {
        StackConfigError::Io(err)
    }
}

impl Display for StackConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StackConfigError::Io(ref e) => write!(f, "IO error: {}", e),
            StackConfigError::Format(ref e) => write!(f, "Stack config format error: {}", e),
            StackConfigError::Invalid(ref msg) => write!(f, "Invalid stack config: {}", msg),
        }
    }
}
impl std::error::Error for StackConfigError {}

fn get_stack_config_path() -> PathBuf {
    std::env::var(STACK_CONFIG_ENV_VAR)
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STACK_CONFIG_PATH))
}

impl StackConfig {
    /// Loads the stack config from the path in the `STACK_CONFIG` environment variable, or from
    /// `stack.yaml` in the current directory if it isn't set. Credentials that aren't in the file
    /// are taken from the `GOOGLE_CREDENTIALS` environment variable. The path that the config was
    /// loaded from is returned along with it.
    pub fn load() -> Result<(StackConfig, PathBuf), StackConfigError> {
        let path = get_stack_config_path();
        let mut config = StackConfig::load_file(&path)?;
        if config.credentials.is_none() {
            config.credentials = std::env::var(CREDENTIALS_ENV_VAR).ok();
        }
        config.validate()?;
        Ok((config, path))
    }

    /// Loads the stack config at `path`. Relative paths in the file are resolved against the
    /// directory that the file is in. The config is not validated.
    pub fn load_file(path: &Path) -> Result<StackConfig, StackConfigError> {
        log::debug!("Loading stack config from '{}'", path.display());
        let reader = File::open(path)?;
        let mut config: StackConfig = serde_yaml::from_reader(reader)?;
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        config.ca_bundle = dir.join(&config.ca_bundle);
        config.sidecar_template = config.sidecar_template.map(|template| dir.join(template));
        Ok(config)
    }
}

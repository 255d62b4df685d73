use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Config file not found. Looked in:\n\
        - the current directory: cpflow.local.yaml, cpflow.yaml\n\
        - ./.cpflow/\n\
        - ~/.config/cpflow/cpflow.yaml\n\
        A path can also be given with the CPFLOW_CONFIG_PATH environment variable"
    )]
    ConfigFileNotFound,

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

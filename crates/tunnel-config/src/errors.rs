#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("service '{name}': {message}")]
    InvalidService { name: String, message: String },

    #[error("service '{service}': missing required field '{field}'")]
    MissingField { service: String, field: &'static str },
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CniError>;

#[derive(Error, Debug)]
pub enum CniError {
    #[error("unsupported CNI version {version}")]
    UnsupportedVersion { version: String },

    #[error("missing prevResult from earlier plugin")]
    MissingPrevResult,

    #[error("missing required environment variable {name}")]
    MissingEnv { name: String },

    #[error("unknown CNI command '{command}'")]
    UnknownCommand { command: String },

    #[error("failed reading network configuration from stdin")]
    Stdin(#[source] std::io::Error),

    #[error("failed decoding network configuration")]
    Decode(#[source] serde_json::Error),

    #[error("invalid port mapping: {reason}")]
    InvalidPortMapping { reason: String },
}

impl CniError {
    pub fn missing_env(name: impl Into<String>) -> Self {
        Self::MissingEnv { name: name.into() }
    }

    pub fn unsupported_version(version: impl Into<String>) -> Self {
        Self::UnsupportedVersion {
            version: version.into(),
        }
    }

    pub fn invalid_port_mapping(reason: impl Into<String>) -> Self {
        Self::InvalidPortMapping {
            reason: reason.into(),
        }
    }

    pub fn cni_error_code(&self) -> u32 {
        match self {
            Self::UnsupportedVersion { .. } => 1,
            Self::MissingEnv { .. } | Self::UnknownCommand { .. } => 4,
            Self::MissingPrevResult
            | Self::Stdin(_)
            | Self::Decode(_)
            | Self::InvalidPortMapping { .. } => 7,
        }
    }
}

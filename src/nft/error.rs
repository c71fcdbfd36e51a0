use std::ffi::OsString;
use std::io::Error as IoError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NftError>;

#[derive(Error, Debug)]
pub enum NftError {
    #[error("Failed to execute nftables command '{}'", program.to_string_lossy())]
    NftExecution {
        program: OsString,
        #[source]
        inner: IoError,
    },

    #[error("Invalid UTF-8 output from nftables command '{}'", program.to_string_lossy())]
    NftOutputEncoding {
        program: OsString,
        #[source]
        inner: std::string::FromUtf8Error,
    },

    #[error("Invalid JSON response from nftables")]
    NftInvalidJson(#[source] serde_json::Error),

    #[error("nftables command '{}' failed: {hint}", program.to_string_lossy())]
    NftFailed {
        program: OsString,
        hint: String,
        stdout: String,
        stderr: String,
    },

    #[error("Chain '{chain}' not found in table '{table}'")]
    ChainNotFound { table: String, chain: String },

    // Kernel-operation errors are wrapped with the table/chain/version
    // context of the operation that issued them.
    #[error("{context}")]
    Op {
        context: String,
        #[source]
        source: Box<NftError>,
    },
}

impl NftError {
    pub fn chain_not_found(table: impl Into<String>, chain: impl Into<String>) -> Self {
        Self::ChainNotFound {
            table: table.into(),
            chain: chain.into(),
        }
    }

    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Op {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn is_permission_error(&self) -> bool {
        match self {
            Self::NftFailed { stderr, .. } => stderr.contains("Operation not permitted"),
            Self::Op { source, .. } => source.is_permission_error(),
            _ => false,
        }
    }

    /// Whether the error indicates the listed object simply is not there,
    /// as opposed to the listing itself failing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ChainNotFound { .. } => true,
            Self::NftFailed { stderr, .. } => {
                stderr.contains("No such file or directory") || stderr.contains("does not exist")
            }
            Self::Op { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<nftables::helper::NftablesError> for NftError {
    fn from(err: nftables::helper::NftablesError) -> Self {
        match err {
            nftables::helper::NftablesError::NftExecution { program, inner } => {
                Self::NftExecution { program, inner }
            }
            nftables::helper::NftablesError::NftOutputEncoding { program, inner } => {
                Self::NftOutputEncoding { program, inner }
            }
            nftables::helper::NftablesError::NftInvalidJson(e) => Self::NftInvalidJson(e),
            nftables::helper::NftablesError::NftFailed {
                program,
                hint,
                stdout,
                stderr,
            } => Self::NftFailed {
                program,
                hint,
                stdout,
                stderr,
            },
        }
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    // Wraps a failing plugin operation the way it is reported to the
    // container runtime: "<plugin> <operation> failed: <cause>".
    #[error("{plugin} {operation} failed")]
    Plugin {
        plugin: String,
        operation: String,
        #[source]
        source: Box<Error>,
    },

    // Check treats a missing table/chain/jump as a hard failure naming it.
    #[error("required resource missing: {resource}")]
    ResourceMissing { resource: String },

    #[error("Permission denied - {context}: {details}")]
    PermissionDenied { context: String, details: String },

    // Module-specific errors converted from module error types
    #[error(transparent)]
    CniModule(#[from] crate::cni::error::CniError),

    #[error(transparent)]
    NftModule(#[from] crate::nft::error::NftError),

    #[error(transparent)]
    ValidationModule(#[from] crate::plugin::error::ValidationError),
}

// Helper methods for creating errors with context
impl Error {
    pub fn plugin_op(
        plugin: impl Into<String>,
        operation: impl Into<String>,
        source: Error,
    ) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn resource_missing(resource: impl Into<String>) -> Self {
        Self::ResourceMissing {
            resource: resource.into(),
        }
    }

    pub fn permission_denied(context: impl Into<String>, details: impl Into<String>) -> Self {
        Self::PermissionDenied {
            context: context.into(),
            details: details.into(),
        }
    }

    /// Well-known CNI error code used in the error document printed on failure.
    pub fn cni_error_code(&self) -> u32 {
        match self {
            Self::CniModule(e) => e.cni_error_code(),
            Self::ValidationModule(_) => 7,
            Self::Plugin { source, .. } => source.cni_error_code(),
            Self::ResourceMissing { .. } => 11,
            Self::NftModule(e) if e.is_permission_error() => 4,
            Self::NftModule(_) => 11,
            Self::PermissionDenied { .. } => 4,
            Self::Io(_) | Self::Json(_) => 5,
        }
    }
}

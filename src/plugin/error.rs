use thiserror::Error;

/// Attachment-result and port-mapping validation failures. These surface
/// before any kernel resource is touched.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("the attachment result contains no network interfaces")]
    NoInterfaces,

    #[error("the attachment result contains an interface with no name")]
    MissingInterfaceName,

    #[error("found duplicate interface name {name}")]
    DuplicateInterface { name: String },

    #[error("the attachment result contains no IP addresses")]
    NoAddresses,

    #[error("address {address} is not bound to any interface")]
    UnboundAddress { address: String },

    #[error("address {address} references unknown interface index {index}")]
    DanglingAddressReference { address: String, index: usize },

    #[error("the attachment result contains an empty IP address")]
    EmptyAddress,

    #[error("invalid IP address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("address {address} declares IP version {declared} but is IPv{actual}")]
    VersionMismatch {
        address: String,
        declared: String,
        actual: String,
    },

    #[error("interface {name} has no associated IP information")]
    InterfaceWithoutAddresses { name: String },

    #[error("invalid {kind} port number {port}: must be between 1 and 65535")]
    InvalidPort { kind: &'static str, port: i32 },

    #[error("unsupported protocol: {protocol}")]
    UnsupportedProtocol { protocol: String },

    #[error("invalid host IP '{input}': {reason}")]
    InvalidHostIp { input: String, reason: String },
}

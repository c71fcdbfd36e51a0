//! Thin adapter around the CNI invocation protocol: command and container
//! identity arrive in environment variables, the network configuration (with
//! the previous plugin's result embedded) arrives on stdin, and the result
//! or error document leaves on stdout. Everything interesting happens in
//! [`crate::plugin`].

pub mod config;
pub mod error;
pub mod types;

#[cfg(test)]
mod tests;

use crate::cni::config::SUPPORTED_CNI_VERSIONS;
use crate::cni::error::CniError;
use crate::cni::types::AttachmentResult;
use crate::{Error, Result};
use serde::Serialize;
use std::env;
use std::io::Read;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Check,
    Del,
    Version,
}

/// One plugin invocation as handed over by the container runtime.
#[derive(Debug)]
pub struct Invocation {
    pub command: Command,
    pub container_id: String,
    pub ifname: String,
    pub stdin: Vec<u8>,
}

impl Invocation {
    /// Reads the CNI environment contract. Stdin is consumed for every
    /// command except VERSION, which carries no configuration.
    pub fn from_env() -> Result<Self> {
        let command = match required_env("CNI_COMMAND")?.as_str() {
            "ADD" => Command::Add,
            "CHECK" => Command::Check,
            "DEL" => Command::Del,
            "VERSION" => Command::Version,
            other => {
                return Err(CniError::UnknownCommand {
                    command: other.to_string(),
                }
                .into());
            }
        };

        if command == Command::Version {
            return Ok(Self {
                command,
                container_id: String::new(),
                ifname: String::new(),
                stdin: Vec::new(),
            });
        }

        let container_id = required_env("CNI_CONTAINERID")?;
        let ifname = env::var("CNI_IFNAME").unwrap_or_default();

        let mut stdin = Vec::new();
        std::io::stdin()
            .read_to_end(&mut stdin)
            .map_err(CniError::Stdin)?;

        Ok(Self {
            command,
            container_id,
            ifname,
            stdin,
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(CniError::missing_env(name).into()),
    }
}

/// ADD passes the previous result through unchanged; this plugin pair never
/// synthesizes addresses.
pub fn print_result(result: &AttachmentResult, cni_version: &str) -> Result<()> {
    let mut result = result.clone();
    result.cni_version = cni_version.to_string();
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

#[derive(Serialize)]
struct VersionDocument {
    #[serde(rename = "cniVersion")]
    cni_version: &'static str,
    #[serde(rename = "supportedVersions")]
    supported_versions: &'static [&'static str],
}

pub fn print_version_document() {
    let doc = VersionDocument {
        cni_version: "0.4.0",
        supported_versions: SUPPORTED_CNI_VERSIONS,
    };
    match serde_json::to_string(&doc) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("failed serializing version document: {}", e),
    }
}

#[derive(Serialize)]
struct ErrorDocument {
    #[serde(rename = "cniVersion")]
    cni_version: String,
    code: u32,
    msg: String,
    details: String,
}

/// Prints the CNI error document to stdout and returns the process exit
/// code the runtime expects.
pub fn report_error(err: &Error, cni_version: &str) -> i32 {
    error!("{:#}", ErrorChain(err));

    let doc = ErrorDocument {
        cni_version: if cni_version.is_empty() {
            "0.4.0".to_string()
        } else {
            cni_version.to_string()
        },
        code: err.cni_error_code(),
        msg: err.to_string(),
        details: format!("{}", ErrorChain(err)),
    };
    match serde_json::to_string(&doc) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("failed serializing error document: {}", e),
    }
    1
}

/// Renders an error with its full source chain, ": "-separated.
struct ErrorChain<'a>(&'a Error);

impl std::fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = std::error::Error::source(self.0);
        while let Some(cause) = source {
            write!(f, ": {}", cause)?;
            source = cause.source();
        }
        Ok(())
    }
}

//! Privilege pre-flight. Programming nftables needs CAP_NET_ADMIN in the
//! effective set; failing early gives a clearer error than the kernel's
//! EPERM mid-batch.

use crate::{Error, Result};
use caps::{CapSet, Capability};
use tracing::debug;

pub fn check_capabilities() -> Result<()> {
    let effective = caps::read(None, CapSet::Effective).map_err(|e| {
        Error::permission_denied(
            "capability check",
            format!("failed reading effective capability set: {}", e),
        )
    })?;

    if !effective.contains(&Capability::CAP_NET_ADMIN) {
        return Err(Error::permission_denied(
            "capability check",
            "CAP_NET_ADMIN is required to manage nftables rules; \
             run as root or grant the capability to the plugin binary",
        ));
    }

    debug!("CAP_NET_ADMIN present in effective set");
    Ok(())
}

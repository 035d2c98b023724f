//! Local node identity.

use meshtalk_transport::UNASSIGNED_ADDRESS;
use meshtalk_wire::DisplayName;
use std::sync::atomic::{AtomicU16, Ordering};
use tracing::info;

/// Name and mesh address of the local node.
///
/// The address stays [`UNASSIGNED_ADDRESS`] until provisioning assigns one.
#[derive(Debug)]
pub struct NodeIdentity {
    name: DisplayName,
    address: AtomicU16,
}

impl NodeIdentity {
    /// Create an identity
    pub fn new(name: impl Into<DisplayName>, address: u16) -> Self {
        Self {
            name: name.into(),
            address: AtomicU16::new(address),
        }
    }

    /// Create an identity that still waits for provisioning
    pub fn unprovisioned(name: impl Into<DisplayName>) -> Self {
        Self::new(name, UNASSIGNED_ADDRESS)
    }

    /// Display name
    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    /// Current mesh address
    pub fn address(&self) -> u16 {
        self.address.load(Ordering::Acquire)
    }

    /// Record the address assigned by provisioning
    pub fn set_address(&self, address: u16) {
        let previous = self.address.swap(address, Ordering::AcqRel);
        if previous != address {
            info!(
                "Node {} address 0x{:04X} -> 0x{:04X}",
                self.name, previous, address
            );
        }
    }

    /// Whether provisioning has completed
    pub fn is_provisioned(&self) -> bool {
        self.address() != UNASSIGNED_ADDRESS
    }
}

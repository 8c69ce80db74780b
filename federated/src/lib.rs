//! RTI coordinator and federate client.
//!
//! This crate implements the wire protocol, admission handshake, tag-advance
//! engine, message relay, stop consensus, and clock synchronization that tie
//! a federation of otherwise-independent local schedulers together. The
//! local scheduler itself — the per-federate reaction queue that decides
//! what to run at a granted tag — is not part of this crate; federates
//! plug one in through [`LocalScheduler`].

pub mod client;
pub mod engine;
pub mod graph;
pub mod rti;
pub mod wire;

#[cfg(test)]
mod tests;

pub use graph::FederationGraph;
pub use wire::{RejectReason, RtiMessage, WireError};

use rti_core::{FederateId, Tag};

/// The seam between this crate and a federate's local scheduler. The client
/// calls into this trait, synchronously and from its own task, to report
/// RTI-granted tags and deliver inbound messages; implementations are
/// expected to hand off to their own queue or channel rather than block.
pub trait LocalScheduler: Send + Sync {
    /// The RTI granted (or provisionally granted) a tag advance.
    fn tag_advance_granted(&self, tag: Tag, provisional: bool);

    /// A timestamped message arrived from another federate, addressed to
    /// one of this federate's input ports.
    fn message_received(&self, port: rti_core::PortId, tag: Tag, data: Vec<u8>);

    /// An untimed message arrived, to be processed outside of logical time.
    fn message_received_untimed(&self, port: rti_core::PortId, data: Vec<u8>) {
        let _ = (port, data);
    }

    /// The RTI (or a downstream peer) reports that no event will arrive on
    /// `port` at or before `tag`.
    fn port_known_absent(&self, port: rti_core::PortId, tag: Tag) {
        let _ = (port, tag);
    }

    /// The federation has agreed to stop at `tag`.
    fn stop_granted(&self, tag: Tag) {
        let _ = tag;
    }
}

/// Top-level error type for operations that cross the RTI/federate boundary
/// but aren't naturally scoped to [`wire::WireError`] or a specific reject.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection rejected: {0:?}")]
    Rejected(RejectReason),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A federate's admission/lifecycle state (spec §3 Federate record `state`,
/// §4.7 federate client state machine collapsed to the RTI's view of it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederateState {
    NotConnected,
    Pending,
    Granted,
    Stopped,
}

/// A federate id together with the federation name it claims to belong to —
/// the payload of the wire FED_ID message (spec §4.1, §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FedIdentity {
    pub federate_id: FederateId,
    pub federation_id: String,
}

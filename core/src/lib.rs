//! Core time and identifier types shared by the RTI coordinator and the
//! federate client: [`time::Tag`], [`time::Timestamp`], [`time::Interval`],
//! and the dense [`keys::FederateId`]/[`keys::PortId`] identifiers.

pub mod constants;
pub mod keys;
pub mod time;

pub use keys::{FederateId, PortId};
pub use time::{Interval, Tag, Timestamp};

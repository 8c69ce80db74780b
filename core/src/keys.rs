//! Dense identifiers for federates and network ports.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

rti_tinymap::key_type! {
    /// Identifies one federate in a federation. Federate ids are dense, `0..N`.
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub FederateId
}

rti_tinymap::key_type! {
    /// Identifies a network port, unique within the federate that owns it.
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub PortId
}

impl FederateId {
    /// The wire representation of a federate id is a `u16` (spec §4.1 FED_ID payload).
    pub fn as_u16(self) -> u16 {
        use rti_tinymap::Key;
        self.index() as u16
    }

    pub fn from_u16(value: u16) -> Self {
        Self::from(value as usize)
    }
}

impl PortId {
    pub fn as_u16(self) -> u16 {
        use rti_tinymap::Key;
        self.index() as u16
    }

    pub fn from_u16(value: u16) -> Self {
        Self::from(value as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn federate_id_round_trips_through_u16() {
        let id = FederateId::from(7usize);
        assert_eq!(FederateId::from_u16(id.as_u16()), id);
    }
}

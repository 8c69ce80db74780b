//! C5: stop consensus (spec §4.5). Two-phase: a federate (Phase A) proposes a
//! stop time, which the RTI forwards to every federate that hasn't yet
//! requested one; each of those replies (Phase B). Once every federate has
//! requested — including federates that disconnected before being asked,
//! who count as implicitly requesting — the RTI broadcasts `StopGranted`
//! exactly once.

use rti_core::{FederateId, Timestamp};
use rti_tinymap::KeySet;

pub struct StopCoordinator {
    max_stop_time: Timestamp,
    requesting: KeySet<FederateId>,
    number_of_federates: usize,
    granted: bool,
}

impl StopCoordinator {
    pub fn new(number_of_federates: usize, initial_max_stop_time: Timestamp) -> Self {
        Self {
            max_stop_time: initial_max_stop_time,
            requesting: KeySet::with_capacity(number_of_federates),
            number_of_federates,
            granted: false,
        }
    }

    pub fn max_stop_time(&self) -> Timestamp {
        self.max_stop_time
    }

    pub fn is_requesting(&self, id: FederateId) -> bool {
        self.requesting[id]
    }

    pub fn is_granted(&self) -> bool {
        self.granted
    }

    /// Record that `id` has now requested a stop no earlier than `proposed`.
    /// Returns the tag to broadcast as `StopGranted` the first time this call
    /// brings every federate's request count up to the federation size;
    /// `None` afterwards, since the grant is latched and sent only once.
    pub fn record_request(&mut self, id: FederateId, proposed: Timestamp) -> Option<Timestamp> {
        self.max_stop_time = self.max_stop_time.max(proposed);
        self.mark_requesting(id)
    }

    /// Record that `id` disconnected while the protocol was in-flight: it
    /// counts as implicitly requesting, but without contributing a value to
    /// `max_stop_time`, which preserves progress (spec §4.5 edge case: a
    /// federate that disconnects mid-protocol shouldn't be able to drag
    /// `max_stop_time` to its own stale completion point).
    pub fn record_disconnect(&mut self, id: FederateId) -> Option<Timestamp> {
        self.mark_requesting(id)
    }

    fn mark_requesting(&mut self, id: FederateId) -> Option<Timestamp> {
        self.requesting.insert(id);
        if !self.granted && self.requesting.iter().len() >= self.number_of_federates {
            self.granted = true;
            Some(self.max_stop_time)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_exactly_once_when_all_federates_have_requested() {
        let mut coord = StopCoordinator::new(3, Timestamp::ZERO);
        assert_eq!(
            coord.record_request(FederateId::from(0), Timestamp::from_nanos(10)),
            None
        );
        assert_eq!(
            coord.record_request(FederateId::from(1), Timestamp::from_nanos(5)),
            None
        );
        assert_eq!(
            coord.record_request(FederateId::from(2), Timestamp::from_nanos(20)),
            Some(Timestamp::from_nanos(20))
        );
        // A later, redundant request does not grant again.
        assert_eq!(
            coord.record_request(FederateId::from(2), Timestamp::from_nanos(30)),
            None
        );
    }

    #[test]
    fn disconnect_counts_as_requesting_without_raising_max_stop_time() {
        let mut coord = StopCoordinator::new(3, Timestamp::ZERO);
        coord.record_request(FederateId::from(0), Timestamp::from_nanos(5));
        assert_eq!(coord.record_disconnect(FederateId::from(1)), None);
        assert_eq!(coord.max_stop_time(), Timestamp::from_nanos(5));
        assert!(coord.is_requesting(FederateId::from(1)));
        assert_eq!(
            coord.record_request(FederateId::from(2), Timestamp::from_nanos(1)),
            Some(Timestamp::from_nanos(5))
        );
    }

    #[test]
    fn max_stop_time_tracks_the_largest_proposal() {
        let mut coord = StopCoordinator::new(2, Timestamp::ZERO);
        coord.record_request(FederateId::from(0), Timestamp::from_nanos(5));
        assert_eq!(coord.max_stop_time(), Timestamp::from_nanos(5));
        coord.record_request(FederateId::from(1), Timestamp::from_nanos(2));
        assert_eq!(coord.max_stop_time(), Timestamp::from_nanos(5));
    }
}

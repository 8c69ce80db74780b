//! The start-time barrier (spec §4.2): each federate proposes a start time
//! over a [`tokio::sync::mpsc`] channel; once the RTI has heard from every
//! federate it picks the maximum and broadcasts it back over a
//! [`tokio::sync::watch`] channel. `DELAY_START` is added by the caller
//! (the per-federate session, mirroring where the offset is applied in the
//! RTI's per-federate handler) before the broadcast value is sent out on
//! the wire.

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use rti_core::Timestamp;

/// The federate side of the start time negotiation.
#[derive(Debug, Clone)]
pub struct StartSync {
    start_time_proposals: mpsc::Sender<Timestamp>,
    start_time: watch::Receiver<Timestamp>,
}

impl StartSync {
    /// Propose a start time to the RTI, then wait for the negotiated result.
    pub async fn propose_start_time(
        &mut self,
        proposal: Timestamp,
    ) -> Result<Timestamp, watch::error::RecvError> {
        self.start_time_proposals
            .send(proposal)
            .await
            .expect("synchronizer task outlives every federate session");
        self.start_time.changed().await?;
        Ok(*self.start_time.borrow())
    }

    pub fn watcher(&self) -> watch::Receiver<Timestamp> {
        self.start_time.clone()
    }
}

/// The RTI side: collects one proposal per federate, then picks the max.
pub struct Synchronizer {
    num_federates: usize,
    start_time_proposals: mpsc::Receiver<Timestamp>,
    start_time: watch::Sender<Timestamp>,
}

impl Synchronizer {
    pub async fn negotiate_start_time(self) -> Timestamp {
        tracing::debug!(
            "Waiting for start time proposals from {} federates..",
            self.num_federates
        );

        let proposals = ReceiverStream::new(self.start_time_proposals)
            .inspect(|proposal| tracing::debug!(?proposal, "Received start time proposal"))
            .take(self.num_federates)
            .collect::<Vec<_>>()
            .await;

        let max_start_time = proposals
            .into_iter()
            .max()
            .expect("at least one proposal per federate");

        self.start_time
            .send(max_start_time)
            .expect("at least one StartSync handle outlives negotiation");

        tracing::debug!(?max_start_time, "Negotiated start time");
        max_start_time
    }
}

pub fn create(num_federates: usize) -> (StartSync, Synchronizer) {
    let (proposals_tx, proposals_rx) = mpsc::channel(num_federates.max(1));
    let (start_time_tx, start_time_rx) = watch::channel(Timestamp::ZERO);

    let federate = StartSync {
        start_time_proposals: proposals_tx,
        start_time: start_time_rx,
    };
    let synchronizer = Synchronizer {
        num_federates,
        start_time_proposals: proposals_rx,
        start_time: start_time_tx,
    };
    (federate, synchronizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn negotiates_the_maximum_of_all_proposals() {
        let (federate, synchronizer) = create(2);

        let sync_handle = tokio::spawn(synchronizer.negotiate_start_time());

        let mut fed1 = federate.clone();
        let h1 =
            tokio::spawn(async move { fed1.propose_start_time(Timestamp::from_nanos(10)).await });

        let mut fed2 = federate.clone();
        let h2 =
            tokio::spawn(async move { fed2.propose_start_time(Timestamp::from_nanos(30)).await });

        let rti_start = sync_handle.await.unwrap();
        let f1_start = h1.await.unwrap().unwrap();
        let f2_start = h2.await.unwrap().unwrap();

        assert_eq!(rti_start, Timestamp::from_nanos(30));
        assert_eq!(f1_start, rti_start);
        assert_eq!(f2_start, rti_start);
    }
}

//! Client state and methods for handling async messages from the RTI.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use rti_core::{FederateId, Tag, Timestamp};
use tokio::sync::{mpsc, watch};

use crate::{wire::RtiMessage, LocalScheduler};

use super::ClientError;

/// The state for a spawned task that handles messages received from the RTI
/// for the lifetime of a connection, driving a [`LocalScheduler`].
pub struct Handler {
    federate_id: FederateId,
    start_time: Timestamp,
    scheduler: Arc<dyn LocalScheduler>,
    sender: mpsc::UnboundedSender<RtiMessage>,
    last_tag: watch::Sender<Tag>,
    last_tag_provisional: bool,
    address_reply: watch::Sender<i32>,
}

impl Handler {
    pub fn new(
        federate_id: FederateId,
        start_time: Timestamp,
        scheduler: Arc<dyn LocalScheduler>,
        sender: mpsc::UnboundedSender<RtiMessage>,
        last_tag: watch::Sender<Tag>,
        address_reply: watch::Sender<i32>,
    ) -> Self {
        Self {
            federate_id,
            start_time,
            scheduler,
            sender,
            last_tag,
            last_tag_provisional: false,
            address_reply,
        }
    }

    /// Handle a (provisional or ordinary) tag advance grant from the RTI.
    ///
    /// A grant must strictly exceed the last one, except that a provisional
    /// grant may repeat the tag of an earlier provisional grant (spec §9 P1:
    /// "tag advance grants are strictly monotonically increasing", relaxed
    /// only for repeated PTAGs at the same tag).
    #[tracing::instrument(skip(self))]
    fn handle_tag_advance_grant(&mut self, tag: Tag, provisional: bool) -> Result<(), ClientError> {
        let last = *self.last_tag.borrow();
        let monotonic = tag > last || (tag == last && self.last_tag_provisional);
        if !monotonic {
            tracing::error!(?tag, ?last, "tag advance grant did not exceed the last one");
            return Err(ClientError::NonMonotonicGrant { tag, last });
        }

        self.last_tag.send_replace(tag);
        self.last_tag_provisional = provisional;
        tracing::debug!(?tag, provisional, "tag advance granted");
        self.scheduler.tag_advance_granted(tag, provisional);
        Ok(())
    }

    /// Handle a single message received from the RTI.
    #[tracing::instrument(skip(self, msg))]
    fn handle_message(&mut self, msg: RtiMessage) -> Result<(), ClientError> {
        match msg {
            RtiMessage::TimeAdvanceGrant(tag) => self.handle_tag_advance_grant(tag, false),
            RtiMessage::ProvisionalTimeAdvanceGrant(tag) => {
                self.handle_tag_advance_grant(tag, true)
            }
            RtiMessage::Message { port, data, .. } => {
                self.scheduler.message_received_untimed(port, data);
                Ok(())
            }
            RtiMessage::TimedMessage {
                port, tag, data, ..
            } => {
                self.scheduler.message_received(port, tag, data);
                Ok(())
            }
            RtiMessage::StopRequest(proposed) => {
                tracing::debug!(?proposed, "RTI forwarded a stop request, replying");
                self.sender
                    .send(RtiMessage::StopRequestReply(proposed))
                    .map_err(|err| ClientError::Other(err.into()))
            }
            RtiMessage::StopGranted(tag) => {
                tracing::info!(?tag, "federation stop granted");
                self.scheduler.stop_granted(Tag::new(tag, 0));
                Ok(())
            }
            RtiMessage::AddressAd(port) => {
                tracing::debug!(port, "peer-to-peer address query answered");
                self.address_reply.send_replace(port);
                Ok(())
            }
            RtiMessage::Reject(reason) => {
                tracing::error!(?reason, "RTI rejected this federate");
                Err(ClientError::Rejected(reason))
            }
            other => Err(ClientError::UnexpectedMessage(other)),
        }
    }

    /// Drive the connection: read and handle every message from `stream`
    /// until the RTI closes the connection or a protocol error occurs.
    #[tracing::instrument(skip(self, stream), fields(federate_id = ?self.federate_id, start_time = ?self.start_time))]
    pub async fn run<St>(mut self, mut stream: St) -> Result<(), ClientError>
    where
        St: Stream<Item = Result<RtiMessage, crate::WireError>> + Unpin,
    {
        while let Some(msg) = stream.next().await {
            let msg = msg?;
            self.handle_message(msg)?;
        }
        Ok(())
    }
}

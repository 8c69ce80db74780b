//! The federate client (C7): connects to the RTI, clears admission and the
//! start-time barrier, then drives the NET/LTC/TAG state machine on behalf
//! of a [`crate::LocalScheduler`] for the rest of the federate's lifetime.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rti_core::{constants, FederateId, Interval, Tag, Timestamp};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Framed;

use crate::{
    wire::{RejectReason, RtiMessage, WireCodec, WireError},
    LocalScheduler,
};

mod handler;
mod p2p;
use handler::Handler;

/// The error type for the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("received an unexpected message from the RTI: {0:?}")]
    UnexpectedMessage(RtiMessage),

    #[error("the RTI rejected the federate: {0:?}")]
    Rejected(RejectReason),

    #[error("the RTI unexpectedly closed the connection")]
    UnexpectedClose,

    #[error("received a tag advance grant of {tag} that did not exceed the last grant of {last}")]
    NonMonotonicGrant { tag: Tag, last: Tag },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Static neighbor information a federate needs to know about itself: who
/// feeds it (and with what delay), and who it feeds. Mirrors the relevant
/// slice of [`crate::FederationGraph`] without requiring the client to see
/// the whole federation's topology.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub federate_id: FederateId,
    pub federation_id: String,
    pub upstream: Vec<(FederateId, Interval)>,
    pub downstream: Vec<FederateId>,
    pub clock_sync_enabled: bool,
}

impl Config {
    pub fn new(federate_id: FederateId, federation_id: impl Into<String>) -> Self {
        Self {
            federate_id,
            federation_id: federation_id.into(),
            upstream: Vec::new(),
            downstream: Vec::new(),
            clock_sync_enabled: false,
        }
    }

    pub fn with_upstream(mut self, id: FederateId, delay: Interval) -> Self {
        self.upstream.push((id, delay));
        self
    }

    pub fn with_downstream(mut self, id: FederateId) -> Self {
        self.downstream.push(id);
        self
    }

    pub fn with_clock_sync(mut self, enabled: bool) -> Self {
        self.clock_sync_enabled = enabled;
        self
    }

    fn has_upstream(&self) -> bool {
        !self.upstream.is_empty()
    }

    fn has_downstream(&self) -> bool {
        !self.downstream.is_empty()
    }
}

/// Handles returned alongside a [`Client`]: the background task that reads
/// messages from the RTI for the lifetime of the connection.
pub struct ClientHandles {
    pub handler_handle: JoinHandle<Result<(), ClientError>>,
}

#[derive(Debug)]
pub struct Client {
    federate_id: FederateId,
    start_time: Timestamp,
    has_upstream: bool,
    has_downstream: bool,
    sender: mpsc::UnboundedSender<RtiMessage>,
    last_tag: watch::Receiver<Tag>,
    address_reply: watch::Receiver<i32>,
    /// Serializes [`Client::query_address`] calls: `ADDRESS_AD` replies carry
    /// no federate id, so two queries in flight at once could resolve each
    /// other's waiter with the wrong answer.
    address_query_lock: tokio::sync::Mutex<()>,
}

impl Client {
    pub fn federate_id(&self) -> FederateId {
        self.federate_id
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// The most recently granted tag, or [`Tag::NEVER`] if none has arrived yet.
    pub fn last_tag(&self) -> Tag {
        *self.last_tag.borrow()
    }

    /// Ask the RTI for permission to advance to `tag`. Returns immediately
    /// with `tag` if this federate has no upstream and no downstream,
    /// otherwise sends `NEXT_EVENT_TAG(tag)` and waits for the next tag
    /// advance grant.
    #[tracing::instrument(skip(self))]
    pub async fn advance_request(&self, tag: Tag) -> Result<Tag, ClientError> {
        if !self.has_upstream && !self.has_downstream {
            return Ok(tag);
        }

        self.send_next_event_tag(tag)?;

        let mut rx = self.last_tag.clone();
        rx.changed()
            .await
            .map_err(|_| ClientError::UnexpectedClose)?;
        Ok(*rx.borrow())
    }

    /// Send a [`Tag`] to the RTI using the `NEXT_EVENT_TAG` message.
    #[tracing::instrument(skip(self))]
    pub fn send_next_event_tag(&self, tag: Tag) -> Result<(), ClientError> {
        self.sender
            .send(RtiMessage::NextEventTag(tag))
            .map_err(|err| ClientError::Other(err.into()))
    }

    /// Report a logical tag complete (LTC) to the RTI.
    #[tracing::instrument(skip(self))]
    pub fn send_logical_tag_complete(&self, tag: Tag) -> Result<(), ClientError> {
        self.sender
            .send(RtiMessage::LogicalTagComplete(tag))
            .map_err(|err| ClientError::Other(err.into()))
    }

    /// Send a timestamped message to `port` on `federate`, via the RTI.
    #[tracing::instrument(skip(self, data))]
    pub fn send_timed_message(
        &self,
        federate: FederateId,
        port: rti_core::PortId,
        tag: Tag,
        data: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.sender
            .send(RtiMessage::TimedMessage {
                port,
                federate,
                tag,
                data,
            })
            .map_err(|err| ClientError::Other(err.into()))
    }

    /// Send an untimed message to `port` on `federate`, via the RTI.
    #[tracing::instrument(skip(self, data))]
    pub fn send_message(
        &self,
        federate: FederateId,
        port: rti_core::PortId,
        data: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.sender
            .send(RtiMessage::Message {
                port,
                federate,
                data,
            })
            .map_err(|err| ClientError::Other(err.into()))
    }

    /// Propose a stop time to the RTI (phase A of stop consensus, spec §4.5).
    #[tracing::instrument(skip(self))]
    pub fn request_stop(&self, proposed: Timestamp) -> Result<(), ClientError> {
        self.sender
            .send(RtiMessage::StopRequest(proposed))
            .map_err(|err| ClientError::Other(err.into()))
    }

    /// Ask the RTI for `target`'s advertised peer-to-peer listening port,
    /// blocking until it answers (spec §4.7: the RTI defers the reply until
    /// the peer advertises, or answers immediately with `-1` if the peer is
    /// gone). Only one call may be in flight per client at a time.
    #[tracing::instrument(skip(self))]
    pub async fn query_address(&self, target: FederateId) -> Result<i32, ClientError> {
        let _guard = self.address_query_lock.lock().await;
        let mut rx = self.address_reply.clone();
        self.sender
            .send(RtiMessage::AddressQuery(target))
            .map_err(|err| ClientError::Other(err.into()))?;
        rx.changed()
            .await
            .map_err(|_| ClientError::UnexpectedClose)?;
        Ok(*rx.borrow())
    }

    /// Resign from the federation, closing the connection to the RTI.
    #[tracing::instrument(skip(self))]
    pub fn resign(&self) -> Result<(), ClientError> {
        self.sender
            .send(RtiMessage::Resign)
            .map_err(|err| ClientError::Other(err.into()))
    }
}

/// Connect to an RTI at `addr`, complete admission and the start-time
/// barrier, then spawn a background task that drives `scheduler` for the
/// remainder of the connection's lifetime.
#[tracing::instrument(skip(config, scheduler))]
pub async fn connect_to_rti(
    addr: SocketAddr,
    config: Config,
    scheduler: Arc<dyn LocalScheduler>,
) -> Result<(Client, ClientHandles), ClientError> {
    tracing::info!("connecting to RTI");

    let socket = TcpStream::connect(addr)
        .await
        .map_err(|err| ClientError::Other(err.into()))?;
    let mut frame = Framed::new(socket, WireCodec);

    frame
        .send(RtiMessage::FedId {
            federate_id: config.federate_id,
            federation_id: config.federation_id.clone(),
        })
        .await?;

    match frame.next().await {
        Some(Ok(RtiMessage::Ack)) => {}
        Some(Ok(RtiMessage::Reject(reason))) => return Err(ClientError::Rejected(reason)),
        Some(Ok(other)) => return Err(ClientError::UnexpectedMessage(other)),
        Some(Err(err)) => return Err(err.into()),
        None => return Err(ClientError::UnexpectedClose),
    }

    frame.send(RtiMessage::UdpPort(None)).await?;

    let (p2p_listener, p2p_port) = p2p::bind_ephemeral()
        .await
        .map_err(|err| ClientError::Other(err.into()))?;
    tracing::debug!(p2p_port, "advertising peer-to-peer listening port");
    frame.send(RtiMessage::AddressAd(p2p_port as i32)).await?;

    if config.clock_sync_enabled {
        run_clock_sync_rounds(
            &mut frame,
            config.federate_id,
            constants::CLOCK_SYNCHRONIZATION_T4_MESSAGES_PER_INTERVAL,
        )
        .await?;
    }

    tracing::debug!("proposing start time");
    frame.send(RtiMessage::Timestamp(Timestamp::now())).await?;
    let start_time = match frame.next().await {
        Some(Ok(RtiMessage::Timestamp(start_time))) => start_time,
        Some(Ok(other)) => return Err(ClientError::UnexpectedMessage(other)),
        Some(Err(err)) => return Err(err.into()),
        None => return Err(ClientError::UnexpectedClose),
    };
    tracing::debug!(?start_time, "negotiated start time");

    let (sink, stream) = frame.split();

    let sender = {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(UnboundedReceiverStream::new(receiver).map(Ok).forward(sink));
        sender
    };

    let (last_tag_tx, last_tag_rx) = watch::channel(Tag::NEVER);
    let (address_reply_tx, address_reply_rx) = watch::channel(-1);
    let handler = Handler::new(
        config.federate_id,
        start_time,
        scheduler,
        sender.clone(),
        last_tag_tx,
        address_reply_tx,
    );

    let handler_handle = tokio::spawn(async move {
        let result = handler.run(stream).await;
        tracing::info!("client handler exiting");
        result
    });

    tokio::spawn(p2p::run(p2p_listener));

    Ok((
        Client {
            federate_id: config.federate_id,
            start_time,
            has_upstream: config.has_upstream(),
            has_downstream: config.has_downstream(),
            sender,
            last_tag: last_tag_rx,
            address_reply: address_reply_rx,
            address_query_lock: tokio::sync::Mutex::new(()),
        },
        ClientHandles { handler_handle },
    ))
}

/// The federate side of C6's fixed admission-time rounds: respond to each
/// `T1` with a `T3`, then read back `T4`/`T4_CODED_PROBE`. Offset
/// computation from the four timestamps is left to `scheduler` integrations
/// that care about it; this loop only drives the exchange.
async fn run_clock_sync_rounds(
    frame: &mut Framed<TcpStream, WireCodec>,
    federate_id: FederateId,
    rounds: usize,
) -> Result<(), WireError> {
    for round in 0..rounds {
        let t1 = match frame.next().await {
            Some(Ok(RtiMessage::ClockSyncT1(t1))) => t1,
            Some(Ok(other)) => {
                tracing::warn!(round, ?other, "expected ClockSyncT1 during clock sync round");
                continue;
            }
            Some(Err(err)) => return Err(err),
            None => return Err(WireError::Closed),
        };

        let t2 = Timestamp::now();
        frame
            .send(RtiMessage::ClockSyncT3 {
                federate_id,
                timestamp: t2,
            })
            .await?;

        let t4 = match frame.next().await {
            Some(Ok(RtiMessage::ClockSyncT4(t4))) => t4,
            Some(Ok(other)) => return Err(unexpected_clock_sync_message(other)),
            Some(Err(err)) => return Err(err),
            None => return Err(WireError::Closed),
        };
        let t4_probe = match frame.next().await {
            Some(Ok(RtiMessage::ClockSyncT4CodedProbe(t))) => t,
            Some(Ok(other)) => return Err(unexpected_clock_sync_message(other)),
            Some(Err(err)) => return Err(err),
            None => return Err(WireError::Closed),
        };

        tracing::trace!(round, ?t1, ?t2, ?t4, ?t4_probe, "clock sync round complete");
    }
    Ok(())
}

fn unexpected_clock_sync_message(_other: RtiMessage) -> WireError {
    WireError::UnexpectedEof
}

//! The RTI: admits federates (C2), then owns the shared tag-advance (C3),
//! relay (C4), and stop-consensus (C5) state behind one coarse mutex (spec §9
//! "coarse mutex acceptable" / §5 "single federation mutex").

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use rti_core::{FederateId, Interval, Timestamp};
use rti_tinymap::TinySecondaryMap;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::codec::Framed;

use crate::{
    engine::FederateTimes, graph::FederationGraph, rti::stop::StopCoordinator,
    wire::{RejectReason, RtiMessage, WireCodec},
    Error, FederateState,
};

mod clock_sync;
mod session;
mod start_time;
mod stop;

pub use start_time::StartSync;

/// Configuration for one run of the RTI (spec §4.2, §6: federation id, size,
/// static topology, and whether clock sync is offered at all).
#[derive(Debug, Clone)]
pub struct Config {
    federation_id: String,
    number_of_federates: usize,
    graph: FederationGraph,
    clock_sync_enabled: bool,
}

impl Config {
    pub fn new(federation_id: impl Into<String>) -> Self {
        Self {
            federation_id: federation_id.into(),
            number_of_federates: 0,
            graph: FederationGraph::new(0),
            clock_sync_enabled: false,
        }
    }

    pub fn with_federates(mut self, n: usize) -> Self {
        self.number_of_federates = n;
        self.graph = FederationGraph::new(n);
        self
    }

    pub fn with_edge(mut self, from: FederateId, to: FederateId, delay: Interval) -> Self {
        self.graph.add_edge(from, to, delay);
        self
    }

    pub fn with_clock_sync(mut self, enabled: bool) -> Self {
        self.clock_sync_enabled = enabled;
        self
    }
}

struct Shared {
    graph: FederationGraph,
    times: TinySecondaryMap<FederateId, FederateTimes>,
    states: TinySecondaryMap<FederateId, FederateState>,
    senders: TinySecondaryMap<FederateId, mpsc::UnboundedSender<RtiMessage>>,
    stop: StopCoordinator,
    /// Each federate's advertised peer-to-peer listening port, `-1` until it
    /// advertises one (spec §2, §4.1: `server_port`/`server_ip`).
    addresses: TinySecondaryMap<FederateId, i32>,
    /// Federates waiting on an `ADDRESS_QUERY` for a given (not-yet-known)
    /// target, answered once that target advertises (or disconnects).
    pending_queries: TinySecondaryMap<FederateId, Vec<FederateId>>,
}

pub struct RtiHandles {
    pub start_time: Timestamp,
    pub rti_handle: JoinHandle<Result<(), Error>>,
}

/// Bind a TCP listener for the federation on `port` (spec §4.1: the RTI's
/// well-known admission socket).
pub async fn create_listener(port: u16) -> Result<TcpListener, Error> {
    let addr = SocketAddr::new("127.0.0.1".parse().unwrap(), port);
    TcpListener::bind(addr)
        .await
        .map_err(|err| Error::Other(err.into()))
}

/// Run the RTI against an already-bound listener: admit exactly
/// `config.number_of_federates` federates, negotiate the start time, and
/// hand back a [`RtiHandles`] whose `rti_handle` resolves once every
/// federate session has exited.
#[tracing::instrument(skip(listener, config), fields(federation_id = %config.federation_id))]
pub async fn start_rti(listener: TcpListener, config: Config) -> Result<RtiHandles, Error> {
    let Config {
        federation_id,
        number_of_federates,
        graph,
        clock_sync_enabled,
    } = config;

    let mut admitted: TinySecondaryMap<FederateId, Framed<TcpStream, WireCodec>> =
        TinySecondaryMap::with_capacity(number_of_federates);
    let mut udp_targets: Vec<(FederateId, SocketAddr)> = Vec::new();

    while admitted.len() < number_of_federates {
        let (socket, addr) = listener
            .accept()
            .await
            .map_err(|err| Error::Other(err.into()))?;
        tracing::info!(?addr, "RTI accepted a connection");

        let mut frame = Framed::new(socket, WireCodec);
        let seen: Vec<FederateId> = admitted.keys().collect();
        let result = admit_one(
            &federation_id,
            number_of_federates,
            seen.into_iter(),
            clock_sync_enabled,
            addr.ip(),
            &mut frame,
        )
        .await;
        match result {
            Ok((federate_id, udp_addr)) => {
                tracing::info!(?federate_id, "federate admitted");
                if let Some(udp_addr) = udp_addr {
                    udp_targets.push((federate_id, udp_addr));
                }
                admitted.insert(federate_id, frame);
            }
            Err(Error::Rejected(reason)) => {
                tracing::warn!(?reason, "rejecting federate");
                let _ = frame.send(RtiMessage::Reject(reason)).await;
                let _ = frame.close().await;
            }
            Err(err) => {
                tracing::warn!(?err, "error negotiating admission, closing connection");
                let _ = frame.close().await;
            }
        }
    }
    tracing::debug!("all federates connected");

    let mut times = TinySecondaryMap::with_capacity(number_of_federates);
    let mut states = TinySecondaryMap::with_capacity(number_of_federates);
    let mut senders = TinySecondaryMap::with_capacity(number_of_federates);
    let mut rx_by_id = TinySecondaryMap::with_capacity(number_of_federates);
    let mut addresses = TinySecondaryMap::with_capacity(number_of_federates);
    let mut pending_queries = TinySecondaryMap::with_capacity(number_of_federates);
    for i in 0..number_of_federates {
        let id = FederateId::from(i);
        let (tx, rx) = mpsc::unbounded_channel();
        times.insert(id, FederateTimes::default());
        states.insert(id, FederateState::Pending);
        senders.insert(id, tx);
        rx_by_id.insert(id, rx);
        addresses.insert(id, -1);
        pending_queries.insert(id, Vec::new());
    }

    let shared = Arc::new(Mutex::new(Shared {
        graph,
        times,
        states,
        senders,
        stop: StopCoordinator::new(number_of_federates, Timestamp::NEVER),
        addresses,
        pending_queries,
    }));

    let (start_sync, synchronizer) = start_time::create(number_of_federates);
    let start_time_handle = tokio::spawn(synchronizer.negotiate_start_time());

    let frames: Vec<_> = admitted.into_iter().collect();
    let receivers: Vec<_> = rx_by_id.into_iter().map(|(_, rx)| rx).collect();

    let session_handles: Vec<_> = frames
        .into_iter()
        .zip(receivers)
        .map(|((id, frame), rx)| {
            let shared = Arc::clone(&shared);
            let start_sync = start_sync.clone();
            tokio::spawn(session::run(id, frame, rx, shared, start_sync))
        })
        .collect();

    if clock_sync_enabled && !udp_targets.is_empty() {
        let tcp_port = listener
            .local_addr()
            .map_err(|err| Error::Other(err.into()))?
            .port();
        // spec §9 CLI note: "the UDP server attempts TCP_port + 1".
        let udp_bind = SocketAddr::new("127.0.0.1".parse().unwrap(), tcp_port + 1);
        match tokio::net::UdpSocket::bind(udp_bind).await {
            Ok(socket) => {
                tokio::spawn(clock_sync::run_udp_rounds(socket, udp_targets));
            }
            Err(err) => {
                tracing::warn!(?err, "failed to bind the periodic UDP clock-sync socket");
            }
        }
    }

    tokio::spawn(erroneous_connections(listener));

    let start_time = start_time_handle
        .await
        .map_err(|err| Error::Other(err.into()))?;

    let rti_handle = tokio::spawn(async move {
        for handle in session_handles {
            handle.await.map_err(|err| Error::Other(err.into()))?;
        }
        Ok(())
    });

    Ok(RtiHandles {
        start_time,
        rti_handle,
    })
}

async fn admit_one<T>(
    federation_id: &str,
    number_of_federates: usize,
    seen: impl Iterator<Item = FederateId>,
    clock_sync_enabled: bool,
    peer_ip: std::net::IpAddr,
    frame: &mut Framed<T, WireCodec>,
) -> Result<(FederateId, Option<SocketAddr>), Error>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let federate_id =
        read_fed_id(federation_id, number_of_federates, seen, frame)
            .await
            .map_err(Error::Rejected)?;

    frame.send(RtiMessage::Ack).await?;

    let udp_port = read_udp_port(frame).await.map_err(Error::Rejected)?;
    let udp_addr = clock_sync_enabled
        .then(|| udp_port.map(|port| SocketAddr::new(peer_ip, port)))
        .flatten();

    if clock_sync_enabled {
        clock_sync::run_tcp_rounds(
            frame,
            rti_core::constants::CLOCK_SYNCHRONIZATION_T4_MESSAGES_PER_INTERVAL,
        )
        .await?;
    }

    Ok((federate_id, udp_addr))
}

async fn read_fed_id<T>(
    federation_id: &str,
    number_of_federates: usize,
    mut seen: impl Iterator<Item = FederateId>,
    frame: &mut Framed<T, WireCodec>,
) -> Result<FederateId, RejectReason>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let msg = match frame.next().await {
        Some(Ok(msg)) => msg,
        _ => return Err(RejectReason::UnexpectedMessage),
    };

    match msg {
        RtiMessage::FedId {
            federate_id,
            federation_id: claimed,
        } => {
            if claimed != federation_id {
                tracing::warn!(
                    claimed,
                    federation_id,
                    "federate attempted to join the wrong federation"
                );
                Err(RejectReason::FederationIdMismatch)
            } else if federate_id.as_u16() as usize >= number_of_federates {
                Err(RejectReason::FedIdOutOfRange)
            } else if seen.any(|s| s == federate_id) {
                Err(RejectReason::FedIdInUse)
            } else {
                Ok(federate_id)
            }
        }
        _ => Err(RejectReason::UnexpectedMessage),
    }
}

async fn read_udp_port<T>(frame: &mut Framed<T, WireCodec>) -> Result<Option<u16>, RejectReason>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match frame.next().await {
        Some(Ok(RtiMessage::UdpPort(port))) => Ok(port),
        _ => Err(RejectReason::UnexpectedMessage),
    }
}

async fn erroneous_connections(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                tracing::warn!(?addr, "unexpected connection after federation is full");
                let mut frame = Framed::new(socket, WireCodec);
                let _ = frame
                    .send(RtiMessage::Reject(RejectReason::FederationIdMismatch))
                    .await;
                let _ = frame.close().await;
            }
            Err(err) => {
                tracing::error!(?err, "failed to accept a stray connection");
            }
        }
    }
}

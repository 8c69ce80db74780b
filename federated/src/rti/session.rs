//! The per-federate RTI task: continues admission through the start-time
//! barrier (spec §4.2), then dispatches every message the federate sends for
//! the rest of its lifetime — tag-advance bookkeeping (C3), relay (C4), stop
//! consensus (C5) — until the federate resigns or its connection drops.

use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use rti_core::{constants, FederateId, Tag, Timestamp};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::codec::Framed;

use crate::{
    engine,
    rti::start_time::StartSync,
    wire::{RtiMessage, WireCodec},
    FederateState,
};

use super::Shared;

pub async fn run(
    id: FederateId,
    mut frame: Framed<TcpStream, WireCodec>,
    mut outbound: mpsc::UnboundedReceiver<RtiMessage>,
    shared: Arc<Mutex<Shared>>,
    mut start_sync: StartSync,
) {
    if let Err(err) = run_start_barrier(id, &mut frame, &mut start_sync).await {
        tracing::warn!(?id, ?err, "federate dropped before clearing the start-time barrier");
        shared.lock().unwrap().demote(id);
        return;
    }
    shared.lock().unwrap().states.insert(id, FederateState::Granted);

    loop {
        tokio::select! {
            biased;

            outgoing = outbound.recv() => {
                match outgoing {
                    Some(msg) => {
                        if let Err(err) = frame.send(msg).await {
                            tracing::warn!(?id, ?err, "failed to forward message to federate, demoting");
                            shared.lock().unwrap().demote(id);
                            return;
                        }
                    }
                    None => return,
                }
            }

            incoming = frame.next() => {
                match incoming {
                    Some(Ok(msg)) => {
                        if !handle_message(id, msg, &shared) {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(?id, ?err, "wire error from federate, demoting");
                        shared.lock().unwrap().demote(id);
                        return;
                    }
                    None => {
                        tracing::info!(?id, "federate closed its connection");
                        shared.lock().unwrap().demote(id);
                        return;
                    }
                }
            }
        }
    }
}

async fn run_start_barrier(
    id: FederateId,
    frame: &mut Framed<TcpStream, WireCodec>,
    start_sync: &mut StartSync,
) -> Result<(), crate::WireError> {
    let proposal = match frame.next().await {
        Some(Ok(RtiMessage::Timestamp(ts))) => ts,
        Some(Ok(_)) => return Err(crate::WireError::UnexpectedEof),
        Some(Err(err)) => return Err(err),
        None => return Err(crate::WireError::Closed),
    };

    let negotiated = start_sync
        .propose_start_time(proposal)
        .await
        .map_err(|_| crate::WireError::Closed)?;
    let start_time = Timestamp::from_nanos(
        negotiated.as_nanos() + constants::DELAY_START.as_nanos() as i64,
    );

    tracing::debug!(?id, ?start_time, "broadcasting negotiated start time");
    frame.send(RtiMessage::Timestamp(start_time)).await
}

/// Returns `false` if the session loop should exit (the federate resigned).
fn handle_message(id: FederateId, msg: RtiMessage, shared: &Arc<Mutex<Shared>>) -> bool {
    match msg {
        RtiMessage::NextEventTag(tag) => {
            shared.lock().unwrap().on_next_event_tag(id, tag);
            true
        }
        RtiMessage::LogicalTagComplete(tag) => {
            shared.lock().unwrap().on_logical_tag_complete(id, tag);
            true
        }
        RtiMessage::Message { port, federate, data } => {
            shared.lock().unwrap().relay(RtiMessage::Message { port, federate, data });
            true
        }
        RtiMessage::TimedMessage { port, federate, tag, data } => {
            shared
                .lock()
                .unwrap()
                .relay(RtiMessage::TimedMessage { port, federate, tag, data });
            true
        }
        RtiMessage::StopRequest(ts) => {
            shared.lock().unwrap().on_stop_request(id, ts);
            true
        }
        RtiMessage::StopRequestReply(ts) => {
            shared.lock().unwrap().on_stop_request_reply(id, ts);
            true
        }
        RtiMessage::AddressAd(port) => {
            shared.lock().unwrap().on_address_ad(id, port);
            true
        }
        RtiMessage::AddressQuery(target) => {
            shared.lock().unwrap().on_address_query(id, target);
            true
        }
        RtiMessage::Resign => {
            tracing::info!(?id, "federate resigned");
            shared.lock().unwrap().demote(id);
            false
        }
        other => {
            tracing::warn!(?id, ?other, "unexpected message from federate, ignoring");
            true
        }
    }
}

impl Shared {
    pub(super) fn demote(&mut self, id: FederateId) {
        self.states.insert(id, FederateState::NotConnected);
        if let Some(tag) = self.stop.record_disconnect(id) {
            self.broadcast_stop_granted(tag);
        }
        // id will never advertise an address now; answer anyone still
        // waiting on it with "none" rather than leaving them blocked.
        if let Some(waiting) = self.pending_queries.get_mut(id) {
            let waiting = std::mem::take(waiting);
            for querying in waiting {
                self.send_to(querying, RtiMessage::AddressAd(-1));
            }
        }
    }

    pub(super) fn relay(&mut self, msg: RtiMessage) {
        let dest = match &msg {
            RtiMessage::Message { federate, .. } => *federate,
            RtiMessage::TimedMessage { federate, .. } => *federate,
            _ => return,
        };
        if self.states.get(dest) != Some(&FederateState::NotConnected) {
            self.send_to(dest, msg);
        } else {
            tracing::debug!(?dest, "dropping relayed message, destination not connected");
        }
    }

    pub(super) fn on_next_event_tag(&mut self, id: FederateId, tag: Tag) {
        if let Some(t) = self.times.get_mut(id) {
            t.next_event = tag;
        }
        self.evaluate_and_grant(id);
    }

    pub(super) fn on_logical_tag_complete(&mut self, id: FederateId, tag: Tag) {
        if let Some(t) = self.times.get_mut(id) {
            t.completed = tag;
        }
        let downstream = self.graph.downstream_of(id).to_vec();
        for d in downstream {
            self.evaluate_and_grant(d);
        }
    }

    pub(super) fn on_stop_request(&mut self, id: FederateId, proposed: Timestamp) {
        if let Some(tag) = self.stop.record_request(id, proposed) {
            self.broadcast_stop_granted(tag);
            return;
        }
        let max = self.stop.max_stop_time();
        let targets: Vec<FederateId> = self
            .states
            .keys()
            .filter(|&f| f != id && !self.stop.is_requesting(f))
            .collect();
        for f in targets {
            self.send_to(f, RtiMessage::StopRequest(max));
        }
    }

    pub(super) fn on_stop_request_reply(&mut self, id: FederateId, proposed: Timestamp) {
        if let Some(tag) = self.stop.record_request(id, proposed) {
            self.broadcast_stop_granted(tag);
        }
    }

    /// `id` advertises its peer-to-peer listening port. Records it and
    /// answers anyone who had already queried for `id`'s address and was
    /// waiting on it (spec §2, §4.1: `server_port` defaults to `-1` until
    /// advertised).
    pub(super) fn on_address_ad(&mut self, id: FederateId, port: i32) {
        self.addresses.insert(id, port);
        if let Some(waiting) = self.pending_queries.get_mut(id) {
            let waiting = std::mem::take(waiting);
            for querying in waiting {
                self.send_to(querying, RtiMessage::AddressAd(port));
            }
        }
    }

    /// `querying` asks for `target`'s peer-to-peer address. Answered
    /// immediately if already known, or if `target` is disconnected (it will
    /// never advertise one); otherwise the reply is deferred until `target`
    /// sends `ADDRESS_AD` (spec §4.7: "blocks until the peer advertises").
    pub(super) fn on_address_query(&mut self, querying: FederateId, target: FederateId) {
        let known = self.addresses.get(target).copied().unwrap_or(-1);
        let target_gone = self.states.get(target) == Some(&FederateState::NotConnected);
        if known != -1 || target_gone {
            self.send_to(querying, RtiMessage::AddressAd(known));
        } else if let Some(waiting) = self.pending_queries.get_mut(target) {
            waiting.push(querying);
        }
    }

    fn broadcast_stop_granted(&mut self, tag: Timestamp) {
        let targets: Vec<FederateId> = self.states.keys().collect();
        for f in targets {
            self.send_to(f, RtiMessage::StopGranted(tag));
        }
    }

    fn evaluate_and_grant(&mut self, id: FederateId) {
        if self.states.get(id) != Some(&FederateState::Granted) {
            return;
        }
        if let Some(candidate) = engine::next_tag_advance(&self.graph, &self.times, &self.states, id) {
            let provisional = self.is_provisional(id, candidate);
            let msg = if provisional {
                RtiMessage::ProvisionalTimeAdvanceGrant(candidate)
            } else {
                RtiMessage::TimeAdvanceGrant(candidate)
            };
            self.send_to(id, msg);
        }
    }

    /// A grant is provisional, rather than final, when a zero-delay upstream
    /// could still emit an event at exactly the granted tag (spec §9 PTAG
    /// supplement: zero-delay cycles can't be given an ordinary TAG without
    /// risking a message that arrives "in the past").
    fn is_provisional(&self, id: FederateId, tag: Tag) -> bool {
        self.graph.upstream_of(id).iter().any(|&(u, delay)| {
            delay.is_zero()
                && self
                    .times
                    .get(u)
                    .map(|t| t.completed < tag)
                    .unwrap_or(false)
        })
    }

    /// Send to `id`'s outbound channel, demoting it on failure (spec §4.3:
    /// "failed TAG send demotes target to NotConnected + implicit stop
    /// request").
    fn send_to(&mut self, id: FederateId, msg: RtiMessage) -> bool {
        let sent = self
            .senders
            .get(id)
            .map(|tx| tx.send(msg).is_ok())
            .unwrap_or(false);
        if !sent {
            self.demote(id);
        }
        sent
    }
}

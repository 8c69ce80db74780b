//! C6, RTI side: the four-message PTP-like exchange (spec §4.6).
//!
//! `T1`/`T4`/`T4_CODED_PROBE` originate at the RTI; `T3` is the federate's
//! reply carrying its own clock reading. Fixed rounds run over TCP during
//! admission regardless of whether a federate's UDP address is in use yet
//! (an intentional quirk carried over unchanged: see `original_source`),
//! then further rounds run periodically over UDP once the federation is
//! running. Offset computation is entirely the federate's job; the RTI only
//! drives the exchange.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rti_core::{constants, FederateId, Timestamp};
use tokio::{io::AsyncRead, io::AsyncWrite, net::UdpSocket, time::timeout};
use tokio_util::codec::Framed;

use crate::wire::{RtiMessage, WireCodec, WireError};

/// Run `rounds` rounds of the T1/T3/T4/T4_CODED_PROBE exchange over an
/// already-framed TCP connection, as part of admission.
pub async fn run_tcp_rounds<T>(
    frame: &mut Framed<T, WireCodec>,
    rounds: usize,
) -> Result<(), WireError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    for round in 0..rounds {
        let t1 = Timestamp::now();
        frame.send(RtiMessage::ClockSyncT1(t1)).await?;

        let t3 = match timeout(constants::TCP_TIMEOUT_TIME, frame.next()).await {
            Ok(Some(Ok(RtiMessage::ClockSyncT3 { timestamp, .. }))) => timestamp,
            Ok(Some(Ok(other))) => {
                tracing::warn!(round, ?other, "expected ClockSyncT3 during clock sync round");
                continue;
            }
            Ok(Some(Err(err))) => return Err(err),
            Ok(None) => return Err(WireError::Closed),
            Err(_) => return Err(WireError::Timeout),
        };
        tracing::trace!(round, ?t1, ?t3, "clock sync TCP round");

        let t4 = Timestamp::now();
        frame.send(RtiMessage::ClockSyncT4(t4)).await?;
        let t4_probe = Timestamp::now();
        frame
            .send(RtiMessage::ClockSyncT4CodedProbe(t4_probe))
            .await?;
    }
    Ok(())
}

/// The RTI's single periodic UDP clock sync task (spec §9 scheduling model:
/// "one UDP listener task"), run for the lifetime of the federation once
/// admission completes. Each period it runs one round with every federate
/// that declared a UDP address, in turn, over the one shared socket. Gives up
/// a federate's round after [`constants::CLOCK_SYNC_MAX_DISCARDED_MESSAGES`]
/// out-of-order T3 replies rather than stalling on one federate's clock.
pub async fn run_udp_rounds(socket: UdpSocket, targets: Vec<(FederateId, SocketAddr)>) {
    let mut interval = tokio::time::interval(Duration::from_nanos(
        constants::CLOCK_SYNCHRONIZATION_T1_PERIOD_NS,
    ));
    loop {
        interval.tick().await;
        for &(federate_id, peer) in &targets {
            match timeout(
                constants::UDP_TIMEOUT_TIME,
                run_one_udp_round(&socket, federate_id, peer),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(?federate_id, ?err, "UDP clock sync round failed, will retry");
                }
                Err(_) => {
                    tracing::warn!(?federate_id, "UDP clock sync round timed out, will retry");
                }
            }
        }
    }
}

async fn run_one_udp_round(
    socket: &UdpSocket,
    federate_id: FederateId,
    peer: SocketAddr,
) -> std::io::Result<()> {
    let mut codec = WireCodec;
    let mut buf = bytes::BytesMut::with_capacity(64);

    let t1 = Timestamp::now();
    encode_to(&mut codec, &mut buf, RtiMessage::ClockSyncT1(t1));
    socket.send_to(&buf, peer).await?;

    let mut discarded = 0usize;
    loop {
        let mut recv_buf = [0u8; 64];
        let (n, from) = socket.recv_from(&mut recv_buf).await?;
        if from != peer {
            continue;
        }
        let mut frame_buf = bytes::BytesMut::from(&recv_buf[..n]);
        match tokio_util::codec::Decoder::decode(&mut codec, &mut frame_buf) {
            Ok(Some(RtiMessage::ClockSyncT3 { federate_id: fid, .. })) if fid == federate_id => {
                break;
            }
            _ => {
                discarded += 1;
                if discarded >= constants::CLOCK_SYNC_MAX_DISCARDED_MESSAGES {
                    tracing::warn!(?federate_id, "too many discarded clock sync replies, giving up this round");
                    return Ok(());
                }
            }
        }
    }

    buf.clear();
    let t4 = Timestamp::now();
    encode_to(&mut codec, &mut buf, RtiMessage::ClockSyncT4(t4));
    socket.send_to(&buf, peer).await?;

    buf.clear();
    let t4_probe = Timestamp::now();
    encode_to(&mut codec, &mut buf, RtiMessage::ClockSyncT4CodedProbe(t4_probe));
    socket.send_to(&buf, peer).await?;

    Ok(())
}

fn encode_to(codec: &mut WireCodec, buf: &mut bytes::BytesMut, msg: RtiMessage) {
    tokio_util::codec::Encoder::encode(codec, msg, buf).expect("encoding never fails");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rti_core::FederateId;

    #[tokio::test]
    async fn tcp_rounds_complete_against_a_cooperating_peer() {
        let (rti_side, fed_side) = tokio::io::duplex(4096);
        let mut rti_frame = Framed::new(rti_side, WireCodec);
        let mut fed_frame = Framed::new(fed_side, WireCodec);

        let fed_task = tokio::spawn(async move {
            for _ in 0..2 {
                match fed_frame.next().await {
                    Some(Ok(RtiMessage::ClockSyncT1(_))) => {}
                    other => panic!("expected T1, got {other:?}"),
                }
                fed_frame
                    .send(RtiMessage::ClockSyncT3 {
                        federate_id: FederateId::from(0),
                        timestamp: Timestamp::now(),
                    })
                    .await
                    .unwrap();
                assert!(matches!(
                    fed_frame.next().await,
                    Some(Ok(RtiMessage::ClockSyncT4(_)))
                ));
                assert!(matches!(
                    fed_frame.next().await,
                    Some(Ok(RtiMessage::ClockSyncT4CodedProbe(_)))
                ));
            }
        });

        run_tcp_rounds(&mut rti_frame, 2).await.unwrap();
        fed_task.await.unwrap();
    }
}

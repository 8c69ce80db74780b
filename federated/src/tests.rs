//! End-to-end tests driving a real RTI and real federate clients over
//! loopback TCP sockets.

use std::sync::Arc;
use std::time::Duration;

use rti_core::{FederateId, Interval, PortId, Tag, Timestamp};
use tokio::time::timeout;

use crate::{client, rti, LocalScheduler};

struct NoopScheduler;

impl LocalScheduler for NoopScheduler {
    fn tag_advance_granted(&self, _tag: Tag, _provisional: bool) {}
    fn message_received(&self, _port: PortId, _tag: Tag, _data: Vec<u8>) {}
}

async fn spawn_rti(port: u16, federates: usize, edges: &[(FederateId, FederateId, Interval)]) {
    let listener = rti::create_listener(port).await.unwrap();
    let mut config = rti::Config::new("test-federation").with_federates(federates);
    for &(from, to, delay) in edges {
        config = config.with_edge(from, to, delay);
    }
    tokio::spawn(async move {
        rti::start_rti(listener, config).await.unwrap();
    });
    // Give the listener a moment to actually be accepting connections.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn connect(port: u16, id: FederateId, config: client::Config) -> client::Client {
    let addr = format!("127.0.0.1:{port}").parse().unwrap();
    let (client, _handles) = timeout(
        Duration::from_secs(5),
        client::connect_to_rti(addr, config, Arc::new(NoopScheduler)),
    )
    .await
    .expect("connect did not time out")
    .unwrap();
    assert_eq!(client.federate_id(), id);
    client
}

#[tokio::test]
async fn two_isolated_federates_advance_without_a_rti_roundtrip() {
    let port = 17000;
    spawn_rti(port, 2, &[]).await;

    let fed0 = FederateId::from(0);
    let fed1 = FederateId::from(1);

    let c0 = connect(port, fed0, client::Config::new(fed0, "test-federation")).await;
    let c1 = connect(port, fed1, client::Config::new(fed1, "test-federation")).await;

    let tag = Tag::new(Timestamp::from_nanos(1_000), 0);
    assert_eq!(
        timeout(Duration::from_secs(1), c0.advance_request(tag))
            .await
            .unwrap()
            .unwrap(),
        tag
    );
    assert_eq!(
        timeout(Duration::from_secs(1), c1.advance_request(tag))
            .await
            .unwrap()
            .unwrap(),
        tag
    );
}

#[tokio::test]
async fn linear_chain_grants_downstream_capped_by_upstream_delay() {
    let port = 17001;
    let fed_a = FederateId::from(0);
    let fed_b = FederateId::from(1);
    spawn_rti(port, 2, &[(fed_a, fed_b, Interval::ZERO)]).await;

    let a = connect(
        port,
        fed_a,
        client::Config::new(fed_a, "test-federation").with_downstream(fed_b),
    )
    .await;
    let b = connect(
        port,
        fed_b,
        client::Config::new(fed_b, "test-federation").with_upstream(fed_a, Interval::ZERO),
    )
    .await;

    let net_a = Tag::new(Timestamp::from_nanos(5), 0);
    let net_b = Tag::new(Timestamp::from_nanos(3), 0);

    // B asks to advance to (3,0); the RTI can grant it immediately since A
    // has no upstream of its own and has not yet completed anything earlier.
    let granted_b = timeout(Duration::from_secs(1), b.advance_request(net_b))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(granted_b, net_b);

    // A advances to (5,0) and reports completion.
    let granted_a = timeout(Duration::from_secs(1), a.advance_request(net_a))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(granted_a, net_a);
    a.send_logical_tag_complete(net_a).unwrap();

    // B asks again, now for a tag beyond A's completed (5,0); it should be
    // granted exactly (5,0), capped by A's completion.
    let next_net_b = Tag::new(Timestamp::from_nanos(10), 0);
    let granted_b2 = timeout(Duration::from_secs(1), b.advance_request(next_net_b))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(granted_b2, net_a);
}

#[tokio::test]
async fn wrong_federation_id_is_rejected() {
    let port = 17002;
    spawn_rti(port, 1, &[]).await;

    let addr = format!("127.0.0.1:{port}").parse().unwrap();
    let fed0 = FederateId::from(0);
    let err = timeout(
        Duration::from_secs(5),
        client::connect_to_rti(
            addr,
            client::Config::new(fed0, "wrong-federation"),
            Arc::new(NoopScheduler),
        ),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(
        err,
        client::ClientError::Rejected(crate::RejectReason::FederationIdMismatch)
    ));
}

#[tokio::test]
async fn three_federates_reach_stop_consensus() {
    let port = 17003;
    spawn_rti(port, 3, &[]).await;

    let ids: Vec<FederateId> = (0..3).map(FederateId::from).collect();
    let mut clients = Vec::new();
    for &id in &ids {
        clients.push(connect(port, id, client::Config::new(id, "test-federation")).await);
    }

    let stop_at = Timestamp::from_nanos(1_000_000);
    for c in &clients {
        c.request_stop(stop_at).unwrap();
    }

    // Each federate's handler task will observe `StopGranted` and exit
    // cleanly once the RTI broadcasts it; there is no client-facing signal
    // besides the scheduler callback in this minimal harness, so we just
    // confirm none of the requests errored.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

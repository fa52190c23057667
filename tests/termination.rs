mod common;

use std::time::Duration;

use common::{init_tracing, start_network, WAIT};
use lamport_relay::{
    net::PeerId,
    peer::{Instruction, PeerState},
    router::RouterState,
};
use tokio::{net::TcpListener, time::timeout};

#[tokio::test]
async fn idle_workers_are_closed_once_both_report_done() {
    init_tracing();
    let net = start_network(vec![(PeerId(1), vec![]), (PeerId(2), vec![])]).await;

    assert!(timeout(WAIT, net.router.wait_for_state(RouterState::Terminated))
        .await
        .unwrap());
    for worker in &net.workers {
        assert!(timeout(WAIT, worker.wait_for_state(PeerState::Terminated))
            .await
            .unwrap());
        assert_eq!(worker.state(), PeerState::Terminated);
    }

    let router = net.router.join().await.unwrap();
    assert_eq!(router.done, 2);
    assert_eq!(router.closed, 2);
    assert_eq!(router.forwarded, 0);

    for worker in net.workers {
        let report = worker.join().await.unwrap();
        assert_eq!(report.received.len(), 1);
        assert!(report.received[0].is_close());
    }

    // every listener has been released
    for addr in net.addrs {
        TcpListener::bind(addr).await.unwrap();
    }
}

#[tokio::test]
async fn close_waits_for_the_slowest_worker() {
    init_tracing();
    let net = start_network(vec![
        (PeerId(1), vec![]),
        (
            PeerId(2),
            vec![Instruction::new(150, PeerId(2), PeerId(1), "late")],
        ),
    ])
    .await;

    let one = &net.workers[0];
    // worker 1 is done at once but must stay up for the late message
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(one.state(), PeerState::Running);
    assert_eq!(net.router.done_count().await, 1);

    let router = timeout(WAIT, net.router.join()).await.unwrap().unwrap();
    assert_eq!(router.done, 2);
    let mut workers = net.workers.into_iter();
    let one = timeout(WAIT, workers.next().unwrap().join())
        .await
        .unwrap()
        .unwrap();
    let payloads: Vec<&str> =
        one.received.iter().map(|m| m.payload.as_str()).collect();
    assert_eq!(payloads, vec!["late", "close"]);
}

#[tokio::test]
async fn shutdown_handles_stop_a_stuck_network() {
    init_tracing();
    // with nobody registered the router has nothing to wait for and stops
    // straight away, without a close broadcast
    let net = start_network(vec![]).await;
    let router = timeout(WAIT, net.router.join()).await.unwrap().unwrap();
    assert_eq!(router.closed, 0);

    let net = start_network(vec![(PeerId(1), vec![])]).await;
    net.router.shutdown();
    let router = timeout(WAIT, net.router.join()).await.unwrap().unwrap();
    assert_eq!(router.closed, 0);

    let worker = &net.workers[0];
    assert_ne!(worker.state(), PeerState::Terminated);
    worker.shutdown();
    let mut workers = net.workers;
    let report = timeout(WAIT, workers.remove(0).join())
        .await
        .unwrap()
        .unwrap();
    assert!(report.received.is_empty());
}

#[tokio::test]
async fn a_close_payload_from_a_worker_is_just_data() {
    init_tracing();
    let net = start_network(vec![
        (
            PeerId(1),
            vec![
                Instruction::new(0, PeerId(1), PeerId(2), "close"),
                Instruction::new(500, PeerId(1), PeerId(2), "after"),
            ],
        ),
        (PeerId(2), vec![]),
    ])
    .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(net.router.done_count().await, 1);
    assert_eq!(net.workers[1].state(), PeerState::Running);

    let router = timeout(WAIT, net.router.join()).await.unwrap().unwrap();
    assert_eq!(router.done, 2);
    assert_eq!(router.forwarded, 2);
    assert_eq!(router.failed_forwards, 0);
    assert_eq!(router.closed, 2);

    let mut workers = net.workers.into_iter();
    let one = timeout(WAIT, workers.next().unwrap().join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(one.received.len(), 1);
    assert_eq!(one.received[0].source, PeerId::ROUTER);
    let two = timeout(WAIT, workers.next().unwrap().join())
        .await
        .unwrap()
        .unwrap();
    let seen: Vec<(PeerId, &str)> = two
        .received
        .iter()
        .map(|m| (m.source, m.payload.as_str()))
        .collect();
    assert_eq!(
        seen,
        vec![
            (PeerId(1), "close"),
            (PeerId(1), "after"),
            (PeerId::ROUTER, "close"),
        ]
    );
    // 0 -> 1 for the first, 1 -> 2 for "after" (stamped 0.0), then the
    // router's close
    assert!(two.clock >= 3.0);
}

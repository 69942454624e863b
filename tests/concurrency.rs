#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Concurrency properties: admission under contention, exactly-once
//! completion races, and codec behavior under parallel load.

use bytes::BytesMut;
use remoting_protocol::core::admission::{AdmissionGate, ReleaseOnce};
use remoting_protocol::core::codec::CommandCodec;
use remoting_protocol::core::response_future::ResponseFuture;
use remoting_protocol::error::RemotingError;
use remoting_protocol::protocol::command::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate_rejects_excess_concurrent_acquires() {
    let permits = 8usize;
    let gate = AdmissionGate::new(permits);

    let mut held = Vec::new();
    for _ in 0..permits {
        held.push(gate.try_acquire(Duration::from_millis(100)).await.unwrap());
    }

    // Permit N+1 must fail after its own small deadline, not block.
    let started = std::time::Instant::now();
    let denied = gate.try_acquire(Duration::from_millis(50)).await;
    assert!(matches!(denied, Err(RemotingError::TooManyRequests(_))));
    assert!(started.elapsed() < Duration::from_millis(500));

    drop(held);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate_serves_waiters_as_permits_free_up() {
    let gate = Arc::new(AdmissionGate::new(2));
    let admitted = Arc::new(AtomicUsize::new(0));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..32 {
        let gate = gate.clone();
        let admitted = admitted.clone();
        tasks.spawn(async move {
            let permit = gate.try_acquire(Duration::from_secs(5)).await.unwrap();
            admitted.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(permit);
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 32);
    assert_eq!(gate.available(), 2);
}

/// The race the once-guards exist for: response delivery and the timeout
/// sweep both try to complete the same future, run its callback, and release
/// its permit. Exactly one callback and exactly one release must win.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn completion_race_fires_callback_and_release_exactly_once() {
    for round in 0..200 {
        let gate = AdmissionGate::new(1);
        let permit = gate.try_acquire(Duration::from_millis(100)).await.unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let future = Arc::new(ResponseFuture::new(
            round,
            Duration::from_millis(1),
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ReleaseOnce::new(permit),
        ));

        // Response-delivery path.
        let delivery = {
            let future = future.clone();
            tokio::spawn(async move {
                future.complete(Some(Command::success(round)));
                future.execute_callback();
                future.release_permit();
            })
        };

        // Reaper path.
        let reaper = {
            let future = future.clone();
            tokio::spawn(async move {
                future.complete(None);
                future.release_permit();
                future.execute_callback();
            })
        };

        delivery.await.unwrap();
        reaper.await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1, "round {round}");
        assert_eq!(gate.available(), 1, "round {round}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_heavy() {
    use tokio::task::JoinSet;

    let iterations = 5_000usize;
    let body_sizes = [0usize, 64, 512, 4096];

    let mut tasks = JoinSet::new();
    for &size in &body_sizes {
        tasks.spawn(async move {
            let mut buf = BytesMut::new();
            for i in 0..iterations {
                let body = vec![((i + size) & 0xFF) as u8; size];
                let command = Command::request(i as i32, Some(body));
                CommandCodec.encode(command.clone(), &mut buf).unwrap();
                let decoded = CommandCodec.decode(&mut buf).unwrap();
                assert_eq!(decoded, Some(command));
                buf.clear();
            }
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }
}

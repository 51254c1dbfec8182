// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end scenarios driven through the public API.

use std::time::{Duration, Instant};

use strand::Executor;
use strand::io::{ReadExt, WriteExt};
use strand::net::{TcpListener, TcpStream};
use strand::sync::{mpsc, oneshot};
use strand::task::TaskGroup;
use strand::time::sleep;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn timer_waits_the_requested_duration() {
    init_tracing();
    let exec = Executor::new().unwrap();

    let begin = Instant::now();
    exec.block_on(sleep(Duration::from_millis(100)));
    assert!(begin.elapsed() >= Duration::from_millis(100));

    let begin = Instant::now();
    exec.block_on(sleep(Duration::from_millis(10)));
    assert!(begin.elapsed() < Duration::from_millis(200));
}

#[test]
fn tcp_echo_between_tasks() {
    init_tracing();
    let exec = Executor::new().unwrap();

    exec.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = strand::spawn(async move {
            let (mut stream, _peer) = listener.accept().await.unwrap();
            let mut buf = [0u8; 13];
            assert_eq!(stream.read_all(&mut buf).await.unwrap(), 13);
            assert_eq!(&buf, b"Hello, world!");
            assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"Hello, world!").await.unwrap();
        client.shutdown_write().unwrap();
        server.await;
    });
}

#[test]
fn racing_accept_against_a_timer_keeps_the_listener() {
    init_tracing();
    let exec = Executor::new().unwrap();

    exec.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let (accepted, elapsed) =
            strand::when_any((listener.accept(), sleep(Duration::from_millis(20)))).await;
        assert!(accepted.is_none());
        assert_eq!(elapsed, Some(()));

        let (server, client) =
            strand::when_all((listener.accept(), TcpStream::connect(addr))).await;
        server.unwrap();
        client.unwrap();
    });
}

#[test]
fn oneshot_buffers_and_reports_breakage() {
    init_tracing();
    let exec = Executor::new().unwrap();

    let (tx, rx) = oneshot::channel();
    tx.send(42).unwrap();
    assert_eq!(exec.block_on(rx), Ok(42));

    let (tx, rx) = oneshot::channel();
    drop(rx);
    assert_eq!(tx.send(42), Err(42));
}

#[test]
fn group_shutdown_reclaims_sleeping_tasks() {
    init_tracing();
    let exec = Executor::new().unwrap();

    exec.block_on(async {
        let group = TaskGroup::new();
        for _ in 0..100 {
            group.spawn(async {
                sleep(Duration::from_secs(3600)).await;
            });
        }

        let begin = Instant::now();
        group.shutdown().await;
        assert!(group.is_empty());
        assert!(begin.elapsed() < Duration::from_millis(100));
    });
}

#[test]
fn when_all_returns_every_input() {
    init_tracing();
    let exec = Executor::new().unwrap();

    async fn return_input(value: u32) -> u32 {
        strand::yield_now().await;
        value
    }

    let out = exec.block_on(strand::when_all((
        return_input(1),
        return_input(2),
        return_input(3),
    )));
    assert_eq!(out, (1, 2, 3));
}

#[test]
fn channel_backpressure_and_closure() {
    init_tracing();
    let exec = Executor::new().unwrap();

    exec.block_on(async {
        let (tx, mut rx) = mpsc::channel(2);

        let producer = strand::spawn(async move {
            for i in 0..20u32 {
                if tx.send(i).await.is_err() {
                    return i;
                }
            }
            20
        });

        for expected in 0..5 {
            assert_eq!(rx.recv().await, Some(expected));
        }
        rx.close();

        // the producer observed the closure and got its value back
        let stopped_at = producer.await.unwrap();
        assert!(stopped_at < 20);
    });
}

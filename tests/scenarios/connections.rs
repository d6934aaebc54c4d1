/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::time::Duration;

use statscope::Server;
use tokio::sync::mpsc;

use super::{CountingSource, constant_plot, counting_server};

fn server() -> Server {
    counting_server(&CountingSource::new(1))
        .send_interval(Duration::from_millis(50))
        .user_plot(constant_plot("load", 1.0))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn unregistering_one_connection_leaves_the_others_streaming() {
    let server = server();
    let (first_tx, mut first_rx) = mpsc::channel(64);
    let (second_tx, mut second_rx) = mpsc::channel(64);
    let first = server.register_connection(first_tx, None);
    let second = server.register_connection(second_tx, None);
    assert_ne!(first.id(), second.id());
    assert_eq!(server.connection_count(), 2);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(server.unregister(first.id()));
    first.closed().await;
    assert!(!server.unregister(first.id()));
    assert_eq!(server.connection_count(), 1);
    assert!(server.connection_frequency(first.id()).is_none());

    // Config plus one data message, then the sender is dropped.
    let mut received = 0;
    while first_rx.recv().await.is_some() {
        received += 1;
    }
    assert_eq!(received, 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut streamed = 0;
    while second_rx.try_recv().is_ok() {
        streamed += 1;
    }
    assert_eq!(streamed, 3);
    assert!(!second.is_closed());

    server.shutdown().await;
    assert!(second.is_closed());
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_receiver_closes_the_connection() {
    let server = server();
    let (tx, rx) = mpsc::channel(64);
    let handle = server.register_connection(tx, None);
    drop(rx);

    handle.closed().await;
    tokio::task::yield_now().await;
    assert_eq!(server.connection_count(), 0);
    assert!(!server.unregister(handle.id()));
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_connection() {
    let server = server();
    let mut receivers = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let (tx, rx) = mpsc::channel(64);
        let frequency = Some(Duration::from_millis(20));
        handles.push(server.register_connection(tx, frequency));
        receivers.push(rx);
    }
    tokio::time::sleep(Duration::from_millis(45)).await;

    server.shutdown().await;
    assert!(handles.iter().all(|handle| handle.is_closed()));
    assert_eq!(server.connection_count(), 0);
    for mut rx in receivers {
        let mut frames = 0;
        while rx.recv().await.is_some() {
            frames += 1;
        }
        assert_eq!(frames, 3);
    }
}

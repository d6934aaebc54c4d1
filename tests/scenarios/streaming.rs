/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use serde_json::Value;
use statscope::services::sources::{
    AllocStats, AllocatorSource, Probe, ProcessSource, RuntimeSource,
};
use statscope::{CompositeSource, SchedLatencyProbe, Server};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MAX_BUCKETS: usize = 40;

static STATS: AllocStats = AllocStats::new();
static SMALL_HEAP: AllocStats = AllocStats::new();

fn parse(frame: String) -> Value {
    serde_json::from_str(&frame).expect("frames are JSON")
}

fn layout_name(layout: &Value) -> &str {
    layout["name"].as_str().expect("layouts are named")
}

fn check_data_message(config: &Value, message: &Value) {
    assert_eq!(message["event"], "data");
    let data = &message["data"];
    assert!(data["timestamp"].as_u64().unwrap() > 0);

    let layouts = config["series"].as_array().unwrap();
    let series = data["series"].as_object().unwrap();
    let mut ids: Vec<&str> = series.keys().map(String::as_str).collect();
    let mut names: Vec<&str> = layouts.iter().map(layout_name).collect();
    ids.sort_unstable();
    names.sort_unstable();
    assert_eq!(ids, names);

    for layout in layouts {
        let values = series[layout["name"].as_str().unwrap()].as_array().unwrap();
        if layout["type"] == "heatmap" {
            assert!(!values.is_empty());
            assert!(values.len() <= MAX_BUCKETS, "{} rows", values.len());
        } else {
            assert_eq!(values.len(), layout["subplots"].as_array().unwrap().len());
        }
    }
}

#[tokio::test(start_paused = true)]
async fn connection_streams_config_then_one_data_message_per_period() {
    STATS.record_alloc(24);
    STATS.record_alloc(4096);
    STATS.record_free(24);

    let probe = Probe::new();
    let sched = SchedLatencyProbe::install(&probe, Duration::from_millis(10)).unwrap();
    let source = CompositeSource::new()
        .with(Arc::new(ProcessSource::new().unwrap()))
        .with(Arc::new(RuntimeSource::current()))
        .with(Arc::new(AllocatorSource::with_stats(&STATS)))
        .with(Arc::new(probe.clone()));
    let server = Server::builder(Arc::new(source))
        .max_buckets(MAX_BUCKETS)
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let sched_task = sched.spawn(cancel.clone());

    let frequency = Duration::from_millis(250);
    let (tx, mut rx) = mpsc::channel(16);
    let handle = server.register_connection(tx, Some(frequency));
    assert_eq!(server.connection_frequency(handle.id()), Some(frequency));

    let config = parse(rx.recv().await.unwrap());
    assert_eq!(config["events"], serde_json::json!(["lastmark"]));
    let names: Vec<&str> = config["series"]
        .as_array()
        .unwrap()
        .iter()
        .map(layout_name)
        .collect();
    for id in [
        "memory",
        "cpu",
        "runtime-tasks",
        "heap-live",
        "sched-latencies",
    ] {
        assert!(names.contains(&id), "{id} missing from {names:?}");
    }

    tokio::time::sleep(frequency * 2 + Duration::from_millis(1)).await;
    for _ in 0..2 {
        let message = parse(rx.try_recv().unwrap());
        check_data_message(&config, &message);
        assert_eq!(message["data"]["events"]["lastmark"], serde_json::json!([]));
    }
    assert!(rx.try_recv().is_err());

    probe.mark();
    tokio::time::sleep(frequency).await;
    let message = parse(rx.try_recv().unwrap());
    check_data_message(&config, &message);
    let marks = message["data"]["events"]["lastmark"].as_array().unwrap();
    assert_eq!(marks.len(), 1);

    assert!(server.unregister(handle.id()));
    handle.closed().await;
    server.shutdown().await;
    cancel.cancel();
    sched_task.await.unwrap();
}

#[test]
fn connections_keep_their_own_rate_state() {
    let source = super::CountingSource::new(10);
    let server = super::counting_server(&source)
        .without_builtins()
        .descriptor(super::delta_descriptor("events"))
        .build()
        .unwrap();

    let mut first = server.registry().new_states();
    let mut second = server.registry().new_states();

    let delta = |snapshot: statscope::Snapshot| match snapshot.get("events") {
        Some(statscope::Payload::Uint64(values)) => values[0],
        other => panic!("unexpected payload {other:?}"),
    };

    assert_eq!(delta(server.tick(&mut first)), 0);
    assert_eq!(delta(server.tick(&mut first)), 10);
    assert_eq!(delta(server.tick(&mut second)), 0);
    // The other connection's read moved the shared counter too.
    assert_eq!(delta(server.tick(&mut first)), 20);
    assert_eq!(delta(server.tick(&mut second)), 20);
}

#[tokio::test(start_paused = true)]
async fn missing_frequency_uses_the_server_interval() {
    let source = super::CountingSource::new(1);
    let server = super::counting_server(&source)
        .send_interval(Duration::from_millis(100))
        .user_plot(super::constant_plot("load", 1.5))
        .build()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let handle = server.register_connection(tx, None);
    let (zero_tx, _zero_rx) = mpsc::channel(8);
    let zero = server.register_connection(zero_tx, Some(Duration::ZERO));
    let interval = Some(Duration::from_millis(100));
    assert_eq!(server.connection_frequency(handle.id()), interval);
    assert_eq!(server.connection_frequency(zero.id()), interval);

    rx.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(101)).await;
    let message = parse(rx.try_recv().unwrap());
    assert_eq!(message["data"]["series"]["load"], serde_json::json!([1.5]));

    server.shutdown().await;
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(10)]
fn heatmaps_stay_within_small_bucket_limits(#[case] max_buckets: usize) {
    SMALL_HEAP.record_alloc(48);
    SMALL_HEAP.record_alloc(1 << 20);

    let probe = Probe::new();
    let sched = SchedLatencyProbe::install(&probe, Duration::from_millis(10)).unwrap();
    sched.recorder().record(3e-6);
    sched.recorder().record(0.25);
    let source = CompositeSource::new()
        .with(Arc::new(AllocatorSource::with_stats(&SMALL_HEAP)))
        .with(Arc::new(probe));
    let server = Server::builder(Arc::new(source))
        .max_buckets(max_buckets)
        .build()
        .unwrap();

    let mut states = server.registry().new_states();
    let snapshot = server.tick(&mut states);
    let config = serde_json::to_value(server.config()).unwrap();

    for id in ["size-classes", "sched-latencies"] {
        let rows = snapshot.get(id).unwrap().len();
        assert!(
            (1..=max_buckets).contains(&rows),
            "{id} has {rows} rows for at most {max_buckets}"
        );

        let layout = config["series"]
            .as_array()
            .unwrap()
            .iter()
            .find(|layout| layout["name"] == id)
            .unwrap();
        let labels = layout["custom_data"].as_array().unwrap();
        assert_eq!(labels.len(), rows);
        // Infinite bounds would serialize as null.
        assert!(labels.iter().all(Value::is_f64), "{id} labels {labels:?}");
        let ticks = layout["layout"]["yaxis"]["ticktext"].as_array().unwrap();
        assert!(ticks.iter().all(Value::is_f64), "{id} ticks {ticks:?}");
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use rstest::rstest;
use statscope::{
    Config, Payload, PlotDescriptor, RegistryError, ServerConfigError, TimeSeries,
    TimeSeriesBuilder, UserPlotError,
};

use super::{COUNTER, CountingSource, constant_plot, counting_server, delta_descriptor};

#[test]
fn concurrent_first_config_requests_build_once() {
    let source = CountingSource::new(1);
    let server = counting_server(&source)
        .user_plot(constant_plot("load", 2.0))
        .build()
        .unwrap();

    let configs: Vec<usize> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| server.config() as *const Config as usize))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(configs.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(source.reads(), 1);
    assert_eq!(server.reads(), 1);
}

#[test]
fn plots_with_missing_metrics_are_disabled() {
    let source = CountingSource::new(1);
    let missing = PlotDescriptor::new(
        "gc-pauses",
        &[COUNTER, "/gc/pauses:seconds"],
        super::scatter_layout(&["pauses"]),
        |_, _| Payload::Uint64(vec![0]),
    );
    let server = counting_server(&source)
        .descriptor(delta_descriptor("events"))
        .descriptor(missing)
        .user_plot(constant_plot("load", 2.0))
        .build()
        .unwrap();

    // Every built-in needs metrics this source does not expose.
    let names: Vec<&str> = server.config().series.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["events", "load"]);
    assert!(server.config().events.is_empty());

    let mut states = server.registry().new_states();
    let snapshot = server.tick(&mut states);
    let ids: Vec<&str> = snapshot.series.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, names);
    assert!(snapshot.get("gc-pauses").is_none());
    assert!(snapshot.events.is_empty());
}

#[test]
fn user_plot_payload_follows_series_order() {
    let source = CountingSource::new(1);
    let plot = TimeSeriesBuilder::new("queues")
        .add_series(TimeSeries::new("inbound"), || 3.0)
        .add_series(TimeSeries::new("outbound"), || 1.0)
        .build()
        .unwrap();
    let server = counting_server(&source)
        .without_builtins()
        .user_plot(plot)
        .build()
        .unwrap();

    let mut states = server.registry().new_states();
    assert_eq!(
        server.tick(&mut states).get("queues"),
        Some(&Payload::Float64(vec![3.0, 1.0]))
    );
}

#[rstest]
#[case("")]
#[case("timestamp")]
#[case("lastmark")]
#[case("cpu")]
#[case("sched-latencies")]
fn reserved_or_empty_user_plot_names_are_rejected(#[case] name: &str) {
    let result = TimeSeriesBuilder::new(name)
        .add_series(TimeSeries::new("value"), || 0.0)
        .build();
    let expected = if name.is_empty() {
        UserPlotError::EmptyName
    } else {
        UserPlotError::ReservedName(name.to_string())
    };
    assert_eq!(result.unwrap_err(), expected);
}

#[test]
fn user_plot_without_series_is_rejected() {
    assert_eq!(
        TimeSeriesBuilder::new("empty").build().unwrap_err(),
        UserPlotError::NoSeries
    );
}

#[test]
fn descriptor_clashing_with_a_builtin_is_rejected() {
    let source = CountingSource::new(1);
    let err = counting_server(&source)
        .descriptor(delta_descriptor("cpu"))
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        ServerConfigError::Registry(RegistryError::DuplicatePlotId("cpu".to_string()))
    );
}

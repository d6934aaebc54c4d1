/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-connection snapshot broadcaster.
//!
//! Lifecycle: `Registered → Streaming → Closed`. The config message is sent
//! once on entering `Streaming`; afterwards one data message is sent per
//! tick of a private timer. The first tick fires one period after
//! registration. Ticks missed while a write was blocked are skipped, never
//! sent late.
//!
//! Each connection owns its [`DescriptorState`]s, so rates and deltas are
//! computed against that connection's own previous tick.

use std::convert::Infallible;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connections::ConnectionId;
use super::server::Server;
use super::sink::{SinkError, SnapshotSink};
use crate::registries::plot::{Config, DescriptorState, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BroadcastState {
    Registered,
    Streaming,
    Closed,
}

#[derive(Debug)]
enum CloseReason {
    Cancelled,
    Write(SinkError),
    Encode(serde_json::Error),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Write(err) => write!(f, "write failed: {err}"),
            Self::Encode(err) => write!(f, "encoding failed: {err}"),
        }
    }
}

#[derive(Serialize)]
struct DataMessage<'a> {
    event: &'static str,
    data: &'a Snapshot,
}

pub fn encode_config(config: &Config) -> Result<String, serde_json::Error> {
    serde_json::to_string(config)
}

/// `{"event":"data","data":{...}}`
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(&DataMessage {
        event: "data",
        data: snapshot,
    })
}

struct Broadcaster<S> {
    id: ConnectionId,
    server: Server,
    sink: S,
    state: BroadcastState,
}

impl<S: SnapshotSink> Broadcaster<S> {
    fn transition(&mut self, next: BroadcastState) {
        log::debug!("broadcaster {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    async fn send(&mut self, frame: String, cancel: &CancellationToken) -> Result<(), CloseReason> {
        tokio::select! {
            _ = cancel.cancelled() => Err(CloseReason::Cancelled),
            sent = self.sink.send_text(frame) => sent.map_err(CloseReason::Write),
        }
    }

    async fn stream(
        &mut self,
        frequency: Duration,
        cancel: &CancellationToken,
    ) -> Result<Infallible, CloseReason> {
        let config = encode_config(self.server.config()).map_err(CloseReason::Encode)?;
        self.send(config, cancel).await?;
        self.transition(BroadcastState::Streaming);

        let mut states: Vec<DescriptorState> = self.server.registry().new_states();
        let mut ticker = tokio::time::interval_at(Instant::now() + frequency, frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(CloseReason::Cancelled),
                _ = ticker.tick() => {}
            }
            let snapshot = self.server.tick(&mut states);
            let frame = encode_snapshot(&snapshot).map_err(CloseReason::Encode)?;
            self.send(frame, cancel).await?;
        }
    }
}

/// Body of one connection task. Returns once the connection is closed.
pub(crate) async fn run<S: SnapshotSink>(
    server: Server,
    id: ConnectionId,
    sink: S,
    frequency: Duration,
    cancel: CancellationToken,
) {
    let mut broadcaster = Broadcaster {
        id,
        server,
        sink,
        state: BroadcastState::Registered,
    };
    log::debug!("broadcaster {id}: registered at {frequency:?}");

    let Err(reason) = broadcaster.stream(frequency, &cancel).await;
    broadcaster.transition(BroadcastState::Closed);
    match reason {
        CloseReason::Cancelled => log::debug!("broadcaster {id}: closed (cancelled)"),
        other => log::info!("broadcaster {id}: closed ({other})"),
    }
}

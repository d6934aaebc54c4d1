/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Async side of the server: connection supervision, per-connection
//! broadcasting and the WebSocket transport.

pub(crate) mod broadcaster;
pub(crate) mod connections;
pub(crate) mod options;
pub(crate) mod sched_probe;
pub(crate) mod server;
pub(crate) mod sink;
pub(crate) mod transport;

pub use broadcaster::{encode_config, encode_snapshot};
pub use connections::{ConnectionHandle, ConnectionId};
pub use options::{OptionsError, ServerOptions};
pub use sched_probe::SchedLatencyProbe;
pub use server::{Server, ServerBuilder, ServerConfigError};
pub use sink::{SinkError, SnapshotSink, WebSocketSink};
pub use transport::{handle_client, serve, ws_path};

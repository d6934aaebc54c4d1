/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The write side of one client connection.

use std::future::Future;
use std::time::Duration;

use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Error, Message};

#[derive(Debug)]
pub enum SinkError {
    /// The receiving side is gone.
    Closed,
    /// The write did not complete within the configured timeout.
    Timeout(Duration),
    Transport(tungstenite::Error),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::Timeout(timeout) => write!(f, "write timed out after {timeout:?}"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// Destination of the frames produced for one connection.
///
/// A failed send ends the connection; frames are never retried.
pub trait SnapshotSink: Send + 'static {
    fn send_text(&mut self, frame: String) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// In-process sink, used by embedders that forward frames themselves.
impl SnapshotSink for mpsc::Sender<String> {
    async fn send_text(&mut self, frame: String) -> Result<(), SinkError> {
        self.send(frame).await.map_err(|_| SinkError::Closed)
    }
}

/// Write half of a WebSocket, with a per-write timeout.
pub struct WebSocketSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    write_timeout: Duration,
}

impl<S> WebSocketSink<S> {
    pub fn new(sink: SplitSink<WebSocketStream<S>, Message>, write_timeout: Duration) -> Self {
        Self {
            sink,
            write_timeout,
        }
    }
}

impl<S> SnapshotSink for WebSocketSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_text(&mut self, frame: String) -> Result<(), SinkError> {
        let send = self.sink.send(Message::text(frame));
        match tokio::time::timeout(self.write_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Error::ConnectionClosed | Error::AlreadyClosed)) => Err(SinkError::Closed),
            Ok(Err(err)) => Err(SinkError::Transport(err)),
            Err(_) => Err(SinkError::Timeout(self.write_timeout)),
        }
    }
}

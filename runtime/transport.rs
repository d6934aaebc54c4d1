/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! WebSocket transport: accepts TCP clients, upgrades `<root>/ws` requests
//! and registers each upgraded socket with the server.
//!
//! The optional `interval_ms` query parameter sets the connection's send
//! frequency. A failed handshake only affects that client.

use std::time::Duration;

use futures_util::StreamExt;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;

use super::server::Server;
use super::sink::WebSocketSink;

/// Endpoint path under `root`.
pub fn ws_path(root: &str) -> String {
    format!("{}/ws", root.trim_end_matches('/'))
}

fn error_response(status: StatusCode, message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = status;
    response
}

/// Reads `interval_ms` from a query string. `Ok(None)` when absent.
pub(crate) fn parse_interval(query: Option<&str>) -> Result<Option<Duration>, String> {
    let Some(query) = query else {
        return Ok(None);
    };
    for pair in query.split('&') {
        let Some(("interval_ms", value)) = pair.split_once('=') else {
            continue;
        };
        return match value.parse::<u64>() {
            Ok(0) => Err("interval_ms must be positive".to_string()),
            Ok(millis) => Ok(Some(Duration::from_millis(millis))),
            Err(err) => Err(format!("invalid interval_ms {value:?}: {err}")),
        };
    }
    Ok(None)
}

/// Accepts clients on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    server: Server,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    log::info!(
        "transport: listening on {}{}",
        listener.local_addr()?,
        ws_path(server.root())
    );
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("transport: stopped accepting");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::warn!("transport: accept failed ({err})");
                    continue;
                }
            },
        };
        let server = server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = handle_client(stream, server) => {}
            }
            log::debug!("transport: {peer} done");
        });
    }
}

/// Upgrades one client and keeps its read side drained until the
/// connection closes.
pub async fn handle_client<S>(stream: S, server: Server)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let expected = ws_path(server.root());
    let mut frequency = None;
    let callback = |request: &Request, response: Response| {
        if request.uri().path() != expected {
            return Err(error_response(StatusCode::NOT_FOUND, "not found"));
        }
        match parse_interval(request.uri().query()) {
            Ok(parsed) => {
                frequency = parsed;
                Ok(response)
            }
            Err(message) => Err(error_response(StatusCode::BAD_REQUEST, &message)),
        }
    };

    let socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(err) => {
            log::debug!("transport: handshake rejected ({err})");
            return;
        }
    };

    let (write, mut read) = socket.split();
    let sink = WebSocketSink::new(write, server.write_timeout());
    let handle = server.register_connection(sink, frequency);
    loop {
        tokio::select! {
            _ = handle.closed() => break,
            message = read.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    log::debug!("transport: read failed on {} ({err})", handle.id());
                    break;
                }
            },
        }
    }
    server.unregister(handle.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, Ok(None))]
    #[case(Some("foo=1"), Ok(None))]
    #[case(Some("interval_ms=250"), Ok(Some(Duration::from_millis(250))))]
    #[case(Some("a=b&interval_ms=5"), Ok(Some(Duration::from_millis(5))))]
    fn interval_query_is_parsed(
        #[case] query: Option<&str>,
        #[case] expected: Result<Option<Duration>, String>,
    ) {
        assert_eq!(parse_interval(query), expected);
    }

    #[rstest]
    #[case("interval_ms=0")]
    #[case("interval_ms=-3")]
    #[case("interval_ms=fast")]
    fn bad_interval_is_an_error(#[case] query: &str) {
        assert!(parse_interval(Some(query)).is_err());
    }

    #[test]
    fn ws_path_ignores_trailing_slash() {
        assert_eq!(ws_path("/debug/statscope/"), "/debug/statscope/ws");
        assert_eq!(ws_path(""), "/ws");
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use statscope::Server;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error, Message};
use tokio_util::sync::CancellationToken;

use super::{CountingSource, constant_plot, counting_server};

type Serving = JoinHandle<std::io::Result<()>>;

async fn start() -> (Server, SocketAddr, CancellationToken, Serving) {
    let server = counting_server(&CountingSource::new(1))
        .root("/debug/statscope")
        .send_interval(Duration::from_secs(60))
        .user_plot(constant_plot("load", 0.25))
        .build()
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let serve = statscope::serve(listener, server.clone(), cancel.clone());
    let serving = tokio::spawn(serve);
    (server, addr, cancel, serving)
}

fn http_status(err: Error) -> u16 {
    match err {
        Error::Http(response) => response.status().as_u16(),
        other => panic!("expected an HTTP refusal, got {other}"),
    }
}

async fn next_json<S>(socket: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, Error>> + Unpin,
{
    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("message within timeout")
        .expect("socket open")
        .expect("valid frame");
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn websocket_client_receives_config_and_data() {
    let (server, addr, cancel, serving) = start().await;

    let url = format!("ws://{addr}/debug/statscope/ws?interval_ms=20");
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let config = next_json(&mut socket).await;
    assert_eq!(config["series"][0]["name"], "load");
    assert_eq!(config["events"], serde_json::json!([]));

    let data = next_json(&mut socket).await;
    assert_eq!(data["event"], "data");
    assert_eq!(data["data"]["series"]["load"], serde_json::json!([0.25]));
    assert_eq!(server.connection_count(), 1);

    socket.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection released after close");

    cancel.cancel();
    server.shutdown().await;
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn wrong_path_and_bad_interval_are_refused() {
    let (server, addr, cancel, serving) = start().await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/elsewhere/ws"))
        .await
        .unwrap_err();
    assert_eq!(http_status(err), 404);

    let err = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/debug/statscope/ws?interval_ms=0"
    ))
    .await
    .unwrap_err();
    assert_eq!(http_status(err), 400);
    assert_eq!(server.connection_count(), 0);

    cancel.cancel();
    serving.await.unwrap().unwrap();
}

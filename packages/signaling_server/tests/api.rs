use std::{sync::Arc, time::Duration};

use actix_web::{
    App,
    http::{Method, StatusCode},
    web::Data,
};
use awc::{
    error::{WsClientError, WsProtocolError},
    ws::{Frame, Message},
};
use futures_util::{Sink, SinkExt as _, Stream, StreamExt as _};
use peerdrop_signaling_server::{
    AppState,
    api::{CreateRoomResponse, bind_services, cors_headers},
    registry::RoomRegistry,
    storage::MemoryStorage,
    turn::{DEFAULT_TURN_API_BASE_URL, TurnCredentials},
    ws::handler::Heartbeat,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn start_server() -> actix_test::TestServer {
    start_server_with(Heartbeat::default())
}

fn start_server_with(heartbeat: Heartbeat) -> actix_test::TestServer {
    let state = Data::new(AppState {
        registry: RoomRegistry::new(Arc::new(MemoryStorage::default())),
        turn: TurnCredentials::new(None, None, DEFAULT_TURN_API_BASE_URL),
        heartbeat,
    });

    actix_test::start(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors_headers())
            .configure(bind_services)
    })
}

async fn create_room(srv: &actix_test::TestServer) -> String {
    let mut res = srv.post("/room").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json::<CreateRoomResponse>().await.unwrap().room_id
}

async fn connect(
    srv: &actix_test::TestServer,
    path: &str,
) -> Result<
    impl Stream<Item = Result<Frame, WsProtocolError>>
    + Sink<Message, Error = WsProtocolError>
    + Unpin,
    WsClientError,
> {
    let (_res, conn) = awc::Client::new().ws(srv.url(path)).connect().await?;
    Ok(conn)
}

/// Next text frame as JSON, skipping transport pings.
async fn next_json<S>(conn: &mut S) -> Value
where
    S: Stream<Item = Result<Frame, WsProtocolError>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), conn.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap();

        match frame {
            Frame::Text(bytes) => return serde_json::from_slice(&bytes).unwrap(),
            Frame::Ping(_) | Frame::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[test_log::test(actix_web::test)]
async fn health_reports_healthy() {
    let srv = start_server();

    let mut res = srv.get("/health").send().await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await.unwrap(), json!({"healthy": true}));
}

#[test_log::test(actix_web::test)]
async fn created_rooms_have_short_ids() {
    let srv = start_server();

    let room_id = create_room(&srv).await;

    assert_eq!(room_id.len(), 6);
    assert!(peerdrop_signaling::id::is_valid_id(&room_id));
}

#[test_log::test(actix_web::test)]
async fn two_peers_meet_and_exchange_signals() {
    let srv = start_server();
    let room_id = create_room(&srv).await;
    let path = format!("/room/{room_id}/ws");

    let mut a = connect(&srv, &path).await.unwrap();
    let welcome_a = next_json(&mut a).await;
    assert_eq!(welcome_a["type"], "welcome");
    assert_eq!(welcome_a["peerCount"], 1);
    let a_id = welcome_a["peerId"].as_str().unwrap().to_string();

    let mut b = connect(&srv, &path).await.unwrap();
    let welcome_b = next_json(&mut b).await;
    assert_eq!(welcome_b["type"], "welcome");
    assert_eq!(welcome_b["peerCount"], 2);
    let b_id = welcome_b["peerId"].as_str().unwrap().to_string();
    assert_ne!(a_id, b_id);

    assert_eq!(
        next_json(&mut a).await,
        json!({"type": "peer-joined", "peerId": b_id})
    );

    a.send(Message::Text(r#"{"type":"offer","sdp":"v=0"}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        next_json(&mut b).await,
        json!({"type": "offer", "sdp": "v=0", "from": a_id})
    );

    b.send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        next_json(&mut b).await,
        json!({"type": "pong", "peerCount": 2})
    );
}

#[test_log::test(actix_web::test)]
async fn a_third_peer_is_refused() {
    let srv = start_server();
    let room_id = create_room(&srv).await;
    let path = format!("/room/{room_id}/ws");

    let mut a = connect(&srv, &path).await.unwrap();
    next_json(&mut a).await;
    let mut b = connect(&srv, &path).await.unwrap();
    next_json(&mut b).await;

    let Err(err) = connect(&srv, &path).await else {
        panic!("third peer was admitted");
    };

    assert!(
        matches!(err, WsClientError::InvalidResponseStatus(StatusCode::FORBIDDEN)),
        "unexpected error: {err:?}"
    );
}

#[test_log::test(actix_web::test)]
async fn closing_a_socket_announces_the_departure() {
    let srv = start_server();
    let room_id = create_room(&srv).await;
    let path = format!("/room/{room_id}/ws");

    let mut a = connect(&srv, &path).await.unwrap();
    next_json(&mut a).await;
    let mut b = connect(&srv, &path).await.unwrap();
    let b_id = next_json(&mut b).await["peerId"].clone();
    next_json(&mut a).await;

    b.send(Message::Close(None)).await.unwrap();

    assert_eq!(
        next_json(&mut a).await,
        json!({"type": "peer-left", "peerId": b_id})
    );

    // the freed slot can be taken again
    let mut c = connect(&srv, &path).await.unwrap();
    assert_eq!(next_json(&mut c).await["peerCount"], 2);
}

/// Sends a `ping` and expects the `pong` as the very next frame, so nothing
/// else (such as a repeated `peer-left`) is pending on the connection.
async fn assert_alone<S>(conn: &mut S)
where
    S: Stream<Item = Result<Frame, WsProtocolError>>
        + Sink<Message, Error = WsProtocolError>
        + Unpin,
{
    conn.send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        next_json(conn).await,
        json!({"type": "pong", "peerCount": 1})
    );
}

#[test_log::test(actix_web::test)]
async fn dropping_a_socket_without_closing_announces_the_departure() {
    let srv = start_server();
    let room_id = create_room(&srv).await;
    let path = format!("/room/{room_id}/ws");

    let mut a = connect(&srv, &path).await.unwrap();
    next_json(&mut a).await;
    let mut b = connect(&srv, &path).await.unwrap();
    let b_id = next_json(&mut b).await["peerId"].clone();
    next_json(&mut a).await;

    drop(b);

    assert_eq!(
        next_json(&mut a).await,
        json!({"type": "peer-left", "peerId": b_id})
    );
    assert_alone(&mut a).await;
}

#[test_log::test(actix_web::test)]
async fn silent_peers_are_dropped_and_announced() {
    let srv = start_server_with(Heartbeat {
        interval: Duration::from_millis(200),
        client_timeout: Duration::from_millis(600),
    });
    let room_id = create_room(&srv).await;
    let path = format!("/room/{room_id}/ws");

    let mut a = connect(&srv, &path).await.unwrap();
    next_json(&mut a).await;
    // b is kept open but never read from or written to again
    let mut b = connect(&srv, &path).await.unwrap();
    let b_id = next_json(&mut b).await["peerId"].clone();
    next_json(&mut a).await;

    let mut keepalive = tokio::time::interval(Duration::from_millis(100));
    let left = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    a.send(Message::Pong("".into())).await.unwrap();
                }
                frame = a.next() => match frame.expect("connection closed").unwrap() {
                    Frame::Text(bytes) => {
                        return serde_json::from_slice::<Value>(&bytes).unwrap();
                    }
                    Frame::Ping(_) | Frame::Pong(_) => {}
                    other => panic!("unexpected frame: {other:?}"),
                },
            }
        }
    })
    .await
    .expect("silent peer was never dropped");

    assert_eq!(left, json!({"type": "peer-left", "peerId": b_id}));
    assert_alone(&mut a).await;
    drop(b);
}

#[test_log::test(actix_web::test)]
async fn plain_requests_to_the_socket_need_an_upgrade() {
    let srv = start_server();

    let mut res = srv.get("/room/abc123/ws").send().await.unwrap();

    assert_eq!(res.status(), StatusCode::UPGRADE_REQUIRED);
    assert_eq!(res.body().await.unwrap(), "Expected WebSocket upgrade");
}

#[test_log::test(actix_web::test)]
async fn invalid_room_ids_are_not_found() {
    let srv = start_server();

    let Err(err) = connect(&srv, "/room/NOT-AN-ID/ws").await else {
        panic!("malformed room id was accepted");
    };

    assert!(
        matches!(err, WsClientError::InvalidResponseStatus(StatusCode::NOT_FOUND)),
        "unexpected error: {err:?}"
    );
}

#[test_log::test(actix_web::test)]
async fn preflight_requests_get_cors_headers() {
    let srv = start_server();

    let res = awc::Client::new()
        .request(Method::OPTIONS, srv.url("/room"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        res.headers()
            .get("access-control-allow-origin")
            .and_then(|x| x.to_str().ok()),
        Some("*")
    );
    assert_eq!(
        res.headers()
            .get("access-control-allow-methods")
            .and_then(|x| x.to_str().ok()),
        Some("GET, POST, OPTIONS")
    );
}

#[test_log::test(actix_web::test)]
async fn unknown_paths_are_not_found() {
    let srv = start_server();

    let mut res = srv.get("/definitely/not/here").send().await.unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        res.headers()
            .get("access-control-allow-origin")
            .and_then(|x| x.to_str().ok()),
        Some("*")
    );
    assert_eq!(res.body().await.unwrap(), "Not found");
}

#[test_log::test(actix_web::test)]
async fn turn_config_without_credentials_is_empty() {
    let srv = start_server();

    let mut res = srv.get("/turn-config").send().await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({
            "iceServers": [],
            "debug": {
                "hasKeyId": false,
                "hasApiToken": false,
                "message": "TURN credentials not configured, using STUN only",
            },
        })
    );
}

//! Relay End-to-End Integration Tests
//!
//! Drives the full startup path (secret, principals, option chain) against
//! mock REST servers, then relays frames from a local WebSocket streamer to
//! a mock Pub/Sub endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use options_stream_relay::application::services::PublishQueueConfig;
use options_stream_relay::infrastructure::config::StreamerSettings;
use options_stream_relay::infrastructure::gcp::{
    GcpTokenProvider, PubSubPublisher, SecretManagerClient,
};
use options_stream_relay::infrastructure::streamer::ReconnectConfig;
use options_stream_relay::infrastructure::tdameritrade::TdAmeritradeClient;
use options_stream_relay::{
    BrokeragePort, ConnectionState, EventSinkPort, FeedState, InMemoryEventSink, OptionsRelay,
    RelayError, RelaySettings, SecretStorePort, SessionContext, SubscriptionRequest,
    collect_instrument_keys,
};

const PROJECT: &str = "test-project";
const QUOTE: &str = r#"{"data":[{"content":[{"foo":"bar"}]}]}"#;
const IDENTIFICATION: &str = r#"{"data":[{"content":[{"cusip":"123"}]}]}"#;
const LOGIN_ACK: &str = r#"{"response":[{"service":"ADMIN","command":"LOGIN","content":{"code":0,"msg":"ok"}}]}"#;

fn principals() -> serde_json::Value {
    serde_json::json!({
        "accounts": [{
            "accountId": 987654321,
            "company": "AMER",
            "segment": "AMER",
            "accountCdDomainId": "A000000098765432"
        }],
        "streamerInfo": {
            "token": "streamer-token",
            "tokenTimestamp": "2021-01-28T20:17:53+0000",
            "userGroup": "ACCT",
            "accessLevel": "ACCT",
            "appId": "APP01",
            "acl": "AKBPDRFQ",
            "streamerSocketUrl": "streamer-ws.tdameritrade.com"
        }
    })
}

fn nvda_chain() -> serde_json::Value {
    serde_json::json!({
        "symbol": "NVDA",
        "status": "SUCCESS",
        "putExpDateMap": {"2021-02-05:8": {"500.0": [{"symbol": "NVDA_020521P500"}]}},
        "callExpDateMap": {"2021-02-05:8": {"500.0": [{"symbol": "NVDA_020521C500"}]}}
    })
}

/// Mount the secret, principals, chain and publish endpoints on one server.
async fn mock_backends() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/v1/projects/{PROJECT}/secrets/access_token/versions/latest:access"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": format!("projects/{PROJECT}/secrets/access_token/versions/3"),
            "payload": {"data": STANDARD.encode("brokerage-access-token")}
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/userprincipals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(principals()))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/marketdata/chains"))
        .and(query_param("symbol", "NVDA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nvda_chain()))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/v1/projects/{PROJECT}/topics/options_events:publish")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"messageIds": ["1"]})),
        )
        .mount(&server)
        .await;

    server
}

/// Startup path: access token, principals, session and subscription.
async fn prepare_session(server: &MockServer) -> (SessionContext, SubscriptionRequest) {
    let secrets = SecretManagerClient::new(
        Client::new(),
        &server.uri(),
        PROJECT,
        Arc::new(GcpTokenProvider::anonymous()),
    );
    let access_token = secrets.get_latest_secret("access_token").await.unwrap();
    assert_eq!(access_token, "brokerage-access-token");

    let brokerage = TdAmeritradeClient::with_client(Client::new(), &server.uri(), "KEY@AMER");
    let principals = brokerage.user_principals(&access_token).await.unwrap();
    let session = SessionContext::from_principals(&principals).unwrap();

    let chain = brokerage.option_chain("NVDA").await.unwrap();
    let subscription = SubscriptionRequest::new(&session, &collect_instrument_keys(&chain));
    (session, subscription)
}

/// Streamer stand-in. Each accepted connection reports the requests it
/// received, then gets `frames` followed by a close.
async fn spawn_streamer(
    connections: usize,
    frames: Vec<&'static str>,
) -> (String, mpsc::UnboundedReceiver<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for _ in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let mut requests = Vec::new();
            while requests.len() < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => requests.push(text.to_string()),
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            tx.send(requests).unwrap();

            for frame in &frames {
                ws.send(Message::text(*frame)).await.unwrap();
            }
            ws.close(None).await.unwrap();
            while ws.next().await.is_some() {}
        }
        // Listener dropped here; later connection attempts are refused.
    });

    (url, rx)
}

fn settings(reconnect: Option<ReconnectConfig>) -> RelaySettings {
    RelaySettings {
        streamer: StreamerSettings {
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(5)),
        },
        publish: PublishQueueConfig {
            capacity: 64,
            max_in_flight: 1,
        },
        reconnect,
    }
}

async fn published_payloads(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path().ends_with(":publish"))
        .map(|request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let data = body["messages"][0]["data"].as_str().unwrap();
            String::from_utf8(STANDARD.decode(data).unwrap()).unwrap()
        })
        .collect()
}

#[tokio::test]
async fn nvda_session_relays_qualifying_frames_to_pubsub() {
    let server = mock_backends().await;
    let (session, subscription) = prepare_session(&server).await;
    assert_eq!(subscription.key_count(), 2);
    assert_eq!(subscription.keys(), "NVDA_020521P500,NVDA_020521C500");

    let (url, mut requests) =
        spawn_streamer(1, vec![LOGIN_ACK, QUOTE, IDENTIFICATION, "{not json", QUOTE]).await;

    let sink: Arc<dyn EventSinkPort> = Arc::new(PubSubPublisher::new(
        Client::new(),
        &server.uri(),
        PROJECT,
        "options_events",
        Arc::new(GcpTokenProvider::anonymous()),
    ));
    let feed = Arc::new(FeedState::new());
    let relay = OptionsRelay::new(
        &session,
        &subscription,
        sink,
        settings(None),
        Arc::clone(&feed),
        CancellationToken::new(),
    )
    .unwrap()
    .with_endpoint(url);

    timeout(Duration::from_secs(10), relay.run())
        .await
        .expect("relay should finish when the streamer closes")
        .unwrap();

    let sent = requests.recv().await.unwrap();
    assert_eq!(sent.len(), 2);
    let login: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
    let subs: serde_json::Value = serde_json::from_str(&sent[1]).unwrap();
    assert_eq!(login["requests"][0]["command"], "LOGIN");
    assert_eq!(login["requests"][0]["account"], "987654321");
    assert_eq!(subs["requests"][0]["command"], "SUBS");
    assert_eq!(
        subs["requests"][0]["parameters"]["keys"]
            .as_str()
            .unwrap()
            .split(',')
            .count(),
        2
    );

    // Identical frames are published twice, byte for byte.
    assert_eq!(published_payloads(&server).await, [QUOTE, QUOTE]);

    let snapshot = feed.snapshot();
    assert_eq!(snapshot.frames_received, 5);
    assert_eq!(snapshot.frames_forwarded, 2);
    assert_eq!(snapshot.frames_discarded, 2);
    assert_eq!(snapshot.frames_malformed, 1);
    assert_eq!(snapshot.events_published, 2);
    assert_eq!(snapshot.subscribed_instruments, 2);
}

#[tokio::test]
async fn identification_frames_are_never_published() {
    let server = mock_backends().await;
    let (session, subscription) = prepare_session(&server).await;
    let (url, _requests) = spawn_streamer(1, vec![IDENTIFICATION, IDENTIFICATION]).await;

    let sink = Arc::new(InMemoryEventSink::new());
    let relay = OptionsRelay::new(
        &session,
        &subscription,
        sink.clone(),
        settings(None),
        Arc::new(FeedState::new()),
        CancellationToken::new(),
    )
    .unwrap()
    .with_endpoint(url);

    timeout(Duration::from_secs(10), relay.run())
        .await
        .unwrap()
        .unwrap();

    assert!(sink.is_empty());
}

#[tokio::test]
async fn events_published_before_remote_close_are_kept() {
    let server = mock_backends().await;
    let (session, subscription) = prepare_session(&server).await;
    let (url, _requests) = spawn_streamer(1, vec![QUOTE]).await;

    let sink = Arc::new(InMemoryEventSink::new());
    let feed = Arc::new(FeedState::new());
    let relay = OptionsRelay::new(
        &session,
        &subscription,
        sink.clone(),
        settings(None),
        Arc::clone(&feed),
        CancellationToken::new(),
    )
    .unwrap()
    .with_endpoint(url);

    timeout(Duration::from_secs(10), relay.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0].as_str(), QUOTE);
    assert_ne!(feed.state(), ConnectionState::Open);
}

#[tokio::test]
async fn reconnect_starts_fresh_sessions_until_streamer_disappears() {
    let server = mock_backends().await;
    let (session, subscription) = prepare_session(&server).await;
    let (url, mut requests) = spawn_streamer(2, vec![QUOTE]).await;

    let sink = Arc::new(InMemoryEventSink::new());
    let feed = Arc::new(FeedState::new());
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts: 1,
    };
    let relay = OptionsRelay::new(
        &session,
        &subscription,
        sink.clone(),
        settings(Some(reconnect)),
        Arc::clone(&feed),
        CancellationToken::new(),
    )
    .unwrap()
    .with_endpoint(url);

    let result = timeout(Duration::from_secs(10), relay.run()).await.unwrap();
    assert!(matches!(
        result,
        Err(RelayError::MaxReconnectAttemptsExceeded(1))
    ));

    // Every session logs in and subscribes again.
    for _ in 0..2 {
        let sent = requests.recv().await.unwrap();
        assert!(sent[0].contains(r#""command":"LOGIN""#));
        assert!(sent[1].contains(r#""command":"SUBS""#));
    }
    assert_eq!(sink.len(), 2);
    assert_eq!(feed.snapshot().frames_received, 2);
}

#[tokio::test]
async fn cancellation_stops_a_quiet_session() {
    let server = mock_backends().await;
    let (session, subscription) = prepare_session(&server).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let cancel = CancellationToken::new();
    let relay = OptionsRelay::new(
        &session,
        &subscription,
        Arc::new(InMemoryEventSink::new()),
        settings(None),
        Arc::new(FeedState::new()),
        cancel.clone(),
    )
    .unwrap()
    .with_endpoint(url);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    timeout(Duration::from_secs(5), relay.run())
        .await
        .expect("relay should stop on cancel")
        .unwrap();
    canceller.await.unwrap();
}

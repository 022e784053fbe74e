use std::{num::NonZeroU32, time::Duration};

use comms::{ChannelEvent, LossFn, TrainingChannel, TrainingSpec};
use futures::{SinkExt, StreamExt};
use tokio::io::{self, DuplexStream};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Message, protocol::Role},
};

const SILENCE: Duration = Duration::from_secs(5);

async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (client, server) = io::duplex(64 * 1024);
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    (client, server)
}

fn spec() -> TrainingSpec {
    TrainingSpec {
        learning_rate: 0.01,
        num_steps: NonZeroU32::new(10_000).unwrap(),
        update_interval: NonZeroU32::new(100).unwrap(),
        loss_fn: LossFn::L2,
    }
}

fn update(step: u32) -> Message {
    Message::text(format!(
        r#"{{"type":"update","step":{step},"loss":0.5,"message":"step {step}"}}"#
    ))
}

#[tokio::test]
async fn sends_config_frame_on_open() {
    let (client, mut server) = ws_pair().await;
    let _channel = TrainingChannel::open(client, &spec(), SILENCE).await.unwrap();

    let msg = server.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();

    assert_eq!(value["numSteps"], 10_000);
    assert_eq!(value["updateInterval"], 100);
    assert_eq!(value["lossFunctionId"], "l2");
}

#[tokio::test]
async fn first_terminal_frame_wins() {
    let (client, mut server) = ws_pair().await;
    let mut channel = TrainingChannel::open(client, &spec(), SILENCE).await.unwrap();

    for step in [100, 200, 300] {
        server.send(update(step)).await.unwrap();
    }
    server
        .send(Message::text(r#"{"type":"complete"}"#))
        .await
        .unwrap();
    let _ = server.send(update(400)).await;

    let mut steps = Vec::new();
    let mut completed = false;
    while let Some(event) = channel.next().await {
        match event {
            ChannelEvent::Update(frame) => {
                assert!(!completed, "update applied after completion");
                steps.push(frame.step);
            }
            ChannelEvent::Complete(_) => completed = true,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert!(completed);
    assert_eq!(steps.last(), Some(&300));
    assert!(steps.windows(2).all(|w| w[0] < w[1]));
    assert!(channel.next().await.is_none());
}

#[tokio::test]
async fn log_frames_do_not_terminate() {
    let (client, mut server) = ws_pair().await;
    let mut channel = TrainingChannel::open(client, &spec(), SILENCE).await.unwrap();

    server
        .send(Message::text(r#"{"type":"log","message":"warming up"}"#))
        .await
        .unwrap();
    server
        .send(Message::text(r#"{"type":"error","message":"out of memory"}"#))
        .await
        .unwrap();

    assert!(matches!(channel.next().await, Some(ChannelEvent::Log(m)) if m == "warming up"));
    assert!(matches!(channel.next().await, Some(ChannelEvent::Failed(m)) if m == "out of memory"));
    assert!(channel.is_closed());
    assert!(channel.next().await.is_none());
}

#[tokio::test]
async fn close_is_idempotent_and_drops_pending_frames() {
    let (client, mut server) = ws_pair().await;
    let mut channel = TrainingChannel::open(client, &spec(), SILENCE).await.unwrap();

    server.send(update(100)).await.unwrap();
    channel.close();
    channel.close();

    assert!(channel.is_closed());
    assert!(channel.next().await.is_none());
}

#[tokio::test]
async fn undecodable_frames_are_skipped() {
    let (client, mut server) = ws_pair().await;
    let mut channel = TrainingChannel::open(client, &spec(), SILENCE).await.unwrap();

    server.send(Message::text("not json")).await.unwrap();
    server.send(update(100)).await.unwrap();

    assert!(matches!(channel.next().await, Some(ChannelEvent::Update(f)) if f.step == 100));
}

#[tokio::test]
async fn silence_fails_the_channel() {
    let (client, _server) = ws_pair().await;
    let mut channel = TrainingChannel::open(client, &spec(), Duration::from_millis(50))
        .await
        .unwrap();

    assert!(matches!(channel.next().await, Some(ChannelEvent::Failed(_))));
    assert!(channel.next().await.is_none());
}

#[tokio::test]
async fn dropped_connection_fails_the_channel() {
    let (client, server) = ws_pair().await;
    let mut channel = TrainingChannel::open(client, &spec(), SILENCE).await.unwrap();

    drop(server);

    assert!(matches!(channel.next().await, Some(ChannelEvent::Failed(_))));
}

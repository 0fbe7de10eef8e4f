//! Live connector tests against a local WebSocket server

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use sapling_voice::transport::{Connector, LiveConnector, SessionSetup, TransportEvent};
use sapling_voice::voice::EncodedChunk;

fn setup() -> SessionSetup {
    SessionSetup {
        model: "test-model".to_string(),
        voice: "Kore".to_string(),
        input_mime_type: "audio/pcm;rate=16000".to_string(),
        output_mime_type: "audio/pcm;rate=24000".to_string(),
        system_instruction: "Be calm.".to_string(),
    }
}

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

#[tokio::test]
async fn session_round_trip_over_websocket() {
    let (listener, url) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let Some(Ok(Message::Text(setup))) = ws.next().await else {
            panic!("expected setup message");
        };
        let setup: serde_json::Value = serde_json::from_str(&setup).unwrap();

        ws.send(Message::Text(r#"{"setupComplete":{}}"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#
                .to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::Binary(
            br#"{"serverContent":{"interrupted":true}}"#.to_vec(),
        ))
        .await
        .unwrap();

        let Some(Ok(Message::Text(input))) = ws.next().await else {
            panic!("expected realtime input");
        };
        let input: serde_json::Value = serde_json::from_str(&input).unwrap();

        ws.close(None).await.unwrap();
        (setup, input)
    });

    let connector = LiveConnector::new(url, Some("secret".to_string()), 4);
    let mut handle = connector.connect(&setup()).await.unwrap();

    assert_eq!(handle.next_event().await, Some(TransportEvent::Open));

    let Some(TransportEvent::Message(audio)) = handle.next_event().await else {
        panic!("expected audio message");
    };
    assert_eq!(audio.audio_data.as_deref(), Some("AAAA"));
    assert!(!audio.interrupted);

    let Some(TransportEvent::Message(barge_in)) = handle.next_event().await else {
        panic!("expected interruption");
    };
    assert!(barge_in.interrupted);

    handle.outbound().submit(EncodedChunk::from_samples(&[0.5; 4]));

    assert_eq!(handle.next_event().await, Some(TransportEvent::Close));

    let (setup, input) = server.await.unwrap();
    assert_eq!(setup["setup"]["model"], "models/test-model");
    assert_eq!(
        input["realtimeInput"]["mediaChunks"][0]["mimeType"],
        "audio/pcm;rate=16000"
    );

    handle.close();
    assert_eq!(handle.next_event().await, None);
}

#[tokio::test]
async fn closing_the_handle_sends_close_frame() {
    let (listener, url) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let mut saw_close = false;
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                saw_close = true;
                break;
            }
        }
        saw_close
    });

    let connector = LiveConnector::new(url, None, 4);
    let mut handle = connector.connect(&setup()).await.unwrap();
    assert_eq!(handle.next_event().await, Some(TransportEvent::Open));

    handle.close();
    handle.close();

    assert!(server.await.unwrap());
}

#[tokio::test]
async fn unreachable_service_fails_to_connect() {
    let (listener, url) = listener().await;
    drop(listener);

    let connector = LiveConnector::new(url, None, 4);
    let err = connector.connect(&setup()).await.unwrap_err();
    assert!(err.to_string().contains("connect failed"));
}

//! WebSocket binding for the live audio service
//!
//! Speaks the Live API JSON shape: one `setup` message on connect, then a
//! stream of `realtimeInput` chunks out and `serverContent` messages in.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{
    Connector, EVENT_CHANNEL_CAPACITY, ServerMessage, SessionSetup, TransportEvent,
    TransportHandle, outbound_queue,
};
use crate::voice::EncodedChunk;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens live sessions over a WebSocket
#[derive(Debug, Clone)]
pub struct LiveConnector {
    url: String,
    api_key: Option<String>,
    queue_capacity: usize,
}

impl LiveConnector {
    /// Create a connector for `url`
    ///
    /// `queue_capacity` bounds the outbound audio queue of every session.
    #[must_use]
    pub const fn new(url: String, api_key: Option<String>, queue_capacity: usize) -> Self {
        Self {
            url,
            api_key,
            queue_capacity,
        }
    }

    /// Endpoint with the API key attached
    fn endpoint(&self) -> String {
        match &self.api_key {
            Some(key) if !key.is_empty() => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{separator}key={key}", self.url)
            }
            _ => self.url.clone(),
        }
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<TransportHandle> {
        tracing::debug!(
            url = %self.url,
            model = %setup.model,
            voice = %setup.voice,
            output = %setup.output_mime_type,
            "opening live session"
        );

        let (ws, _response) = connect_async(self.endpoint())
            .await
            .map_err(|e| Error::Transport(format!("connect failed: {e}")))?;
        let (mut sink, stream) = ws.split();

        let setup_json = serde_json::to_string(&ClientSetup::from(setup))?;
        sink.send(Message::Text(setup_json))
            .await
            .map_err(|e| Error::Transport(format!("setup failed: {e}")))?;

        let (queue, audio_rx) = outbound_queue(self.queue_capacity);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // Nothing else has touched the channel yet, so this cannot be full
        let _ = event_tx.try_send(TransportEvent::Open);

        tokio::spawn(write_loop(sink, audio_rx, shutdown_rx));
        let reader = tokio::spawn(read_loop(stream, event_tx));

        tracing::info!("live session connected");

        Ok(TransportHandle::new(queue, event_rx)
            .with_shutdown(shutdown_tx)
            .with_task(reader.abort_handle()))
    }
}

/// Forward queued audio to the socket until shutdown or failure
async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut audio_rx: mpsc::Receiver<EncodedChunk>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            chunk = audio_rx.recv() => {
                let Some(chunk) = chunk else { break };
                let json = match serde_json::to_string(&RealtimeInputMessage::from(&chunk)) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::debug!(error = %e, "failed to serialize audio chunk");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    tracing::debug!(error = %e, sent, "audio send failed, writer stopping");
                    break;
                }
                sent += 1;
            }
        }
    }

    let _ = sink.close().await;
    tracing::debug!(sent, "live writer stopped");
}

/// Translate socket traffic into transport events
async fn read_loop(mut stream: SplitStream<WsStream>, events: mpsc::Sender<TransportEvent>) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "non-utf8 binary frame ignored");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "live session closed by remote");
                let _ = events.send(TransportEvent::Close).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "live session socket error");
                let _ = events.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        };

        match parse_server_message(&text) {
            Ok(Some(message)) => {
                if events.send(TransportEvent::Message(message)).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "unparseable server message ignored"),
        }
    }

    let _ = events.send(TransportEvent::Close).await;
}

/// Extract audio and the interruption flag from a raw server message
///
/// Returns `None` for messages that carry neither (setup acknowledgements,
/// turn markers, transcripts).
///
/// # Errors
///
/// Returns error if `text` is not JSON
pub fn parse_server_message(text: &str) -> Result<Option<ServerMessage>> {
    let raw: LiveServerMessage = serde_json::from_str(text)?;
    let Some(content) = raw.server_content else {
        return Ok(None);
    };

    let audio_data = content.model_turn.and_then(|turn| {
        turn.parts
            .into_iter()
            .filter_map(|part| part.inline_data)
            .find(|data| data.mime_type.is_empty() || data.mime_type.starts_with("audio/"))
            .map(|data| data.data)
    });

    if audio_data.is_none() && !content.interrupted {
        return Ok(None);
    }

    Ok(Some(ServerMessage {
        audio_data,
        interrupted: content.interrupted,
    }))
}

// Wire types

#[derive(Debug, Serialize)]
struct ClientSetup<'a> {
    setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: String,
    generation_config: GenerationConfig<'a>,
    system_instruction: InstructionContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Serialize)]
struct InstructionContent<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

impl<'a> From<&'a SessionSetup> for ClientSetup<'a> {
    fn from(setup: &'a SessionSetup) -> Self {
        let model = if setup.model.starts_with("models/") {
            setup.model.clone()
        } else {
            format!("models/{}", setup.model)
        };

        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: ["AUDIO"],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: &setup.voice,
                            },
                        },
                    },
                },
                system_instruction: InstructionContent {
                    parts: [TextPart {
                        text: &setup.system_instruction,
                    }],
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [Blob<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob<'a> {
    mime_type: &'a str,
    data: &'a str,
}

impl<'a> From<&'a EncodedChunk> for RealtimeInputMessage<'a> {
    fn from(chunk: &'a EncodedChunk) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: [Blob {
                    mime_type: chunk.mime_type,
                    data: &chunk.data,
                }],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveServerMessage {
    #[serde(default)]
    server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

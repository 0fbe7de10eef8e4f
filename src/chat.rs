//! Text conversation with the companion
//!
//! A thin collaborator next to the voice session: the transcript is kept in
//! memory and every turn sends the full history to a [`TextCompletion`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Opening line of every conversation
pub const GREETING: &str =
    "I'm Ani. I'm here to watch over your garden while you do the real work. How's it feeling today?";

/// Reply used when the model answers with no text
pub const EMPTY_REPLY: &str = "I'm here.";

/// Reply used when the completion call fails
pub const FALLBACK_REPLY: &str = "The garden is quiet for a moment. Take a breath.";

/// Default generative language API base
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Inline binary attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// MIME type of the payload, e.g. `image/png`
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

/// One piece of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    /// Text content, if this is a text part
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::InlineData { .. } => None,
        }
    }
}

/// A transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl ChatMessage {
    /// A single-part text message
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// Concatenated text of all text parts
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}

/// Produces a model reply for a conversation history
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Generate the next model turn
    ///
    /// Returns the reply text, possibly empty.
    async fn complete(&self, system_instruction: &str, history: &[ChatMessage]) -> Result<String>;
}

/// In-memory transcript seeded with the greeting
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// Start a conversation with the companion's greeting
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::text(Role::Model, GREETING)],
        }
    }

    /// All messages so far
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Send a user turn and append the reply
    ///
    /// Returns `None` when there is neither text nor an image. Completion
    /// failures are answered with a fallback line instead of an error.
    pub async fn send(
        &mut self,
        completion: &dyn TextCompletion,
        system_instruction: &str,
        text: &str,
        image: Option<InlineData>,
    ) -> Option<&ChatMessage> {
        let has_text = !text.trim().is_empty();
        if !has_text && image.is_none() {
            return None;
        }

        let mut parts = Vec::with_capacity(2);
        if let Some(inline_data) = image {
            parts.push(Part::InlineData { inline_data });
        }
        if has_text {
            parts.push(Part::Text {
                text: text.to_string(),
            });
        }
        self.messages.push(ChatMessage {
            role: Role::User,
            parts,
        });

        let reply = match completion.complete(system_instruction, &self.messages).await {
            Ok(reply) if reply.is_empty() => EMPTY_REPLY.to_string(),
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "text completion failed");
                FALLBACK_REPLY.to_string()
            }
        };

        self.messages.push(ChatMessage::text(Role::Model, reply));
        self.messages.last()
    }
}

/// `generateContent` client over HTTP
#[derive(Debug, Clone)]
pub struct GenerateContentClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl GenerateContentClient {
    /// Create a client for `model` at `endpoint`
    #[must_use]
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }

    /// Request URL for the configured model
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model.trim_start_matches("models/")
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [ChatMessage],
    system_instruction: SystemInstruction<'a>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextCompletion for GenerateContentClient {
    async fn complete(&self, system_instruction: &str, history: &[ChatMessage]) -> Result<String> {
        let body = GenerateRequest {
            contents: history,
            system_instruction: SystemInstruction {
                parts: [TextPart {
                    text: system_instruction,
                }],
            },
        };

        let mut req = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("x-goog-api-key", key);
        }

        tracing::debug!(model = %self.model, turns = history.len(), "requesting completion");
        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Chat(format!("completion API error: {status} - {body}")));
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(parsed.text())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Completion returning a canned result and recording its inputs
    struct Canned {
        reply: Option<String>,
        seen: Mutex<Vec<(String, usize)>>,
    }

    impl Canned {
        fn new(reply: Option<&str>) -> Self {
            Self {
                reply: reply.map(ToString::to_string),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextCompletion for Canned {
        async fn complete(&self, system_instruction: &str, history: &[ChatMessage]) -> Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((system_instruction.to_string(), history.len()));
            self.reply
                .clone()
                .ok_or_else(|| Error::Chat("unavailable".to_string()))
        }
    }

    #[test]
    fn conversation_starts_with_greeting() {
        let conversation = Conversation::new();
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].role, Role::Model);
        assert_eq!(conversation.messages()[0].joined_text(), GREETING);
    }

    #[tokio::test]
    async fn send_appends_user_turn_and_reply() {
        let completion = Canned::new(Some("That's lovely."));
        let mut conversation = Conversation::new();

        let reply = conversation
            .send(&completion, "sys", "The oak is growing", None)
            .await
            .unwrap();
        assert_eq!(reply.joined_text(), "That's lovely.");

        let messages = conversation.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(completion.seen.lock().unwrap()[0], ("sys".to_string(), 2));
    }

    #[tokio::test]
    async fn empty_reply_and_failure_fallbacks() {
        let mut conversation = Conversation::new();

        let reply = conversation.send(&Canned::new(Some("")), "", "hi", None).await;
        assert_eq!(reply.unwrap().joined_text(), EMPTY_REPLY);

        let reply = conversation.send(&Canned::new(None), "", "hi", None).await;
        assert_eq!(reply.unwrap().joined_text(), FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let completion = Canned::new(Some("unused"));
        let mut conversation = Conversation::new();

        assert!(conversation.send(&completion, "", "   ", None).await.is_none());
        assert_eq!(conversation.messages().len(), 1);
        assert!(completion.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_only_turn_puts_image_first() {
        let completion = Canned::new(Some("What a view."));
        let mut conversation = Conversation::new();
        let image = InlineData {
            mime_type: "image/png".to_string(),
            data: "iVBORw0=".to_string(),
        };

        conversation.send(&completion, "", "look", Some(image)).await;
        let parts = &conversation.messages()[1].parts;
        assert!(matches!(parts[0], Part::InlineData { .. }));
        assert_eq!(parts[1].as_text(), Some("look"));
    }

    #[test]
    fn request_wire_shape() {
        let history = vec![
            ChatMessage::text(Role::Model, "hello"),
            ChatMessage {
                role: Role::User,
                parts: vec![Part::InlineData {
                    inline_data: InlineData {
                        mime_type: "image/jpeg".to_string(),
                        data: "AAAA".to_string(),
                    },
                }],
            },
        ];
        let body = GenerateRequest {
            contents: &history,
            system_instruction: SystemInstruction {
                parts: [TextPart { text: "sys" }],
            },
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["role"], "model");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(
            json["contents"][1]["parts"][0]["inlineData"]["mimeType"],
            "image/jpeg"
        );
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
    }

    #[test]
    fn response_text_joins_first_candidate() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"a"},{"text":"b"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.text(), "ab");

        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn url_strips_model_prefix() {
        let client = GenerateContentClient::new(
            "https://example.test/v1beta/",
            "models/gemini-3-pro-preview",
            None,
        );
        assert_eq!(
            client.url(),
            "https://example.test/v1beta/models/gemini-3-pro-preview:generateContent"
        );
    }
}

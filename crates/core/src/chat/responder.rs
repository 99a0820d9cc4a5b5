//! AI responder gate and response generators.
//!
//! The gate decides whether an outgoing message gets a generated reply and
//! turns generator failures into user-visible fallback text. Generation is a
//! single attempt per trigger.

use crate::chat::types::ChatMessage;
use crate::config::ResponderConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Number of earlier turns handed to the generator.
pub const MAX_HISTORY_TURNS: usize = 5;

const FALLBACK_CONFIG: &str =
    "Sorry, the assistant is not configured correctly. Please contact an administrator.";
const FALLBACK_QUOTA: &str = "Sorry, the assistant has run out of quota. Please try again later.";
const FALLBACK_GENERIC: &str = "Sorry, I can't answer right now. Please try again.";
const UNAVAILABLE_NOTICE: &str =
    "Sorry, the assistant is currently unavailable. Please contact an administrator.";
const IMAGE_PLACEHOLDER: &str = "[User sent an image]";

static ADDRESS_PREFIX: OnceLock<Regex> = OnceLock::new();

fn address_prefix_regex() -> &'static Regex {
    ADDRESS_PREFIX.get_or_init(|| {
        // Match "@ai ", "bot:", "Assistant, " at the start of a message
        Regex::new(r"(?i)^@?(ai|bot|assistant|gemini)[\s:,]+").expect("Invalid address prefix regex")
    })
}

/// When an outgoing message should trigger a generated reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePolicy {
    /// Reply to every user message.
    #[default]
    Always,
    /// Reply only to messages addressed to the assistant (`ai: ...`, `@bot ...`).
    Prefixed,
    /// Never reply.
    Never,
}

impl FromStr for ResponsePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(ResponsePolicy::Always),
            "prefixed" => Ok(ResponsePolicy::Prefixed),
            "never" => Ok(ResponsePolicy::Never),
            other => Err(format!("unknown response policy: {}", other)),
        }
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One earlier message as seen by the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// A service producing reply text. Stateless per call.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, history: &[ConversationTurn]) -> Result<String>;
}

/// Remove an `ai:` / `@assistant` style address from the start of `text`.
pub fn strip_address_prefix(text: &str) -> String {
    address_prefix_regex().replace(text.trim(), "").trim().to_string()
}

/// Map the most recent messages onto generator turns.
///
/// Keeps the last [`MAX_HISTORY_TURNS`] non-deleted messages, describes
/// image-only messages with a placeholder and drops a leading model turn
/// (generators expect the conversation to open with the user).
pub fn build_history(messages: &[ChatMessage]) -> Vec<ConversationTurn> {
    let visible: Vec<&ChatMessage> = messages.iter().filter(|m| !m.is_deleted()).collect();
    let start = visible.len().saturating_sub(MAX_HISTORY_TURNS);

    let mut turns: Vec<ConversationTurn> = visible[start..]
        .iter()
        .map(|m| ConversationTurn {
            role: if m.is_ai() { Role::Model } else { Role::User },
            text: match (m.text(), m.image_url()) {
                (Some(text), _) => text.to_string(),
                (None, Some(_)) => IMAGE_PLACEHOLDER.to_string(),
                (None, None) => String::new(),
            },
        })
        .collect();

    if turns.first().is_some_and(|t| t.role == Role::Model) {
        turns.remove(0);
    }
    turns
}

/// User-visible text for a failed generation.
pub fn fallback_text(error: &Error) -> &'static str {
    match error {
        Error::Config(_) => FALLBACK_CONFIG,
        Error::Generator(msg) if msg.contains("API key") => FALLBACK_CONFIG,
        Error::Generator(msg) if msg.contains("quota") => FALLBACK_QUOTA,
        _ => FALLBACK_GENERIC,
    }
}

/// Text of a reply produced by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatedReply {
    pub text: String,
    /// The generator failed and `text` is a fallback notice.
    pub fallback: bool,
}

/// Decides whether and how the assistant answers.
pub struct ResponderGate {
    generator: Option<Arc<dyn ResponseGenerator>>,
    policy: ResponsePolicy,
    init_error: Option<String>,
}

impl ResponderGate {
    /// Gate around an initialized generator (or none).
    pub fn new(generator: Option<Arc<dyn ResponseGenerator>>, policy: ResponsePolicy) -> Self {
        Self {
            generator,
            policy,
            init_error: None,
        }
    }

    /// Gate around the outcome of generator initialization.
    ///
    /// An initialization error is logged once here and leaves the gate
    /// unavailable; it is never retried.
    pub fn from_init(
        generator: Result<Arc<dyn ResponseGenerator>>,
        policy: ResponsePolicy,
    ) -> Self {
        match generator {
            Ok(generator) => {
                info!("Response generator initialized");
                Self::new(Some(generator), policy)
            }
            Err(e) => {
                error!("Response generator disabled: {}", e);
                Self {
                    generator: None,
                    policy,
                    init_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Gate backed by an [`HttpGenerator`] built from `config`.
    ///
    /// With the `never` policy no generator is built at all.
    pub fn from_config(config: &ResponderConfig) -> Self {
        if config.policy == ResponsePolicy::Never {
            return Self::new(None, ResponsePolicy::Never);
        }
        Self::from_init(
            HttpGenerator::new(config).map(|g| Arc::new(g) as Arc<dyn ResponseGenerator>),
            config.policy,
        )
    }

    /// Gate that never has a generator.
    pub fn disabled() -> Self {
        Self::new(None, ResponsePolicy::Never)
    }

    pub fn policy(&self) -> ResponsePolicy {
        self.policy
    }

    /// Whether `text` asks for a reply under the configured policy.
    pub fn should_respond(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        match self.policy {
            ResponsePolicy::Always => true,
            ResponsePolicy::Prefixed => address_prefix_regex().is_match(text.trim()),
            ResponsePolicy::Never => false,
        }
    }

    /// Whether the generator was initialized.
    pub fn is_available(&self) -> bool {
        self.generator.is_some()
    }

    /// Why initialization failed, if it did.
    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// Notice sent when a reply is wanted but no generator is available.
    pub fn unavailable_notice(&self) -> &'static str {
        UNAVAILABLE_NOTICE
    }

    /// Produce reply text for `prompt`, with one generator attempt.
    pub async fn reply(&self, prompt: &str, history: &[ChatMessage]) -> GatedReply {
        let Some(generator) = &self.generator else {
            return GatedReply {
                text: UNAVAILABLE_NOTICE.to_string(),
                fallback: true,
            };
        };

        let cleaned = strip_address_prefix(prompt);
        let turns = build_history(history);
        debug!("Requesting reply with {} history turns", turns.len());

        match generator.generate(&cleaned, &turns).await {
            Ok(text) if !text.trim().is_empty() => GatedReply {
                text,
                fallback: false,
            },
            Ok(_) => {
                warn!("Generator returned an empty reply");
                GatedReply {
                    text: FALLBACK_GENERIC.to_string(),
                    fallback: true,
                }
            }
            Err(e) => {
                warn!("Generator failed: {}", e);
                GatedReply {
                    text: fallback_text(&e).to_string(),
                    fallback: true,
                }
            }
        }
    }
}

const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant taking part in a group chat. \
Answer clearly and concisely (two to four short paragraphs at most unless asked for more), \
reply in the language of the question, and say so honestly when you are unsure.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Generator backed by a `generateContent` style REST API.
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpGenerator {
    /// Build the client. A missing API key is a configuration error.
    pub fn new(config: &ResponderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("generator API key is missing".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    fn request_body<'a>(prompt: &'a str, history: &'a [ConversationTurn]) -> GenerateRequest<'a> {
        let mut contents: Vec<Content<'a>> = history
            .iter()
            .map(|turn| Content {
                role: Some(turn.role),
                parts: vec![Part { text: &turn.text }],
            })
            .collect();
        contents.push(Content {
            role: Some(Role::User),
            parts: vec![Part { text: prompt }],
        });

        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION,
                }],
            },
            contents,
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_k: 20,
                top_p: 0.8,
                max_output_tokens: 1024,
            },
        }
    }

    fn parse_response(body: &str) -> Result<String> {
        let response: GenerateResponse = serde_json::from_str(body)?;
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::Generator("response contained no text".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ResponseGenerator for HttpGenerator {
    async fn generate(&self, prompt: &str, history: &[ConversationTurn]) -> Result<String> {
        let response = self
            .client
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(prompt, history))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Self::parse_response(&body);
        }

        match status.as_u16() {
            401 | 403 => Err(Error::Generator(format!("API key rejected ({})", status))),
            429 => Err(Error::Generator(format!("quota exceeded ({})", status))),
            400 if body.contains("API key") => {
                Err(Error::Generator(format!("API key invalid ({})", status)))
            }
            _ => Err(Error::Generator(format!("request failed ({}): {}", status, body))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::{Draft, Sender};
    use std::sync::Mutex;

    struct ScriptedGenerator {
        reply: Result<String>,
        prompts: Mutex<Vec<(String, usize)>>,
    }

    impl ScriptedGenerator {
        fn new(reply: Result<String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ResponseGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, history: &[ConversationTurn]) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), history.len()));
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(Error::Generator(e.to_string())),
            }
        }
    }

    fn user(text: &str) -> ChatMessage {
        ChatMessage::from_draft(Draft::text(Sender::new("u", "User"), text))
    }

    fn bot(text: &str) -> ChatMessage {
        ChatMessage::from_draft(Draft::ai_reply(Sender::new("assistant", "Assistant"), text))
    }

    #[test]
    fn test_strip_address_prefix() {
        assert_eq!(strip_address_prefix("AI: what time is it"), "what time is it");
        assert_eq!(strip_address_prefix("@assistant, hello"), "hello");
        assert_eq!(strip_address_prefix("bot hi"), "hi");
        assert_eq!(strip_address_prefix("aim high"), "aim high");
    }

    #[test]
    fn test_policy_parsing_and_gating() {
        assert_eq!("Prefixed".parse::<ResponsePolicy>().unwrap(), ResponsePolicy::Prefixed);
        assert!("sometimes".parse::<ResponsePolicy>().is_err());

        let always = ResponderGate::new(None, ResponsePolicy::Always);
        assert!(always.should_respond("anything"));
        assert!(!always.should_respond("  "));

        let prefixed = ResponderGate::new(None, ResponsePolicy::Prefixed);
        assert!(prefixed.should_respond("ai: help"));
        assert!(!prefixed.should_respond("hello everyone"));

        let never = ResponderGate::new(None, ResponsePolicy::Never);
        assert!(!never.should_respond("ai: help"));
    }

    #[test]
    fn test_history_window() {
        let mut messages = vec![bot("intro")];
        for i in 0..7 {
            messages.push(user(&format!("q{}", i)));
        }
        let turns = build_history(&messages);
        assert_eq!(turns.len(), MAX_HISTORY_TURNS);
        assert_eq!(turns[0].text, "q2");
    }

    #[test]
    fn test_history_drops_leading_model_turn_and_describes_images() {
        let image = ChatMessage::from_draft(Draft::image(Sender::new("u", "User"), "https://i/1.png"));
        let messages = vec![bot("hello"), image, user("what is this")];
        let turns = build_history(&messages);

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].text, IMAGE_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_reply_cleans_prompt() {
        let generator = ScriptedGenerator::new(Ok("42".to_string()));
        let gate = ResponderGate::new(Some(generator.clone()), ResponsePolicy::Always);

        let reply = gate.reply("ai: meaning of life?", &[user("earlier")]).await;
        assert_eq!(reply.text, "42");
        assert!(!reply.fallback);

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts[0], ("meaning of life?".to_string(), 1));
    }

    #[tokio::test]
    async fn test_reply_falls_back_on_failure() {
        let generator = ScriptedGenerator::new(Err(Error::Generator("quota exceeded (429)".into())));
        let gate = ResponderGate::new(Some(generator.clone()), ResponsePolicy::Always);

        let reply = gate.reply("hi", &[]).await;
        assert!(reply.fallback);
        assert_eq!(reply.text, FALLBACK_QUOTA);
        // Single attempt per trigger
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_init_failure_disables_gate() {
        let gate = ResponderGate::from_init(
            HttpGenerator::new(&ResponderConfig::default())
                .map(|g| Arc::new(g) as Arc<dyn ResponseGenerator>),
            ResponsePolicy::Always,
        );
        assert!(!gate.is_available());
        assert!(gate.init_error().unwrap().contains("API key"));
    }

    #[test]
    fn test_request_body_shape() {
        let history = vec![ConversationTurn {
            role: Role::Model,
            text: "earlier".to_string(),
        }];
        let body = serde_json::to_value(HttpGenerator::request_body("now", &history)).unwrap();

        assert_eq!(body["contents"][0]["role"], "model");
        assert_eq!(body["contents"][1]["role"], "user");
        assert_eq!(body["contents"][1]["parts"][0]["text"], "now");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        assert!(body["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"there"}]}}]}"#;
        assert_eq!(HttpGenerator::parse_response(body).unwrap(), "Hello there");
        assert!(HttpGenerator::parse_response(r#"{"candidates":[]}"#).is_err());
    }
}

//! Policy classifier client.
//!
//! [`Classifier`] is the seam the pipeline requests verdicts through, so
//! the orchestrator can be exercised against a mock. [`ClassifierClient`]
//! is the production implementation: it talks to an OpenAI-compatible
//! chat-completions endpoint and turns the completion into a validated
//! [`Verdict`]. The classifier is advisory and strictly best effort: one
//! attempt per message, a hard deadline, and any failure is surfaced as a
//! [`ClassifierError`] for the caller to fail open on. No conversation
//! state is kept between calls.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::moderation::context::MessageContext;
use crate::moderation::error::ClassifierError;

/// Chat-completions endpoint used unless `CLASSIFIER_API_URL` overrides it.
pub const DEFAULT_CLASSIFIER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Hard deadline for one classification round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.2;

/// System instruction sent with every classification request. Enumerates the
/// server rules and pins the exact response schema.
const POLICY_PROMPT: &str = r#"You are the moderation assistant for a Discord server. Review the message in its provided context and decide whether it violates the server rules below.

Server rules:
1. Keep NSFW content out of channels that are not age-restricted. Content posted in an age-restricted channel is exempt from this rule.
2. No harassment, hate speech, or targeted abuse of any user or group.
3. No spamming, flooding, or severely disruptive conduct.
4. No AI-generated or digitally altered sexual content depicting real people.
5. No sexual content involving minors, real or fictional, under any circumstances.
5A. No soliciting, sharing, or linking to material described in rule 5.

Additional instructions:
- The author's role and prior infractions are included. Suggest harsher actions for repeat offenders; be lenient with an isolated first offense.
- If the message suggests the author may be considering suicide or self-harm, that takes priority over everything else: set rule_violated to "Suicidal Content" and action to "SUICIDAL".
- If there is no violation and no self-harm concern, set violation to false, rule_violated to "None", and action to "IGNORE".

Respond with only a JSON object, no code fences and no other text, exactly in this form:
{"violation": <true|false>, "rule_violated": "<rule number, None, or Suicidal Content>", "reasoning": "<one or two sentences>", "action": "<one of IGNORE, WARN, DELETE, TIMEOUT_SHORT, TIMEOUT_MEDIUM, TIMEOUT_LONG, KICK, BAN, NOTIFY_MODS, SUICIDAL>"}"#;

/// A validated classifier verdict.
///
/// `suggested_action` stays a raw string here; only the escalation engine
/// decides what it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub violation: bool,
    /// Rule identifier, e.g. `"5A"`, `"None"`, or `"Suicidal Content"`.
    pub category: String,
    pub reasoning: String,
    pub suggested_action: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// How the pipeline requests a verdict for one message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifies one message in context. Exactly one attempt; `model` is
    /// the community's configured classifier model.
    ///
    /// # Errors
    /// Returns a [`ClassifierError`] on any transport, status, or schema
    /// failure. Callers treat every error as "no violation".
    async fn classify(
        &self,
        context: &MessageContext,
        model: &str,
    ) -> Result<Verdict, ClassifierError>;
}

/// Client for the policy classification endpoint.
#[derive(Debug, Clone)]
pub struct ClassifierClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ClassifierClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Builds a client from `CLASSIFIER_API_URL` and `AI_API_KEY`. A missing
    /// key is not fatal here; each classification will fail open instead.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_env() -> Result<Self, reqwest::Error> {
        let endpoint = std::env::var("CLASSIFIER_API_URL")
            .unwrap_or_else(|_| DEFAULT_CLASSIFIER_URL.to_string());
        let api_key = std::env::var("AI_API_KEY").ok();
        if api_key.is_none() {
            tracing::warn!("AI_API_KEY is not set; every classification will fail open");
        }
        Self::new(endpoint, api_key)
    }
}

#[async_trait]
impl Classifier for ClassifierClient {
    async fn classify(
        &self,
        context: &MessageContext,
        model: &str,
    ) -> Result<Verdict, ClassifierError> {
        let Some(api_key) = &self.api_key else {
            return Err(ClassifierError::MissingCredentials);
        };

        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: POLICY_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: context.render_prompt(),
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ClassifierError::Timeout
                } else {
                    ClassifierError::Transport(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Status(status));
        }

        let completion: ChatResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                ClassifierError::Timeout
            } else {
                ClassifierError::Transport(err)
            }
        })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ClassifierError::EmptyCompletion)?;

        let verdict = parse_verdict(&content)?;
        debug!(
            violation = verdict.violation,
            category = %verdict.category,
            suggested = %verdict.suggested_action,
            "verdict received"
        );
        Ok(verdict)
    }
}

/// Strips a surrounding Markdown code fence, with or without a `json` tag.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Validates the completion text against the verdict schema. `violation`
/// must be a real JSON boolean; the other three fields must be strings.
/// Unknown extra fields are tolerated.
fn parse_verdict(raw: &str) -> Result<Verdict, ClassifierError> {
    let value: serde_json::Value =
        serde_json::from_str(strip_code_fences(raw)).map_err(ClassifierError::MalformedVerdict)?;
    let fields = value
        .as_object()
        .ok_or_else(|| ClassifierError::SchemaMismatch("verdict is not a JSON object".to_string()))?;

    let violation = match fields.get("violation") {
        Some(serde_json::Value::Bool(violation)) => *violation,
        Some(_) => {
            return Err(ClassifierError::SchemaMismatch(
                "field `violation` is not a boolean".to_string(),
            ));
        }
        None => {
            return Err(ClassifierError::SchemaMismatch(
                "missing field `violation`".to_string(),
            ));
        }
    };

    Ok(Verdict {
        violation,
        category: require_string(fields, "rule_violated")?,
        reasoning: require_string(fields, "reasoning")?,
        suggested_action: require_string(fields, "action")?,
    })
}

fn require_string(
    fields: &serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> Result<String, ClassifierError> {
    match fields.get(name) {
        Some(serde_json::Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ClassifierError::SchemaMismatch(format!(
            "field `{name}` is not a string"
        ))),
        None => Err(ClassifierError::SchemaMismatch(format!(
            "missing field `{name}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::context::RoleTier;

    fn context() -> MessageContext {
        MessageContext {
            author_name: "alice".to_string(),
            author_tier: RoleTier::Member,
            channel_name: "general".to_string(),
            channel_category: None,
            age_restricted: false,
            reply_excerpt: "N/A (Not a reply)".to_string(),
            history: Vec::new(),
            content: "hello".to_string(),
            infraction_summary: "No prior infractions on record.".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_network_call() {
        let client = ClassifierClient::new("http://127.0.0.1:9/unreachable", None).unwrap();
        let err = client.classify(&context(), "some/model").await.unwrap_err();
        assert!(matches!(err, ClassifierError::MissingCredentials));
    }

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences(r#"{"a":1}"#), r#"{"a":1}"#);
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), r#"{"a":1}"#);
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), r#"{"a":1}"#);
        assert_eq!(strip_code_fences("  {\"a\":1}  "), r#"{"a":1}"#);
    }

    #[test]
    fn parse_verdict_accepts_the_canonical_shape() {
        let verdict = parse_verdict(
            r#"{"violation": true, "rule_violated": "5A", "reasoning": "links banned material", "action": "BAN"}"#,
        )
        .unwrap();
        assert!(verdict.violation);
        assert_eq!(verdict.category, "5A");
        assert_eq!(verdict.suggested_action, "BAN");
    }

    #[test]
    fn parse_verdict_accepts_fenced_output() {
        let verdict = parse_verdict(
            "```json\n{\"violation\": false, \"rule_violated\": \"None\", \"reasoning\": \"fine\", \"action\": \"IGNORE\"}\n```",
        )
        .unwrap();
        assert!(!verdict.violation);
    }

    #[test]
    fn parse_verdict_tolerates_extra_fields() {
        let verdict = parse_verdict(
            r#"{"violation": false, "rule_violated": "None", "reasoning": "ok", "action": "IGNORE", "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(verdict.suggested_action, "IGNORE");
    }

    #[test]
    fn parse_verdict_rejects_stringly_booleans() {
        let err = parse_verdict(
            r#"{"violation": "true", "rule_violated": "2", "reasoning": "r", "action": "WARN"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ClassifierError::SchemaMismatch(_)));
        assert!(err.to_string().contains("violation"));
    }

    #[test]
    fn parse_verdict_rejects_missing_fields() {
        let err =
            parse_verdict(r#"{"violation": true, "rule_violated": "2", "action": "WARN"}"#).unwrap_err();
        assert!(err.to_string().contains("reasoning"));
    }

    #[test]
    fn parse_verdict_rejects_non_objects() {
        assert!(matches!(
            parse_verdict("[1, 2, 3]"),
            Err(ClassifierError::SchemaMismatch(_))
        ));
        assert!(matches!(
            parse_verdict("not json at all"),
            Err(ClassifierError::MalformedVerdict(_))
        ));
    }

    #[test]
    fn policy_prompt_pins_the_schema() {
        assert!(POLICY_PROMPT.contains("\"violation\""));
        assert!(POLICY_PROMPT.contains("SUICIDAL"));
        assert!(POLICY_PROMPT.contains("5A."));
    }
}

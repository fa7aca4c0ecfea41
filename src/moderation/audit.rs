//! Audit surfaces: the in-platform moderator notice and the dashboard feed.
//!
//! Both are downstream of enforcement and strictly best effort. A notice
//! that cannot be posted and a dashboard POST that fails are logged and
//! dropped; neither ever changes what was enforced.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::moderation::action::ModAction;
use crate::moderation::classifier::Verdict;
use crate::moderation::clip;
use crate::moderation::config::CommunityConfig;
use crate::moderation::context::{IncomingMessage, MessageContext};
use crate::moderation::error::AuditTransportError;
use crate::moderation::executor::EnforcementOutcome;
use crate::moderation::gateway::ModNotice;
use crate::moderation::policy::EnforcementDecision;

/// Dashboard API root used unless `MOD_LOG_API_URL` overrides it.
pub const DEFAULT_DASHBOARD_URL: &str = "https://slipstreamm.dev/dashboard/api";

const DASHBOARD_TIMEOUT: Duration = Duration::from_secs(10);
/// Message content excerpt carried in the dashboard payload.
const CONTENT_EXCERPT_CHARS: usize = 1024;
/// Message content excerpt shown in the notice embed.
const NOTICE_EXCERPT_CHARS: usize = 256;

const COLOR_ACTION: u32 = 0x00E6_7E22;
const COLOR_REVIEW: u32 = 0x00F1_C40F;
const COLOR_URGENT: u32 = 0x00E7_4C3C;

/// Everything the audit surfaces need to describe one moderated case.
#[derive(Debug, Clone, Copy)]
pub struct AuditCase<'a> {
    pub message: &'a IncomingMessage,
    pub context: &'a MessageContext,
    pub verdict: &'a Verdict,
    pub decision: &'a EnforcementDecision,
    pub outcome: &'a EnforcementOutcome,
    /// Classifier model the verdict came from.
    pub model: &'a str,
}

fn message_link(message: &IncomingMessage) -> String {
    format!(
        "https://discord.com/channels/{}/{}/{}",
        message.community_id, message.channel_id, message.message_id
    )
}

/// Builds the moderator notice for a case. Self-harm concerns ping the
/// escalation role; everything else pings the moderator role when one is
/// configured.
#[must_use]
pub fn build_notice(case: &AuditCase<'_>, config: &CommunityConfig) -> ModNotice {
    let (title, color) = if case.decision.action == ModAction::Suicidal {
        ("Self-harm concern", COLOR_URGENT)
    } else if case.outcome.review_flag {
        ("Possible violation - review needed", COLOR_REVIEW)
    } else {
        ("Rule violation handled", COLOR_ACTION)
    };

    let content = if case.decision.action == ModAction::Suicidal {
        config
            .escalation_role_id
            .map(|role| format!("<@&{role}> possible self-harm concern, please check in"))
    } else {
        config.moderator_role_id.map(|role| format!("<@&{role}>"))
    };

    let action_taken = case.outcome.action_taken;
    let action_label = match action_taken.timeout_label() {
        Some(duration) => format!("{action_taken} ({duration})"),
        None => action_taken.to_string(),
    };

    let mut fields = vec![
        (
            "User".to_string(),
            format!("{} (`{}`)", case.message.author_name, case.message.author_id),
            true,
        ),
        ("Channel".to_string(), format!("<#{}>", case.message.channel_id), true),
        ("Rule".to_string(), case.decision.category.clone(), true),
        ("Action".to_string(), action_label, true),
        (
            "Message".to_string(),
            format!(
                "[jump]({}) {}",
                message_link(case.message),
                clip(&case.message.content, NOTICE_EXCERPT_CHARS)
            ),
            false,
        ),
        ("Model".to_string(), case.model.to_string(), true),
    ];
    if !case.outcome.notes.is_empty() {
        fields.push(("Degradations".to_string(), case.outcome.notes.join("\n"), false));
    }

    ModNotice {
        content,
        title: title.to_string(),
        body: clip(&case.decision.reasoning, 1000).to_string(),
        color,
        fields,
    }
}

/// Client for the external moderation dashboard.
#[derive(Debug, Clone)]
pub struct AuditSink {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl AuditSink {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(DASHBOARD_TIMEOUT).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Builds a sink from `MOD_LOG_API_URL` and `MOD_LOG_API_SECRET`. With
    /// no secret configured the sink stays disabled and every report is a
    /// no-op.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_env() -> Result<Self, reqwest::Error> {
        let base_url = std::env::var("MOD_LOG_API_URL")
            .unwrap_or_else(|_| DEFAULT_DASHBOARD_URL.to_string());
        let api_token = std::env::var("MOD_LOG_API_SECRET").ok();
        if api_token.is_none() {
            debug!("MOD_LOG_API_SECRET is not set; dashboard reporting disabled");
        }
        Self::new(base_url, api_token)
    }

    /// Reports a case to the dashboard. Best effort: failures are logged
    /// here and never bubble into the pipeline.
    pub async fn report(&self, case: &AuditCase<'_>) {
        let Some(token) = &self.api_token else {
            debug!("dashboard reporting disabled, skipping");
            return;
        };
        if let Err(err) = self.post(case, token).await {
            warn!(
                community_id = case.message.community_id,
                message_id = case.message.message_id,
                error = %err,
                "dashboard audit post failed"
            );
        }
    }

    async fn post(&self, case: &AuditCase<'_>, token: &str) -> Result<(), AuditTransportError> {
        let url = format!(
            "{}/guilds/{}/ai-moderation-action",
            self.base_url, case.message.community_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&dashboard_payload(case))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuditTransportError::Status(status));
        }
        debug!(community_id = case.message.community_id, "audit event delivered");
        Ok(())
    }
}

fn dashboard_payload(case: &AuditCase<'_>) -> serde_json::Value {
    let result = if case.outcome.notes.is_empty() {
        "ok".to_string()
    } else {
        case.outcome.notes.join("; ")
    };
    json!({
        "case_id": Uuid::new_v4().to_string(),
        "timestamp": Utc::now().to_rfc3339(),
        "guild_id": case.message.community_id,
        "guild_name": case.message.community_name,
        "channel_id": case.message.channel_id,
        "channel_name": case.context.channel_name,
        "message_id": case.message.message_id,
        "message_link": message_link(case.message),
        "user_id": case.message.author_id,
        "user_name": case.message.author_name,
        "action": case.outcome.action_taken.to_string(),
        "rule_violated": case.decision.category,
        "reasoning": case.decision.reasoning,
        "violation": case.verdict.violation,
        "message_content": clip(&case.message.content, CONTENT_EXCERPT_CHARS),
        "ai_model": case.model,
        "result": result,
    })
}

//! Pipeline orchestration.
//!
//! [`ModerationService`] wires the stores, classifier, engine, executor,
//! and audit surfaces together and runs one message at a time through them.
//! The service holds no gateway; handlers pass one per call so the whole
//! pipeline stays mockable end to end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::MODERATION_TARGET;
use crate::moderation::audit::{AuditCase, AuditSink, build_notice};
use crate::moderation::classifier::Classifier;
use crate::moderation::clip;
use crate::moderation::config::{CommunityConfig, ConfigStore};
use crate::moderation::context::{IncomingMessage, assemble};
use crate::moderation::executor::{EffectStatus, execute};
use crate::moderation::gateway::ChatGateway;
use crate::moderation::infractions::InfractionStore;
use crate::moderation::policy::decide;

/// Entries kept in the recent-decision debug ring.
pub const RECENT_DECISION_CAP: usize = 5;
/// Content excerpt kept per ring entry.
const RING_EXCERPT_CHARS: usize = 80;

/// One entry in the recent-decision debug ring.
#[derive(Debug, Clone)]
pub struct DecisionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub community_id: u64,
    pub author_name: String,
    pub content_excerpt: String,
    /// How the pipeline resolved the message, e.g. `"no violation"` or
    /// `"BAN (Rule 5)"`.
    pub resolution: String,
}

/// Orchestrates the moderation pipeline for incoming messages.
pub struct ModerationService {
    configs: Arc<ConfigStore>,
    infractions: Arc<InfractionStore>,
    classifier: Box<dyn Classifier>,
    audit: AuditSink,
    recent_decisions: Mutex<VecDeque<DecisionLogEntry>>,
}

impl std::fmt::Debug for ModerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationService")
            .field("recent_decisions", &self.recent_decisions)
            .finish_non_exhaustive()
    }
}

impl ModerationService {
    #[must_use]
    pub fn new(
        configs: Arc<ConfigStore>,
        infractions: Arc<InfractionStore>,
        classifier: Box<dyn Classifier>,
        audit: AuditSink,
    ) -> Self {
        Self {
            configs,
            infractions,
            classifier,
            audit,
            recent_decisions: Mutex::new(VecDeque::with_capacity(RECENT_DECISION_CAP)),
        }
    }

    /// Runs one message through the pipeline. Returns quietly for messages
    /// the pipeline does not evaluate: bot authors, empty content, and
    /// communities with moderation disabled.
    pub async fn process_message(&self, gateway: &dyn ChatGateway, message: IncomingMessage) {
        if message.author_is_bot || message.content.trim().is_empty() {
            return;
        }
        let config = self.configs.get(message.community_id);
        if !config.enabled {
            debug!(
                target: MODERATION_TARGET,
                community_id = message.community_id,
                "moderation disabled, skipping"
            );
            return;
        }

        let context = assemble(gateway, &config, &self.infractions, &message).await;

        let verdict = match self.classifier.classify(&context, &config.classifier_model).await {
            Ok(verdict) => verdict,
            Err(err) => {
                // Fail open: an unavailable classifier must never hold
                // messages hostage.
                warn!(
                    target: MODERATION_TARGET,
                    community_id = message.community_id,
                    message_id = message.message_id,
                    error = %err,
                    "classifier unavailable, failing open"
                );
                self.push_decision(&message, format!("classifier error: {err}"));
                return;
            }
        };

        if !verdict.violation {
            debug!(
                target: MODERATION_TARGET,
                community_id = message.community_id,
                message_id = message.message_id,
                "no violation"
            );
            self.push_decision(&message, "no violation".to_string());
            return;
        }

        let history = self.infractions.history(message.community_id, message.author_id);
        let decision = decide(&verdict, &history);
        let mut outcome = execute(gateway, &message, &decision).await;

        if let Some(record) = &outcome.record {
            if let Err(err) = self
                .infractions
                .append(message.community_id, message.author_id, record.clone())
                .await
            {
                error!(
                    target: MODERATION_TARGET,
                    community_id = message.community_id,
                    user_id = message.author_id,
                    error = %err,
                    "failed to persist infraction record; in-memory history is updated"
                );
                outcome.notes.push("infraction record not persisted to disk".to_string());
            }
        }

        // Notice first, so its delivery status reaches the dashboard event.
        let mut notice_notes = Vec::new();
        let notice_posted = {
            let case = AuditCase {
                message: &message,
                context: &context,
                verdict: &verdict,
                decision: &decision,
                outcome: &outcome,
                model: &config.classifier_model,
            };
            self.deliver_notice(gateway, &config, &case, &mut notice_notes)
                .await
        };
        outcome.notice_posted = notice_posted;
        outcome.notes.append(&mut notice_notes);

        let case = AuditCase {
            message: &message,
            context: &context,
            verdict: &verdict,
            decision: &decision,
            outcome: &outcome,
            model: &config.classifier_model,
        };
        self.audit.report(&case).await;

        info!(
            target: MODERATION_TARGET,
            community_id = message.community_id,
            user_id = message.author_id,
            category = %decision.category,
            action = %outcome.action_taken,
            review = outcome.review_flag,
            "moderation case closed"
        );
        self.push_decision(
            &message,
            format!("{} (Rule {})", outcome.action_taken, decision.category),
        );
    }

    /// The most recent pipeline resolutions, oldest first.
    #[must_use]
    pub fn recent_decisions(&self) -> Vec<DecisionLogEntry> {
        self.recent_decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Posts the notice to the configured log channel, falling back to the
    /// origin channel when none is configured or the post fails. Degradation
    /// notes land in `notes` for the audit event.
    async fn deliver_notice(
        &self,
        gateway: &dyn ChatGateway,
        config: &CommunityConfig,
        case: &AuditCase<'_>,
        notes: &mut Vec<String>,
    ) -> EffectStatus {
        let notice = build_notice(case, config);
        let origin = case.message.channel_id;
        let target = config.log_channel_id.unwrap_or(origin);

        match gateway.post_notice(target, &notice).await {
            Ok(()) => EffectStatus::Ok,
            Err(err) => {
                warn!(
                    target: MODERATION_TARGET,
                    channel_id = target,
                    error = %err,
                    "moderator notice failed"
                );
                if target == origin {
                    let status = EffectStatus::from_error(&err);
                    notes.push(format!("moderator notice {status}: {err}"));
                    return status;
                }
                match gateway.post_notice(origin, &notice).await {
                    Ok(()) => {
                        notes.push("notice fell back to the origin channel".to_string());
                        EffectStatus::Ok
                    }
                    Err(err) => {
                        warn!(
                            target: MODERATION_TARGET,
                            channel_id = origin,
                            error = %err,
                            "fallback notice failed too"
                        );
                        let status = EffectStatus::from_error(&err);
                        notes.push(format!("moderator notice {status}: {err}"));
                        status
                    }
                }
            }
        }
    }

    fn push_decision(&self, message: &IncomingMessage, resolution: String) {
        let entry = DecisionLogEntry {
            timestamp: Utc::now(),
            community_id: message.community_id,
            author_name: message.author_name.clone(),
            content_excerpt: clip(&message.content, RING_EXCERPT_CHARS).to_string(),
            resolution,
        };
        let mut ring = self
            .recent_decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if ring.len() == RECENT_DECISION_CAP {
            ring.pop_front();
        }
        ring.push_back(entry);
    }
}

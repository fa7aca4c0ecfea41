//! Enforcement executor.
//!
//! Turns an [`EnforcementDecision`] into ordered platform side effects and
//! reports exactly what happened. Message removal always runs before any
//! account-level action. Execution itself never fails: every gateway error
//! is folded into the [`EnforcementOutcome`].

use chrono::Utc;
use tracing::{info, warn};

use crate::moderation::action::ModAction;
use crate::moderation::clip;
use crate::moderation::context::IncomingMessage;
use crate::moderation::error::GatewayError;
use crate::moderation::gateway::ChatGateway;
use crate::moderation::infractions::InfractionRecord;
use crate::moderation::policy::EnforcementDecision;

/// Days of message history purged alongside a ban.
const BAN_PURGE_DAYS: u8 = 1;
/// The platform caps audit-log reasons at 512 characters.
const AUDIT_REASON_CHARS: usize = 512;

/// Sent by DM when a message raises self-harm concern.
pub const SUPPORT_RESOURCES: &str = "\
Hey, it sounds like you might be going through a lot right now. You don't have \
to face this alone; there are people who want to help:\n\
- **988 Suicide & Crisis Lifeline** (US): call or text 988\n\
- **Crisis Text Line**: text HOME to 741741\n\
- **The Trevor Project** (LGBTQ+ youth): 1-866-488-7386\n\
- **International helplines**: https://findahelpline.com\n\
Please consider reaching out to one of them, or to someone you trust.";

/// How one side effect ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum EffectStatus {
    /// Applied
    #[display("ok")]
    Ok,
    /// Not part of this action
    #[display("skipped")]
    Skipped,
    /// The target was already gone
    #[display("already gone")]
    AlreadyGone,
    /// The bot lacks the permission
    #[display("forbidden")]
    Forbidden,
    /// The platform call failed
    #[display("failed")]
    Failed,
}

impl EffectStatus {
    pub(crate) fn from_error(err: &GatewayError) -> Self {
        match err {
            GatewayError::NotFound => Self::AlreadyGone,
            GatewayError::Forbidden => Self::Forbidden,
            GatewayError::Api(_) => Self::Failed,
        }
    }
}

/// What actually happened for one enforced message.
#[derive(Debug, Clone)]
pub struct EnforcementOutcome {
    /// Action ultimately taken. Downgraded to [`ModAction::NotifyMods`] when
    /// the decided action's primary effect could not be applied.
    pub action_taken: ModAction,
    pub message_deleted: EffectStatus,
    pub account_action: EffectStatus,
    pub dm_sent: EffectStatus,
    /// Moderator notice delivery. Stays [`EffectStatus::Skipped`] until the
    /// pipeline posts the notice downstream of enforcement.
    pub notice_posted: EffectStatus,
    /// Record for the author's history, present when the action records an
    /// infraction and its primary effect landed.
    pub record: Option<InfractionRecord>,
    /// The case needs human eyes beyond the routine notice.
    pub review_flag: bool,
    /// Degradation notes for the moderator notice.
    pub notes: Vec<String>,
}

/// Applies a decision through the gateway. Never fails; inspect the
/// returned [`EnforcementOutcome`] for what landed.
pub async fn execute(
    gateway: &dyn ChatGateway,
    message: &IncomingMessage,
    decision: &EnforcementDecision,
) -> EnforcementOutcome {
    let action = decision.action;
    let mut notes = Vec::new();

    // Phase 1: message removal, always ahead of anything account-level.
    let message_deleted = if action.removes_message() {
        match gateway.delete_message(message.channel_id, message.message_id).await {
            Ok(()) => EffectStatus::Ok,
            Err(err) => {
                let status = EffectStatus::from_error(&err);
                if status == EffectStatus::AlreadyGone {
                    info!(message_id = message.message_id, "message was already gone");
                } else {
                    warn!(message_id = message.message_id, error = %err, "message removal failed");
                    notes.push(format!("message removal {status}: {err}"));
                }
                status
            }
        }
    } else {
        EffectStatus::Skipped
    };

    // Phase 2: the account-level action, if any.
    let account_action = if let Some(duration) = action.timeout_duration() {
        let until = Utc::now() + duration;
        apply_account(
            gateway
                .timeout_member(message.community_id, message.author_id, until, &audit_reason(decision))
                .await,
            "timeout",
            &mut notes,
        )
    } else {
        match action {
            ModAction::Kick => apply_account(
                gateway
                    .kick_member(message.community_id, message.author_id, &audit_reason(decision))
                    .await,
                "kick",
                &mut notes,
            ),
            ModAction::Ban => apply_account(
                gateway
                    .ban_member(
                        message.community_id,
                        message.author_id,
                        BAN_PURGE_DAYS,
                        &audit_reason(decision),
                    )
                    .await,
                "ban",
                &mut notes,
            ),
            _ => EffectStatus::Skipped,
        }
    };

    // Phase 3: direct messages. Only the warn and self-harm paths reach
    // out; account-level actions leave their reason in the audit log.
    let dm_sent = match action {
        ModAction::Warn => {
            send_dm(gateway, message.author_id, &removal_dm(message, decision), &mut notes).await
        }
        ModAction::Suicidal => {
            send_dm(gateway, message.author_id, SUPPORT_RESOURCES, &mut notes).await
        }
        _ => EffectStatus::Skipped,
    };

    let achieved = primary_achieved(action, message_deleted, account_action, dm_sent);
    let record = (achieved && action.records_infraction())
        .then(|| InfractionRecord::new(decision.category.clone(), action, &decision.reasoning));

    let (action_taken, review_flag) = if achieved {
        (action, decision.review_flag)
    } else {
        notes.push(format!("{action} could not be applied"));
        (ModAction::NotifyMods, true)
    };

    info!(
        community_id = message.community_id,
        user_id = message.author_id,
        action = %action_taken,
        deleted = %message_deleted,
        account = %account_action,
        dm = %dm_sent,
        "enforcement complete"
    );

    EnforcementOutcome {
        action_taken,
        message_deleted,
        account_action,
        dm_sent,
        notice_posted: EffectStatus::Skipped,
        record,
        review_flag,
        notes,
    }
}

/// Whether the effect that defines the action landed. Already-gone deletes
/// count; an account action that never applied does not.
fn primary_achieved(
    action: ModAction,
    message_deleted: EffectStatus,
    account_action: EffectStatus,
    dm_sent: EffectStatus,
) -> bool {
    let deleted = matches!(message_deleted, EffectStatus::Ok | EffectStatus::AlreadyGone);
    match action {
        ModAction::Ignore | ModAction::NotifyMods | ModAction::Suicidal => true,
        ModAction::Delete => deleted,
        ModAction::Warn => deleted || dm_sent == EffectStatus::Ok,
        ModAction::TimeoutShort
        | ModAction::TimeoutMedium
        | ModAction::TimeoutLong
        | ModAction::Kick
        | ModAction::Ban => account_action == EffectStatus::Ok,
    }
}

fn apply_account(
    result: Result<(), GatewayError>,
    what: &str,
    notes: &mut Vec<String>,
) -> EffectStatus {
    match result {
        Ok(()) => EffectStatus::Ok,
        Err(err) => {
            let status = EffectStatus::from_error(&err);
            warn!(error = %err, "{what} failed");
            notes.push(format!("{what} {status}: {err}"));
            status
        }
    }
}

async fn send_dm(
    gateway: &dyn ChatGateway,
    user_id: u64,
    content: &str,
    notes: &mut Vec<String>,
) -> EffectStatus {
    match gateway.dm_user(user_id, content).await {
        Ok(()) => EffectStatus::Ok,
        Err(err) => {
            let status = EffectStatus::from_error(&err);
            warn!(user_id, error = %err, "direct message failed");
            notes.push(format!("DM {status}: {err}"));
            status
        }
    }
}

/// Audit-log reason attached to account actions.
fn audit_reason(decision: &EnforcementDecision) -> String {
    let full = format!("AI Mod: Rule {}. Reason: {}", decision.category, decision.reasoning);
    clip(&full, AUDIT_REASON_CHARS).to_string()
}

fn removal_dm(message: &IncomingMessage, decision: &EnforcementDecision) -> String {
    format!(
        "Your message in **{}** was removed for violating Rule **{}**. Reason: {} Please review the server rules.",
        message.community_name, decision.category, decision.reasoning
    )
}

//! AI-assisted chat moderation pipeline.
//!
//! Message events flow through context assembly, an external policy
//! classifier, a pure escalation engine, and an enforcement executor, and
//! every flagged case ends in a moderator notice plus a dashboard audit
//! event. Per-community configuration and per-user infraction histories are
//! kept in memory and persisted as JSON under `data/`.
//!
//! The classifier is advisory. Only [`policy::decide`] determines what is
//! enforced, and a classifier failure always fails open: the message is
//! treated as unflagged and never retried.

mod action;
mod audit;
mod classifier;
mod config;
mod context;
mod error;
mod executor;
mod gateway;
mod infractions;
mod policy;
mod service;

pub use action::ModAction;
pub use audit::{AuditCase, AuditSink};
pub use classifier::{Classifier, ClassifierClient, Verdict};
pub use config::{CommunityConfig, ConfigStore, DEFAULT_CLASSIFIER_MODEL};
pub use context::{IncomingMessage, MessageContext, RoleTier, assemble};
pub use error::{AuditTransportError, ClassifierError, GatewayError, PersistError};
pub use executor::{EffectStatus, EnforcementOutcome, execute};
pub use gateway::{ChannelInfo, ChatGateway, MemberInfo, MessageExcerpt, ModNotice, SerenityGateway};
pub use infractions::{InfractionRecord, InfractionStore, MAX_INFRACTIONS_PER_USER};
pub use policy::{EnforcementDecision, decide};
pub use service::{DecisionLogEntry, ModerationService, RECENT_DECISION_CAP};

/// Clips `text` to at most `max_chars` characters, always on a char boundary.
pub(crate) fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::clip;

    #[test]
    fn clip_leaves_short_text_alone() {
        assert_eq!(clip("hello", 10), "hello");
        assert_eq!(clip("hello", 5), "hello");
        assert_eq!(clip("", 3), "");
    }

    #[test]
    fn clip_cuts_on_char_boundaries() {
        assert_eq!(clip("hello", 3), "hel");
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("日本語のテスト", 3), "日本語");
    }
}

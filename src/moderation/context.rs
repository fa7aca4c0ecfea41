//! Context assembly for classification.
//!
//! Gathers everything the classifier sees about a message: the channel, the
//! author's role tier, the replied-to message, recent channel history, and
//! the author's infraction summary. Assembly never fails; any lookup that
//! errors degrades to a labeled placeholder so one broken fetch cannot stop
//! a message from being evaluated.

use std::fmt::Write as _;

use derive_more::Display;
use tracing::warn;

use crate::moderation::clip;
use crate::moderation::config::CommunityConfig;
use crate::moderation::error::GatewayError;
use crate::moderation::gateway::{ChatGateway, MemberInfo};
use crate::moderation::infractions::InfractionStore;

/// Messages fetched when pulling channel history.
pub const HISTORY_FETCH_LIMIT: u8 = 11;
/// Messages kept in the rendered history block.
pub const HISTORY_KEEP: usize = 10;
/// Characters of content kept per history line.
const HISTORY_EXCERPT_CHARS: usize = 150;
/// Characters of content kept from a replied-to message.
const REPLY_EXCERPT_CHARS: usize = 200;
/// Infraction records folded into the summary block.
const SUMMARY_RECORDS: usize = 5;

const REPLY_NONE: &str = "N/A (Not a reply)";
const REPLY_NOT_FOUND: &str = "N/A (Replied-to message not found)";
const REPLY_FORBIDDEN: &str = "N/A (Cannot fetch replied-to message - permissions)";
const REPLY_FETCH_ERROR: &str = "N/A (Error fetching replied-to message)";

/// The author's standing, highest applicable tier wins.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RoleTier {
    #[display("Server Owner")]
    Owner,
    #[display("Admin")]
    Admin,
    #[display("Moderator")]
    Moderator,
    #[display("Member")]
    Member,
}

impl RoleTier {
    /// Derives the tier from a member's standing. Any moderation permission
    /// short of admin counts as `Moderator`.
    #[must_use]
    pub fn resolve(member: &MemberInfo) -> Self {
        if member.is_owner {
            Self::Owner
        } else if member.is_admin {
            Self::Admin
        } else if member.can_manage_messages
            || member.can_kick
            || member.can_ban
            || member.can_moderate
        {
            Self::Moderator
        } else {
            Self::Member
        }
    }
}

/// A message event as the handler hands it to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub community_id: u64,
    pub community_name: String,
    pub channel_id: u64,
    pub message_id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
    /// `(channel_id, message_id)` of the message this one replies to.
    pub replied_to: Option<(u64, u64)>,
}

/// Everything the classifier is shown about one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub author_name: String,
    pub author_tier: RoleTier,
    pub channel_name: String,
    pub channel_category: Option<String>,
    /// Platform flag or the community's configured list.
    pub age_restricted: bool,
    /// Either `author: "excerpt"` or an `N/A (...)` placeholder.
    pub reply_excerpt: String,
    /// `author: "excerpt"` lines, oldest first.
    pub history: Vec<String>,
    pub content: String,
    pub infraction_summary: String,
}

impl MessageContext {
    /// Renders the user-message block of the classification request.
    #[must_use]
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Channel: #{}", self.channel_name);
        let _ = writeln!(
            prompt,
            "Channel category: {}",
            self.channel_category.as_deref().unwrap_or("None")
        );
        let _ = writeln!(
            prompt,
            "Channel is age-restricted: {}",
            if self.age_restricted { "Yes" } else { "No" }
        );
        let _ = writeln!(prompt, "Author: {} (Role: {})", self.author_name, self.author_tier);
        let _ = writeln!(prompt, "Author's prior infractions:");
        let _ = writeln!(prompt, "{}", self.infraction_summary);
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "Replied-to message: {}", self.reply_excerpt);
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "Recent channel history (oldest first):");
        if self.history.is_empty() {
            let _ = writeln!(prompt, "(none)");
        } else {
            for line in &self.history {
                let _ = writeln!(prompt, "- {line}");
            }
        }
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "Message to evaluate, sent by {}:", self.author_name);
        let _ = write!(prompt, "\"{}\"", self.content);
        prompt
    }
}

/// Quotes a content excerpt, marking a clipped tail with an ellipsis so the
/// classifier can tell a cut-off excerpt from a complete one.
fn quoted_excerpt(content: &str, max_chars: usize) -> String {
    let clipped = clip(content, max_chars);
    if clipped.len() < content.len() {
        format!("\"{clipped}...\"")
    } else {
        format!("\"{clipped}\"")
    }
}

/// Builds the classification context for a message. Infallible: every
/// failed lookup is logged and replaced with a degraded placeholder.
pub async fn assemble(
    gateway: &dyn ChatGateway,
    config: &CommunityConfig,
    infractions: &InfractionStore,
    message: &IncomingMessage,
) -> MessageContext {
    let author_tier = match gateway.member_info(message.community_id, message.author_id).await {
        Ok(member) => RoleTier::resolve(&member),
        Err(err) => {
            warn!(
                community_id = message.community_id,
                user_id = message.author_id,
                error = %err,
                "member lookup failed, assuming plain member"
            );
            RoleTier::Member
        }
    };

    let (channel_name, channel_category, platform_flag) =
        match gateway.channel_info(message.channel_id).await {
            Ok(info) => (info.name, info.category_name, info.age_restricted),
            Err(err) => {
                warn!(channel_id = message.channel_id, error = %err, "channel lookup failed");
                (format!("channel-{}", message.channel_id), None, false)
            }
        };
    let age_restricted = platform_flag || config.nsfw_channel_ids.contains(&message.channel_id);

    let reply_excerpt = match message.replied_to {
        None => REPLY_NONE.to_string(),
        Some((reply_channel_id, reply_message_id)) => {
            match gateway.fetch_message(reply_channel_id, reply_message_id).await {
                Ok(replied) => format!(
                    "{}: {}",
                    replied.author_name,
                    quoted_excerpt(&replied.content, REPLY_EXCERPT_CHARS)
                ),
                Err(GatewayError::NotFound) => REPLY_NOT_FOUND.to_string(),
                Err(GatewayError::Forbidden) => REPLY_FORBIDDEN.to_string(),
                Err(err) => {
                    warn!(
                        message_id = reply_message_id,
                        error = %err,
                        "replied-to lookup failed"
                    );
                    REPLY_FETCH_ERROR.to_string()
                }
            }
        }
    };

    let history = match gateway
        .recent_history(message.channel_id, message.message_id, HISTORY_FETCH_LIMIT)
        .await
    {
        Ok(mut fetched) => {
            // The trigger message can echo back from the before-cursor fetch.
            fetched.retain(|excerpt| excerpt.id != message.message_id);
            fetched.truncate(HISTORY_KEEP);
            fetched.reverse();
            fetched
                .iter()
                .map(|excerpt| {
                    format!(
                        "{}: {}",
                        excerpt.author_name,
                        quoted_excerpt(&excerpt.content, HISTORY_EXCERPT_CHARS)
                    )
                })
                .collect()
        }
        Err(err) => {
            warn!(channel_id = message.channel_id, error = %err, "history fetch failed");
            Vec::new()
        }
    };

    let infraction_summary =
        infractions.summarize(message.community_id, message.author_id, SUMMARY_RECORDS);

    MessageContext {
        author_name: message.author_name.clone(),
        author_tier,
        channel_name,
        channel_category,
        age_restricted,
        reply_excerpt,
        history,
        content: message.content.clone(),
        infraction_summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::gateway::{ChannelInfo, MessageExcerpt, MockChatGateway};

    fn plain_member() -> MemberInfo {
        MemberInfo {
            is_owner: false,
            is_admin: false,
            can_manage_messages: false,
            can_kick: false,
            can_ban: false,
            can_moderate: false,
        }
    }

    fn incoming() -> IncomingMessage {
        IncomingMessage {
            community_id: 1,
            community_name: "Test Server".to_string(),
            channel_id: 2,
            message_id: 999,
            author_id: 3,
            author_name: "alice".to_string(),
            author_is_bot: false,
            content: "hello".to_string(),
            replied_to: None,
        }
    }

    fn excerpt(id: u64, author: &str, content: &str) -> MessageExcerpt {
        MessageExcerpt {
            id,
            author_id: 50,
            author_name: author.to_string(),
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    fn gateway_with_defaults() -> MockChatGateway {
        let mut gateway = MockChatGateway::new();
        gateway
            .expect_member_info()
            .returning(|_, _| Ok(plain_member()));
        gateway.expect_channel_info().returning(|_| {
            Ok(ChannelInfo {
                name: "general".to_string(),
                category_name: Some("Text".to_string()),
                age_restricted: false,
            })
        });
        gateway
    }

    /// Defaults plus an empty channel history.
    fn quiet_gateway() -> MockChatGateway {
        let mut gateway = gateway_with_defaults();
        gateway.expect_recent_history().returning(|_, _, _| Ok(Vec::new()));
        gateway
    }

    fn store() -> InfractionStore {
        InfractionStore::new("unused.json")
    }

    #[test]
    fn role_tier_precedence() {
        let mut member = plain_member();
        assert_eq!(RoleTier::resolve(&member), RoleTier::Member);

        member.can_kick = true;
        assert_eq!(RoleTier::resolve(&member), RoleTier::Moderator);

        member.is_admin = true;
        assert_eq!(RoleTier::resolve(&member), RoleTier::Admin);

        member.is_owner = true;
        assert_eq!(RoleTier::resolve(&member), RoleTier::Owner);
    }

    #[test]
    fn role_tier_labels() {
        assert_eq!(RoleTier::Owner.to_string(), "Server Owner");
        assert_eq!(RoleTier::Member.to_string(), "Member");
    }

    #[tokio::test]
    async fn history_keeps_newest_ten_oldest_first() {
        let mut gateway = gateway_with_defaults();
        // Newest first, as the platform returns them.
        gateway.expect_recent_history().returning(|_, _, _| {
            Ok((1..=11)
                .rev()
                .map(|n| excerpt(n, "bob", &format!("msg {n}")))
                .collect())
        });

        let context = assemble(&gateway, &CommunityConfig::default(), &store(), &incoming()).await;

        assert_eq!(context.history.len(), HISTORY_KEEP);
        assert_eq!(context.history[0], r#"bob: "msg 2""#);
        assert_eq!(context.history[9], r#"bob: "msg 11""#);
    }

    #[tokio::test]
    async fn history_drops_the_trigger_echo() {
        let mut gateway = gateway_with_defaults();
        gateway.expect_recent_history().returning(|_, _, _| {
            Ok(vec![
                excerpt(999, "alice", "the trigger itself"),
                excerpt(5, "bob", "earlier"),
            ])
        });

        let context = assemble(&gateway, &CommunityConfig::default(), &store(), &incoming()).await;

        assert_eq!(context.history, vec![r#"bob: "earlier""#.to_string()]);
    }

    #[tokio::test]
    async fn clipped_history_lines_carry_a_marker() {
        let mut gateway = gateway_with_defaults();
        gateway
            .expect_recent_history()
            .returning(|_, _, _| Ok(vec![excerpt(5, "bob", &"z".repeat(400))]));

        let context = assemble(&gateway, &CommunityConfig::default(), &store(), &incoming()).await;

        assert_eq!(context.history[0], format!(r#"bob: "{}...""#, "z".repeat(150)));
    }

    #[tokio::test]
    async fn reply_placeholder_when_not_a_reply() {
        let gateway = quiet_gateway();
        let context = assemble(&gateway, &CommunityConfig::default(), &store(), &incoming()).await;
        assert_eq!(context.reply_excerpt, "N/A (Not a reply)");
    }

    #[tokio::test]
    async fn reply_placeholders_for_failed_lookups() {
        for (err, expected) in [
            (GatewayError::NotFound, "N/A (Replied-to message not found)"),
            (
                GatewayError::Forbidden,
                "N/A (Cannot fetch replied-to message - permissions)",
            ),
        ] {
            let mut gateway = quiet_gateway();
            gateway
                .expect_fetch_message()
                .return_once(move |_, _| Err(err));

            let mut message = incoming();
            message.replied_to = Some((2, 500));
            let context =
                assemble(&gateway, &CommunityConfig::default(), &store(), &message).await;
            assert_eq!(context.reply_excerpt, expected);
        }
    }

    #[tokio::test]
    async fn reply_excerpt_names_the_original_author() {
        let mut gateway = quiet_gateway();
        gateway
            .expect_fetch_message()
            .returning(|_, _| Ok(excerpt(500, "carol", "the original post")));

        let mut message = incoming();
        message.replied_to = Some((2, 500));
        let context = assemble(&gateway, &CommunityConfig::default(), &store(), &message).await;

        assert_eq!(context.reply_excerpt, r#"carol: "the original post""#);
    }

    #[tokio::test]
    async fn clipped_reply_excerpts_carry_a_marker() {
        let mut gateway = quiet_gateway();
        gateway
            .expect_fetch_message()
            .returning(|_, _| Ok(excerpt(500, "carol", &"y".repeat(250))));

        let mut message = incoming();
        message.replied_to = Some((2, 500));
        let context = assemble(&gateway, &CommunityConfig::default(), &store(), &message).await;

        assert_eq!(context.reply_excerpt, format!(r#"carol: "{}...""#, "y".repeat(200)));
    }

    #[tokio::test]
    async fn degraded_lookups_still_produce_a_context() {
        let mut gateway = MockChatGateway::new();
        gateway
            .expect_member_info()
            .returning(|_, _| Err(GatewayError::Forbidden));
        gateway
            .expect_channel_info()
            .returning(|_| Err(GatewayError::NotFound));
        gateway
            .expect_recent_history()
            .returning(|_, _, _| Err(GatewayError::Forbidden));

        let context = assemble(&gateway, &CommunityConfig::default(), &store(), &incoming()).await;

        assert_eq!(context.author_tier, RoleTier::Member);
        assert_eq!(context.channel_name, "channel-2");
        assert!(context.history.is_empty());
        assert_eq!(context.content, "hello");
    }

    #[tokio::test]
    async fn config_list_marks_channel_age_restricted() {
        let gateway = quiet_gateway();
        let config = CommunityConfig {
            nsfw_channel_ids: vec![2],
            ..CommunityConfig::default()
        };

        let context = assemble(&gateway, &config, &store(), &incoming()).await;
        assert!(context.age_restricted);
    }

    #[tokio::test]
    async fn rendered_prompt_carries_every_section() {
        let gateway = quiet_gateway();
        let context = assemble(&gateway, &CommunityConfig::default(), &store(), &incoming()).await;
        let prompt = context.render_prompt();

        assert!(prompt.contains("Channel: #general"));
        assert!(prompt.contains("Channel category: Text"));
        assert!(prompt.contains("Channel is age-restricted: No"));
        assert!(prompt.contains("Author: alice (Role: Member)"));
        assert!(prompt.contains("No prior infractions on record."));
        assert!(prompt.contains("Replied-to message: N/A (Not a reply)"));
        assert!(prompt.contains("Recent channel history (oldest first):\n(none)"));
        assert!(prompt.ends_with("Message to evaluate, sent by alice:\n\"hello\""));
    }
}

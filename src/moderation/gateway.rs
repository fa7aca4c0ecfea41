//! Platform gateway for the moderation pipeline.
//!
//! [`ChatGateway`] is the only seam through which the pipeline touches the
//! chat platform, so context assembly, enforcement, and notices can all be
//! exercised against a mock. [`SerenityGateway`] is the production
//! implementation over the serenity HTTP client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{self as serenity, ChannelId, GuildId, MessageId, RoleId, UserId};
use serenity::builder::{CreateEmbed, CreateMessage, GetMessages};
use tracing::debug;

use crate::moderation::error::GatewayError;

/// A fetched message, reduced to what context assembly needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageExcerpt {
    pub id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
}

/// Channel facts relevant to policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub category_name: Option<String>,
    /// The platform-level age restriction flag on the channel itself.
    pub age_restricted: bool,
}

/// The author's standing in the community, reduced to the booleans the role
/// tiers are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberInfo {
    pub is_owner: bool,
    pub is_admin: bool,
    pub can_manage_messages: bool,
    pub can_kick: bool,
    pub can_ban: bool,
    pub can_moderate: bool,
}

/// An in-platform moderator notice, rendered by the gateway as an embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModNotice {
    /// Plain-text line above the embed, used for role pings.
    pub content: Option<String>,
    pub title: String,
    pub body: String,
    pub color: u32,
    /// `(name, value, inline)` embed fields.
    pub fields: Vec<(String, String, bool)>,
}

/// Everything the pipeline asks of the chat platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Fetches a single message.
    async fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<MessageExcerpt, GatewayError>;

    /// Fetches up to `limit` messages posted before `before`, newest first.
    async fn recent_history(
        &self,
        channel_id: u64,
        before: u64,
        limit: u8,
    ) -> Result<Vec<MessageExcerpt>, GatewayError>;

    /// Looks up channel facts for policy evaluation.
    async fn channel_info(&self, channel_id: u64) -> Result<ChannelInfo, GatewayError>;

    /// Looks up a member's standing in the community.
    async fn member_info(&self, community_id: u64, user_id: u64)
    -> Result<MemberInfo, GatewayError>;

    /// Deletes a message.
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), GatewayError>;

    /// Times a member out until `until`.
    async fn timeout_member(
        &self,
        community_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), GatewayError>;

    /// Kicks a member with an audit-log reason.
    async fn kick_member(
        &self,
        community_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), GatewayError>;

    /// Bans a member, purging `purge_days` of their messages.
    async fn ban_member(
        &self,
        community_id: u64,
        user_id: u64,
        purge_days: u8,
        reason: &str,
    ) -> Result<(), GatewayError>;

    /// Sends a direct message.
    async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), GatewayError>;

    /// Posts a moderator notice to a channel.
    async fn post_notice(&self, channel_id: u64, notice: &ModNotice) -> Result<(), GatewayError>;
}

/// [`ChatGateway`] backed by the serenity HTTP client.
#[derive(Debug, Clone)]
pub struct SerenityGateway {
    http: Arc<serenity::Http>,
}

impl SerenityGateway {
    #[must_use]
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

fn excerpt_from(message: &serenity::Message) -> MessageExcerpt {
    MessageExcerpt {
        id: message.id.get(),
        author_id: message.author.id.get(),
        author_name: message.author.name.clone(),
        author_is_bot: message.author.bot,
        content: message.content.clone(),
    }
}

#[async_trait]
impl ChatGateway for SerenityGateway {
    async fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<MessageExcerpt, GatewayError> {
        let http = self.http.as_ref();
        let message = ChannelId::new(channel_id)
            .message(http, MessageId::new(message_id))
            .await
            .map_err(GatewayError::from)?;
        Ok(excerpt_from(&message))
    }

    async fn recent_history(
        &self,
        channel_id: u64,
        before: u64,
        limit: u8,
    ) -> Result<Vec<MessageExcerpt>, GatewayError> {
        let http = self.http.as_ref();
        let builder = GetMessages::new().before(MessageId::new(before)).limit(limit);
        let messages = ChannelId::new(channel_id)
            .messages(http, builder)
            .await
            .map_err(GatewayError::from)?;
        Ok(messages.iter().map(excerpt_from).collect())
    }

    async fn channel_info(&self, channel_id: u64) -> Result<ChannelInfo, GatewayError> {
        let http = self.http.as_ref();
        let channel = ChannelId::new(channel_id)
            .to_channel(http)
            .await
            .map_err(GatewayError::from)?;
        let Some(guild_channel) = channel.guild() else {
            return Ok(ChannelInfo {
                name: "direct-message".to_string(),
                category_name: None,
                age_restricted: false,
            });
        };

        let category_name = match guild_channel.parent_id {
            Some(parent_id) => parent_id
                .to_channel(http)
                .await
                .ok()
                .and_then(serenity::Channel::guild)
                .map(|parent| parent.name),
            None => None,
        };

        Ok(ChannelInfo {
            name: guild_channel.name,
            category_name,
            age_restricted: guild_channel.nsfw,
        })
    }

    async fn member_info(
        &self,
        community_id: u64,
        user_id: u64,
    ) -> Result<MemberInfo, GatewayError> {
        let http = self.http.as_ref();
        let guild_id = GuildId::new(community_id);
        let guild = guild_id
            .to_partial_guild(http)
            .await
            .map_err(GatewayError::from)?;
        let member = guild
            .member(http, UserId::new(user_id))
            .await
            .map_err(GatewayError::from)?;

        // The everyone role carries the guild's id.
        let mut permissions = guild
            .roles
            .get(&RoleId::new(community_id))
            .map(|role| role.permissions)
            .unwrap_or_default();
        for role_id in &member.roles {
            if let Some(role) = guild.roles.get(role_id) {
                permissions |= role.permissions;
            }
        }

        Ok(MemberInfo {
            is_owner: guild.owner_id == member.user.id,
            is_admin: permissions.administrator(),
            can_manage_messages: permissions.manage_messages(),
            can_kick: permissions.kick_members(),
            can_ban: permissions.ban_members(),
            can_moderate: permissions.moderate_members(),
        })
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), GatewayError> {
        let http = self.http.as_ref();
        ChannelId::new(channel_id)
            .delete_message(http, MessageId::new(message_id))
            .await
            .map_err(GatewayError::from)?;
        debug!(channel_id, message_id, "message deleted");
        Ok(())
    }

    async fn timeout_member(
        &self,
        community_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let http = self.http.as_ref();
        let guild = GuildId::new(community_id)
            .to_partial_guild(http)
            .await
            .map_err(GatewayError::from)?;
        let mut member = guild
            .member(http, UserId::new(user_id))
            .await
            .map_err(GatewayError::from)?;
        member
            .disable_communication_until_datetime(http, until.into())
            .await
            .map_err(GatewayError::from)?;
        debug!(community_id, user_id, %until, reason, "member timed out");
        Ok(())
    }

    async fn kick_member(
        &self,
        community_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let http = self.http.as_ref();
        let guild = GuildId::new(community_id)
            .to_partial_guild(http)
            .await
            .map_err(GatewayError::from)?;
        let member = guild
            .member(http, UserId::new(user_id))
            .await
            .map_err(GatewayError::from)?;
        member
            .kick_with_reason(http, reason)
            .await
            .map_err(GatewayError::from)?;
        debug!(community_id, user_id, reason, "member kicked");
        Ok(())
    }

    async fn ban_member(
        &self,
        community_id: u64,
        user_id: u64,
        purge_days: u8,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let http = self.http.as_ref();
        GuildId::new(community_id)
            .ban_with_reason(http, UserId::new(user_id), purge_days, reason)
            .await
            .map_err(GatewayError::from)?;
        debug!(community_id, user_id, purge_days, reason, "member banned");
        Ok(())
    }

    async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), GatewayError> {
        let http = self.http.as_ref();
        let channel = UserId::new(user_id)
            .create_dm_channel(http)
            .await
            .map_err(GatewayError::from)?;
        channel
            .id
            .say(http, content)
            .await
            .map_err(GatewayError::from)?;
        Ok(())
    }

    async fn post_notice(&self, channel_id: u64, notice: &ModNotice) -> Result<(), GatewayError> {
        let http = self.http.as_ref();
        let mut embed = CreateEmbed::new()
            .title(notice.title.as_str())
            .description(notice.body.as_str())
            .color(notice.color)
            .timestamp(serenity::Timestamp::now());
        for (name, value, inline) in &notice.fields {
            embed = embed.field(name.as_str(), value.as_str(), *inline);
        }
        let mut builder = CreateMessage::new().embed(embed);
        if let Some(content) = &notice.content {
            builder = builder.content(content.as_str());
        }
        ChannelId::new(channel_id)
            .send_message(http, builder)
            .await
            .map_err(GatewayError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_object_is_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SerenityGateway>();
        assert_send_sync::<Box<dyn ChatGateway>>();
    }
}

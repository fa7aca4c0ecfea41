use std::sync::Arc;

use poise::serenity_prelude::{self as serenity, Context, EventHandler, GuildId, Message, Ready};
use tracing::{debug, info, warn};

use crate::EVENT_TARGET;
use crate::data::Data;
use crate::moderation::{IncomingMessage, SerenityGateway};

pub struct Handler;

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! The bot is in {guild_count} guild(s)");
    }

    /// Called for every message the bot can see. Guild messages are handed
    /// to the moderation pipeline on a detached task so the gateway loop
    /// never waits on classifier or enforcement calls.
    async fn message(&self, ctx: Context, message: Message) {
        // Direct messages, bots, and blank content are not moderated.
        let Some(guild_id) = message.guild_id else {
            return;
        };
        if message.author.bot || message.content.trim().is_empty() {
            return;
        }

        let data = { ctx.data.read().await.get::<Data>().cloned() };
        let Some(data) = data else {
            warn!(
                target: EVENT_TARGET,
                "shared data missing from the context type map"
            );
            return;
        };

        let community_name = ctx
            .cache
            .guild(guild_id)
            .map_or_else(|| format!("guild {guild_id}"), |guild| guild.name.clone());
        let replied_to = message.message_reference.as_ref().and_then(|reference| {
            reference
                .message_id
                .map(|replied| (reference.channel_id.get(), replied.get()))
        });

        let incoming = IncomingMessage {
            community_id: guild_id.get(),
            community_name,
            channel_id: message.channel_id.get(),
            message_id: message.id.get(),
            author_id: message.author.id.get(),
            author_name: message.author.name.clone(),
            author_is_bot: message.author.bot,
            content: message.content.clone(),
            replied_to,
        };
        debug!(
            target: EVENT_TARGET,
            community_id = incoming.community_id,
            channel_id = incoming.channel_id,
            message_id = incoming.message_id,
            "dispatching message to the moderation pipeline"
        );

        let gateway = SerenityGateway::new(Arc::clone(&ctx.http));
        tokio::spawn(async move {
            data.moderation.process_message(&gateway, incoming).await;
        });
    }
}

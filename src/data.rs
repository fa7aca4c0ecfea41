use std::{ops::Deref, sync::Arc};

use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;

use crate::moderation::{
    AuditSink, ClassifierClient, ConfigStore, InfractionStore, ModerationService,
};

/// On-disk location of per-community moderation settings.
pub const CONFIG_FILE: &str = "data/guild_config.json";
/// On-disk location of per-user infraction histories.
pub const INFRACTIONS_FILE: &str = "data/user_infractions.json";

/// Centralized data structure for the bot. Clones are cheap and share
/// the same stores and pipeline.
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("configured_communities", &self.configs.len())
            .finish_non_exhaustive()
    }
}

/// Shared state behind the [`Data`] handle.
pub struct DataInner {
    pub configs: Arc<ConfigStore>,
    pub infractions: Arc<InfractionStore>,
    pub moderation: ModerationService,
}

impl Data {
    /// Loads persisted state from disk and assembles the moderation
    /// pipeline from the environment.
    ///
    /// # Errors
    /// Returns an error when an HTTP client cannot be constructed.
    pub async fn load() -> Result<Self, crate::Error> {
        let configs = Arc::new(ConfigStore::load(CONFIG_FILE).await);
        let infractions = Arc::new(InfractionStore::load(INFRACTIONS_FILE).await);
        let classifier = ClassifierClient::from_env()?;
        let audit = AuditSink::from_env()?;
        let moderation = ModerationService::new(
            Arc::clone(&configs),
            Arc::clone(&infractions),
            Box::new(classifier),
            audit,
        );
        Ok(Self(Arc::new(DataInner {
            configs,
            infractions,
            moderation,
        })))
    }
}

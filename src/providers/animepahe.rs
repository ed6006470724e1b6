use std::sync::Arc;
use tracing::debug;

use super::{
    ProviderAnime, ProviderKind, SourcesResponse, StreamLayout, StreamProvider,
    fetch_provider_anime, fetch_provider_episodes,
};
use crate::client::{MetadataClient, endpoint};
use crate::config::AnimepaheSettings;
use crate::error::Result;
use crate::proxy::ProxyPrefix;
use crate::types::{EpisodeList, SourceDescriptor, Translation};

/// AnimePahe serves one source per quality label. Dubbed episodes have their own ids, so the
/// version is read off the id rather than chosen by the viewer.
pub struct AnimePaheProvider {
    client: Arc<MetadataClient>,
    proxy: ProxyPrefix,
}

impl AnimePaheProvider {
    pub fn new(client: Arc<MetadataClient>, settings: &AnimepaheSettings) -> Self {
        Self {
            client,
            proxy: ProxyPrefix::new(settings.proxy.clone()),
        }
    }
}

/// Recent-release episode ids embed the AnimePahe anime id: `pahe-{id}-$session$-{session}`.
pub fn anime_id_from_episode(episode_id: &str) -> Option<&str> {
    let (head, _) = episode_id.split_once("-$session$-")?;
    let id = head.strip_prefix("pahe-").unwrap_or(head);
    (!id.is_empty()).then_some(id)
}

impl StreamProvider for AnimePaheProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AnimePahe
    }

    fn layout(&self) -> StreamLayout {
        StreamLayout::QualityVariants
    }

    fn proxy(&self) -> &ProxyPrefix {
        &self.proxy
    }

    fn version_for(&self, episode_id: &str, _requested: Translation) -> Translation {
        if episode_id.contains("dub") {
            Translation::Dub
        } else {
            Translation::Sub
        }
    }

    async fn fetch_episodes(&self, anime_id: &str) -> Result<EpisodeList> {
        fetch_provider_episodes(&self.client, self.kind(), anime_id).await
    }

    async fn fetch_anime(&self, provider_anime_id: &str) -> Result<ProviderAnime> {
        fetch_provider_anime(&self.client, self.kind(), provider_anime_id).await
    }

    async fn fetch_sources(
        &self,
        episode_id: &str,
        translation: Translation,
    ) -> Result<SourceDescriptor> {
        let version = self.version_for(episode_id, translation);
        let mut segments = vec!["api", "animepahe", "sources"];
        segments.extend(episode_id.split('/').filter(|s| !s.is_empty()));
        let url = endpoint(
            &self.client.api().kenjitsu,
            &segments,
            &[("version", version.as_str().to_string())],
        )?;
        debug!(episode_id, version = version.as_str(), "Fetching AnimePahe sources");
        let response: SourcesResponse = self.client.get_json(url).await?;
        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn version_follows_episode_id() {
        let settings = Settings::defaults().unwrap();
        let client = Arc::new(MetadataClient::new(settings.api.clone()).unwrap());
        let provider = AnimePaheProvider::new(client, &settings.providers.animepahe);
        assert_eq!(
            provider.version_for("abc-dub/ep-3", Translation::Sub),
            Translation::Dub
        );
        assert_eq!(provider.version_for("abc/ep-3", Translation::Dub), Translation::Sub);
    }

    #[test]
    fn anime_id_is_read_off_recent_episode_ids() {
        assert_eq!(anime_id_from_episode("pahe-5678-$session$-abc123"), Some("5678"));
        assert_eq!(anime_id_from_episode("5678-$session$-abc123"), Some("5678"));
        assert_eq!(anime_id_from_episode("abc/ep-3"), None);
        assert_eq!(anime_id_from_episode("pahe--$session$-x"), None);
    }
}

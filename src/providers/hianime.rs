use std::sync::Arc;
use tracing::debug;

use super::{
    ProviderAnime, ProviderKind, SourcesResponse, StreamLayout, StreamProvider,
    fetch_provider_anime, fetch_provider_episodes,
};
use crate::client::{MetadataClient, endpoint};
use crate::config::HianimeSettings;
use crate::error::Result;
use crate::proxy::ProxyPrefix;
use crate::types::{EpisodeList, SourceDescriptor, Translation};

/// HiAnime serves one adaptive manifest per episode and version, plus subtitle tracks and
/// intro/outro markers.
pub struct HiAnimeProvider {
    client: Arc<MetadataClient>,
    proxy: ProxyPrefix,
    server: String,
}

impl HiAnimeProvider {
    pub fn new(client: Arc<MetadataClient>, settings: &HianimeSettings) -> Self {
        Self {
            client,
            proxy: ProxyPrefix::new(settings.proxy.clone()),
            server: settings.server.clone(),
        }
    }
}

impl StreamProvider for HiAnimeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HiAnime
    }

    fn layout(&self) -> StreamLayout {
        StreamLayout::AdaptiveManifest
    }

    fn proxy(&self) -> &ProxyPrefix {
        &self.proxy
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
        // Episode ids carry their own query (`show-123?ep=456`); the whole id is one segment.
        let url = endpoint(
            &self.client.api().kenjitsu,
            &["api", "hianime", "sources", episode_id],
            &[
                ("version", translation.as_str().to_string()),
                ("server", self.server.clone()),
            ],
        )?;
        debug!(episode_id, version = translation.as_str(), "Fetching HiAnime sources");
        let response: SourcesResponse = self.client.get_json(url).await?;
        Ok(response.into())
    }
}

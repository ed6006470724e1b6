//! Source resolution: episode id + variant → the one stream the player should attach.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::providers::{StreamLayout, StreamProvider};
use crate::proxy::ProxyPrefix;
use crate::types::{SourceDescriptor, SubtitleTrack, TimeRange, Translation, VideoSource};

static QUALITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{3,4})\s*p\b").expect("quality pattern is valid"));

/// What the viewer asked for: a version and, for quality-variant providers, a quality.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Variant {
    pub translation: Translation,
    pub quality: Option<String>,
}

impl Variant {
    pub fn new(translation: Translation) -> Self {
        Self {
            translation,
            quality: None,
        }
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }
}

/// A fetched descriptor with exactly one source selected.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    episode_id: String,
    translation: Translation,
    descriptor: SourceDescriptor,
    selected: usize,
    subtitles: Vec<SubtitleTrack>,
    proxy: ProxyPrefix,
}

impl ResolvedSource {
    /// Selects a source from `descriptor` for `variant`. Fails when nothing is playable.
    pub fn new(
        episode_id: impl Into<String>,
        translation: Translation,
        descriptor: SourceDescriptor,
        layout: StreamLayout,
        variant: &Variant,
        quality_preference: &[String],
        proxy: ProxyPrefix,
    ) -> Result<Self> {
        let episode_id = episode_id.into();
        let selected = match layout {
            StreamLayout::AdaptiveManifest => descriptor
                .sources
                .iter()
                .position(|s| s.is_m3u8)
                .or_else(|| pick_quality(&descriptor.sources, variant, quality_preference)),
            StreamLayout::QualityVariants => {
                pick_quality(&descriptor.sources, variant, quality_preference)
            }
        }
        .ok_or_else(|| Error::NoPlayableSource {
            episode_id: episode_id.clone(),
        })?;
        let subtitles = descriptor.display_subtitles();
        Ok(Self {
            episode_id,
            translation,
            descriptor,
            selected,
            subtitles,
            proxy,
        })
    }

    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub fn translation(&self) -> Translation {
        self.translation
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn selected(&self) -> &VideoSource {
        &self.descriptor.sources[self.selected]
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn quality(&self) -> &str {
        self.selected().quality_label()
    }

    /// URL handed to the player, routed through the provider's proxy.
    pub fn stream_url(&self) -> String {
        self.proxy.wrap(&self.selected().url)
    }

    /// Adaptive manifests go through the streaming engine; anything else plays natively.
    pub fn is_adaptive(&self) -> bool {
        let source = self.selected();
        source.is_m3u8 || source.url.split('?').next().unwrap_or_default().ends_with(".m3u8")
    }

    /// Display subtitles, `thumbnails` removed.
    pub fn subtitles(&self) -> &[SubtitleTrack] {
        &self.subtitles
    }

    /// Language of the default-flagged track, else the first track.
    pub fn default_subtitle(&self) -> Option<&str> {
        pick_default_subtitle(&self.subtitles).map(|sub| sub.lang.as_str())
    }

    pub fn intro(&self) -> Option<TimeRange> {
        self.descriptor.intro
    }

    pub fn outro(&self) -> Option<TimeRange> {
        self.descriptor.outro
    }

    pub fn download(&self) -> Option<&str> {
        self.descriptor.download.as_deref()
    }

    /// Quality labels offered, highest first.
    pub fn qualities(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .descriptor
            .sources
            .iter()
            .map(|s| s.quality_label().to_string())
            .collect();
        labels.sort_by_key(|label| std::cmp::Reverse(quality_rank(label)));
        labels.dedup();
        labels
    }

    /// Same descriptor with the source labelled `quality` selected.
    pub fn select_quality(&self, quality: &str) -> Result<Self> {
        let selected = self
            .descriptor
            .sources
            .iter()
            .position(|s| s.quality_label() == quality)
            .ok_or_else(|| Error::UnknownQuality(quality.to_string()))?;
        Ok(Self {
            selected,
            ..self.clone()
        })
    }
}

/// Resolves playable sources through one provider.
pub struct SourceResolver<P> {
    provider: P,
    quality_preference: Vec<String>,
}

impl<P: StreamProvider> SourceResolver<P> {
    pub fn new(provider: P, quality_preference: Vec<String>) -> Self {
        Self {
            provider,
            quality_preference,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn resolve(&self, episode_id: &str, variant: &Variant) -> Result<ResolvedSource> {
        let translation = self.provider.version_for(episode_id, variant.translation);
        let descriptor = self.provider.fetch_sources(episode_id, translation).await?;
        debug!(
            episode_id,
            sources = descriptor.sources.len(),
            subtitles = descriptor.subtitles.len(),
            "Sources fetched"
        );
        let resolved = ResolvedSource::new(
            episode_id,
            translation,
            descriptor,
            self.provider.layout(),
            variant,
            &self.quality_preference,
            self.provider.proxy().clone(),
        )?;
        info!(
            episode_id,
            provider = %self.provider.kind(),
            version = translation.as_str(),
            quality = resolved.quality(),
            "Source resolved"
        );
        Ok(resolved)
    }
}

/// Requested quality if offered, else the first preferred label present, else the first source.
pub fn pick_quality(
    sources: &[VideoSource],
    variant: &Variant,
    preference: &[String],
) -> Option<usize> {
    if sources.is_empty() {
        return None;
    }
    variant
        .quality
        .iter()
        .chain(preference.iter())
        .find_map(|wanted| sources.iter().position(|s| s.quality_label() == wanted))
        .or(Some(0))
}

pub fn pick_default_subtitle(subtitles: &[SubtitleTrack]) -> Option<&SubtitleTrack> {
    subtitles
        .iter()
        .filter(|sub| !sub.is_thumbnails())
        .find(|sub| sub.default)
        .or_else(|| subtitles.iter().find(|sub| !sub.is_thumbnails()))
}

/// Sort key for quality labels; `auto` outranks everything.
pub fn quality_rank(label: &str) -> i32 {
    if label.eq_ignore_ascii_case("auto") {
        return 10_000;
    }
    QUALITY_RE
        .captures(label)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0)
}

//! Pass-through proxies for HLS manifests and poster images.
//!
//! Upstream CDNs reject requests without the provider's Referer, so stream and image URLs
//! are routed through a proxy that takes the target as a percent-encoded `url` parameter.

use url::form_urlencoded::byte_serialize;

pub const IMAGE_PROXY: &str = "https://animepahe-pi.vercel.app/api/proxy/image?url=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPrefix {
    prefix: String,
}

impl ProxyPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.prefix.trim().is_empty()
    }

    /// Routes `target` through the proxy. An empty prefix leaves the URL untouched, and a
    /// URL that is already proxied is not wrapped twice.
    pub fn wrap(&self, target: &str) -> String {
        if self.is_passthrough() || target.starts_with(&self.prefix) {
            return target.to_string();
        }
        format!("{}{}", self.prefix, encode_component(target))
    }
}

/// Proxied poster URL, optionally resized to `width` pixels.
pub fn image_url(image: &str, width: Option<u32>) -> String {
    if image.is_empty() {
        return String::new();
    }
    let mut url = ProxyPrefix::new(IMAGE_PROXY).wrap(image);
    if let Some(width) = width {
        url.push_str(&format!("&w={width}&fit=cover"));
    }
    url
}

pub fn encode_component(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

//! animehub: anime catalog browsing and a provider-agnostic playback controller.

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod generation;
pub mod meta;
pub mod player;
pub mod providers;
pub mod proxy;
pub mod resolver;
pub mod route;
pub mod search;
pub mod types;

pub use client::MetadataClient;
pub use config::Settings;
pub use error::{Error, Result};
pub use resolver::{ResolvedSource, SourceResolver, Variant};

//! Per-theme texture metadata.
//!
//! A `GeoSceneTexture` is loaded once when a theme is loaded and is read-only
//! afterwards; the theme description parser lives outside this crate and
//! hands us the deserialized value.

use crate::core::geo::{theme_hash, TileId};
use crate::core::projection::TextureProjection;
use crate::tiles::addressing::TileGrid;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How tiles of a theme are laid out below `<cache root>/<theme id>/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLayout {
    /// `<level>/<y>/<y>_<x>.<ext>` with zero padded indices
    Marble,
    /// `<level>/<x>/<y>.<ext>`
    OpenStreetMap,
    /// Template with `{level}`, `{x}`, `{y}` and `{ext}` placeholders
    Custom(String),
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::Marble
    }
}

/// What the download is for; bulk region downloads get their own budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadUsage {
    Browse,
    Bulk,
}

/// Maximum concurrent connections to one host for one usage class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPolicy {
    pub host: String,
    pub usage: DownloadUsage,
    pub max_connections: usize,
}

/// Role of a texture in the merged tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendingRole {
    Base,
    Clouds,
    CityLights,
}

impl Default for BlendingRole {
    fn default() -> Self {
        Self::Base
    }
}

/// Static metadata of one texture layer of a map theme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoSceneTexture {
    pub theme_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_extension")]
    pub file_extension: String,
    pub level_zero_columns: u32,
    pub level_zero_rows: u32,
    #[serde(default = "default_tile_size")]
    pub tile_width: u32,
    #[serde(default = "default_tile_size")]
    pub tile_height: u32,
    #[serde(default)]
    pub projection: TextureProjection,
    #[serde(default)]
    pub storage_layout: StorageLayout,
    #[serde(default)]
    pub max_tile_level: Option<u32>,
    /// Tiles older than this are considered expired and reloaded
    #[serde(default)]
    pub expire_secs: Option<u64>,
    #[serde(default)]
    pub role: BlendingRole,
    #[serde(default)]
    pub download_urls: UrlRoundRobin,
    #[serde(default)]
    pub download_policies: Vec<DownloadPolicy>,
}

fn default_extension() -> String {
    "jpg".to_string()
}

fn default_tile_size() -> u32 {
    crate::core::constants::DEFAULT_TILE_SIZE
}

impl GeoSceneTexture {
    /// Creates metadata for an equirectangular theme without download urls
    pub fn new(theme_id: impl Into<String>, level_zero_columns: u32, level_zero_rows: u32) -> Self {
        let theme_id = theme_id.into();
        Self {
            name: theme_id.clone(),
            theme_id,
            file_extension: default_extension(),
            level_zero_columns,
            level_zero_rows,
            tile_width: default_tile_size(),
            tile_height: default_tile_size(),
            projection: TextureProjection::Equirectangular,
            storage_layout: StorageLayout::Marble,
            max_tile_level: None,
            expire_secs: None,
            role: BlendingRole::Base,
            download_urls: UrlRoundRobin::default(),
            download_policies: Vec::new(),
        }
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn with_projection(mut self, projection: TextureProjection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_role(mut self, role: BlendingRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.file_extension = ext.into();
        self
    }

    pub fn with_download_urls(mut self, urls: Vec<String>) -> Self {
        self.download_urls = UrlRoundRobin::new(urls);
        self
    }

    pub fn with_policy(mut self, policy: DownloadPolicy) -> Self {
        self.download_policies.push(policy);
        self
    }

    /// Parses texture metadata from its JSON description
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Stable hash used as the theme component of tile ids
    pub fn theme_hash(&self) -> u64 {
        theme_hash(&self.theme_id)
    }

    /// Id of the tile at `(level, x, y)` in this texture
    pub fn tile_id(&self, level: u32, x: i32, y: i32) -> TileId {
        TileId::new(self.theme_hash(), level, x, y)
    }

    pub fn grid(&self) -> TileGrid {
        TileGrid::new(
            self.level_zero_columns,
            self.level_zero_rows,
            self.tile_width,
            self.tile_height,
            self.projection,
        )
    }

    pub fn expiry(&self) -> Option<Duration> {
        self.expire_secs.map(Duration::from_secs)
    }

    /// Path of a tile relative to the cache root
    pub fn relative_tile_path(&self, id: &TileId) -> PathBuf {
        let mut path = PathBuf::from(&self.theme_id);
        match &self.storage_layout {
            StorageLayout::Marble => {
                path.push(id.level.to_string());
                path.push(format!("{:06}", id.y));
                path.push(format!("{:06}_{:06}.{}", id.y, id.x, self.file_extension));
            }
            StorageLayout::OpenStreetMap => {
                path.push(id.level.to_string());
                path.push(id.x.to_string());
                path.push(format!("{}.{}", id.y, self.file_extension));
            }
            StorageLayout::Custom(template) => {
                path.push(self.expand_template(template, id));
            }
        }
        path
    }

    /// Download url of a tile, taking the next template from the pool
    pub fn tile_url(&self, id: &TileId) -> Option<String> {
        self.download_urls
            .next_url()
            .map(|template| self.expand_template(template, id))
    }

    /// Connection limit for a host, if a policy was configured
    pub fn max_connections(&self, host: &str, usage: DownloadUsage) -> Option<usize> {
        self.download_policies
            .iter()
            .find(|policy| policy.host == host && policy.usage == usage)
            .map(|policy| policy.max_connections)
    }

    fn expand_template(&self, template: &str, id: &TileId) -> String {
        template
            .replace("{zoomLevel}", &id.level.to_string())
            .replace("{level}", &id.level.to_string())
            .replace("{x}", &id.x.to_string())
            .replace("{y}", &id.y.to_string())
            .replace("{ext}", &self.file_extension)
    }
}

/// Cycles through the download url templates of a texture.
///
/// The cursor is an atomic counter so any number of download workers may
/// ask for urls concurrently.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct UrlRoundRobin {
    urls: Vec<String>,
    cursor: AtomicUsize,
}

impl UrlRoundRobin {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns the next url template, cycling through the pool
    pub fn next_url(&self) -> Option<&str> {
        if self.urls.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.urls.len();
        Some(&self.urls[index])
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl Clone for UrlRoundRobin {
    fn clone(&self) -> Self {
        Self::new(self.urls.clone())
    }
}

impl From<Vec<String>> for UrlRoundRobin {
    fn from(urls: Vec<String>) -> Self {
        Self::new(urls)
    }
}

impl From<UrlRoundRobin> for Vec<String> {
    fn from(pool: UrlRoundRobin) -> Self {
        pool.urls
    }
}

/// Host component of an url, used to look up download policies.
pub fn url_host(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority);
    host.split(':').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_marble_layout_path() {
        let texture = GeoSceneTexture::new("earth/bluemarble", 2, 1);
        let id = texture.tile_id(3, 5, 2);
        let path = texture.relative_tile_path(&id);
        assert_eq!(
            path,
            PathBuf::from("earth/bluemarble/3/000002/000002_000005.jpg")
        );
    }

    #[test]
    fn test_osm_and_custom_layouts() {
        let mut texture = GeoSceneTexture::new("earth/osm", 1, 1).with_extension("png");
        texture.storage_layout = StorageLayout::OpenStreetMap;
        let id = texture.tile_id(4, 7, 9);
        assert_eq!(texture.relative_tile_path(&id), PathBuf::from("earth/osm/4/7/9.png"));

        texture.storage_layout = StorageLayout::Custom("z{level}-{x}-{y}.{ext}".into());
        assert_eq!(
            texture.relative_tile_path(&id),
            PathBuf::from("earth/osm/z4-7-9.png")
        );
    }

    #[test]
    fn test_round_robin_cycles() {
        let texture = GeoSceneTexture::new("earth/osm", 1, 1).with_download_urls(vec![
            "https://a.example.org/{zoomLevel}/{x}/{y}.png".into(),
            "https://b.example.org/{zoomLevel}/{x}/{y}.png".into(),
        ]);
        let id = texture.tile_id(1, 0, 1);
        assert_eq!(texture.tile_url(&id).unwrap(), "https://a.example.org/1/0/1.png");
        assert_eq!(texture.tile_url(&id).unwrap(), "https://b.example.org/1/0/1.png");
        assert_eq!(texture.tile_url(&id).unwrap(), "https://a.example.org/1/0/1.png");
    }

    #[test]
    fn test_round_robin_is_shared_across_threads() {
        let pool = Arc::new(UrlRoundRobin::new(vec!["a".into(), "b".into()]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    (0..100).filter(|_| pool.next_url() == Some("a")).count()
                })
            })
            .collect();
        let a_count: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(a_count, 200);
    }

    #[test]
    fn test_texture_from_json() {
        let texture = GeoSceneTexture::from_json_str(
            r#"{
                "theme_id": "earth/clouds",
                "level_zero_columns": 2,
                "level_zero_rows": 1,
                "role": "clouds",
                "download_urls": ["http://tiles.example.org/{level}/{x}/{y}.jpg"],
                "download_policies": [
                    { "host": "tiles.example.org", "usage": "browse", "max_connections": 2 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(texture.role, BlendingRole::Clouds);
        assert_eq!(texture.tile_width, 675);
        assert_eq!(texture.download_urls.len(), 1);
        assert_eq!(texture.max_connections("tiles.example.org", DownloadUsage::Browse), Some(2));
        assert_eq!(texture.max_connections("tiles.example.org", DownloadUsage::Bulk), None);
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("https://a.tile.example.org:8080/1/2/3.png"), "a.tile.example.org");
        assert_eq!(url_host("http://user@host/x"), "host");
        assert_eq!(url_host("plainhost/path"), "plainhost");
    }
}

//! Network side of tile loading: the fetcher abstraction and per-host
//! connection limits.

use crate::tiles::texture::DownloadUsage;
use crate::{MapError, Result};
use fxhash::FxHashMap;
use std::sync::{Arc, Condvar, Mutex};

/// Anything that can turn a tile url into encoded tile bytes.
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Shared blocking HTTP client with a custom User-Agent so that public tile
/// servers don't reject the request. Building the client once avoids the
/// cost of TLS and connection pool setup for every tile.
#[cfg(feature = "http")]
pub(crate) static HTTP_CLIENT: once_cell::sync::Lazy<Option<reqwest::blocking::Client>> =
    once_cell::sync::Lazy::new(|| {
        reqwest::blocking::Client::builder()
            .user_agent(concat!("tessera/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| log::error!("failed to build HTTP client: {}", e))
            .ok()
    });

/// Fetches tiles over HTTP(S).
#[cfg(feature = "http")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpFetcher;

#[cfg(feature = "http")]
impl TileFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let client = HTTP_CLIENT
            .as_ref()
            .ok_or_else(|| MapError::Fetch("HTTP client unavailable".into()))?;
        let response = client.get(url).send()?;
        if !response.status().is_success() {
            return Err(MapError::Fetch(format!("HTTP {} for {}", response.status(), url)));
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Fetcher for offline setups; every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFetcher;

impl TileFetcher for OfflineFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        Err(MapError::Fetch(format!("offline, not fetching {}", url)))
    }
}

/// Default number of connections to a host that has no policy.
pub const DEFAULT_HOST_CONNECTIONS: usize = 2;

/// Hard ceiling for any download policy.
pub const MAX_HOST_CONNECTIONS: usize = 16;

#[derive(Debug)]
struct Slot {
    in_use: usize,
    max: usize,
}

/// Counting semaphores per `(host, usage)` enforcing download policies.
#[derive(Debug, Default)]
pub struct HostSlots {
    slots: Mutex<FxHashMap<(String, DownloadUsage), Slot>>,
    freed: Condvar,
}

impl HostSlots {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks until a connection to `host` is available and returns a guard
    /// releasing it on drop.
    pub fn acquire(self: &Arc<Self>, host: &str, usage: DownloadUsage, max: usize) -> SlotGuard {
        debug_assert!(
            (1..=MAX_HOST_CONNECTIONS).contains(&max),
            "download policy for {} allows {} connections",
            host,
            max
        );
        let key = (host.to_string(), usage);
        let max = max.clamp(1, MAX_HOST_CONNECTIONS);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let slot = slots.entry(key.clone()).or_insert(Slot { in_use: 0, max });
            slot.max = max;
            if slot.in_use < slot.max {
                slot.in_use += 1;
                break;
            }
            slots = self.freed.wait(slots).unwrap_or_else(|e| e.into_inner());
        }
        SlotGuard {
            owner: Arc::clone(self),
            key,
        }
    }

    /// Connections currently open to `host`
    pub fn in_use(&self, host: &str, usage: DownloadUsage) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(&(host.to_string(), usage))
            .map(|slot| slot.in_use)
            .unwrap_or(0)
    }

    fn release(&self, key: &(String, DownloadUsage)) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(key) {
            slot.in_use = slot.in_use.saturating_sub(1);
        }
        self.freed.notify_all();
    }
}

/// Releases a host connection slot when dropped.
#[derive(Debug)]
pub struct SlotGuard {
    owner: Arc<HostSlots>,
    key: (String, DownloadUsage),
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.owner.release(&self.key);
    }
}

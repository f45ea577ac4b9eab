//! Tile fetching on top of the scheduler.
//!
//! A [`TileSource`] lives on the coordinator. It submits fetch calls for tiles
//! it doesn't hold yet, routes their completions into its [`TileCache`] and
//! answers render nodes asking whether a tile is usable in the current pass.

mod cache;
mod client;
mod http;

use std::borrow::Cow;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::core::{CallId, Payload, SharedRegion, TileKey};
use crate::error::{CallError, ScheduleError};
use crate::scheduler::{Completion, Scheduler};

pub use cache::{CacheEntry, TileBytes, TileCache, TileStatus};
pub use client::{
    FETCH_TILE, FetchTileProcedure, FileSourceClient, MemorySourceClient, SourceClient,
    register_source,
};
pub use http::{HttpClient, HttpSourceClient, ReqwestClient, TileScheme};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory served by a [`FileSourceClient`]. When unset, the fetch
    /// procedure has to be registered by hand.
    pub root: Option<Utf8PathBuf>,
    /// File extension of tiles under `root`.
    pub extension: String,
    /// URL template with `{z}`, `{x}` and `{y}` placeholders served by an
    /// [`HttpSourceClient`]. Ignored when `root` is set.
    pub url: Option<String>,
    /// Row numbering used by the server behind `url`.
    pub scheme: TileScheme,
    /// Timeout of a single HTTP request.
    pub timeout_secs: u64,
    /// Pending fetches older than this many passes fail with
    /// [`CallError::Timeout`]. Unset means fetches never time out.
    pub max_pending_passes: Option<u64>,
    /// Upper bound on cached tiles, enforced by evicting least recently used
    /// settled entries.
    pub max_entries: Option<usize>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: None,
            extension: "pbf".into(),
            url: None,
            scheme: TileScheme::Xyz,
            timeout_secs: 30,
            max_pending_passes: None,
            max_entries: None,
        }
    }
}

/// Answer to [`TileSource::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileRequest {
    Ready(TileBytes),
    /// The tile is being fetched under this call.
    Pending(CallId),
    /// The fetch failed. Every request in the first pass that asks after
    /// the failure gets this answer, the next pass retries.
    Failed(CallError),
}

pub struct TileSource {
    cache: TileCache,
    procedure: Cow<'static, str>,
    max_pending_passes: Option<u64>,
    max_entries: Option<usize>,
    pass: u64,
}

impl TileSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            cache: TileCache::new(),
            procedure: Cow::Borrowed(FETCH_TILE),
            max_pending_passes: config.max_pending_passes,
            max_entries: config.max_entries,
            pass: 0,
        }
    }

    /// Uses a procedure other than [`FETCH_TILE`] for fetching.
    pub fn with_procedure(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.procedure = name.into();
        self
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TileCache {
        &mut self.cache
    }

    pub fn pass(&self) -> u64 {
        self.pass
    }

    /// Sets the pass that requests and completions are attributed to.
    pub fn begin_pass(&mut self, pass: u64) {
        self.pass = pass;
    }

    /// Ensures a fetch for `key` exists and returns the call producing it.
    ///
    /// A pending or ready tile is not fetched again, the id of the call that
    /// produced it is returned instead. A failed tile is fetched anew.
    pub fn fetch(&mut self, scheduler: &mut Scheduler, key: TileKey) -> Result<CallId, ScheduleError> {
        if let Some(entry) = self.cache.get(&key) {
            if !matches!(entry.status(), TileStatus::Failed(_)) {
                let call_id = entry.call_id();
                self.cache.touch(&key, self.pass);
                return Ok(call_id);
            }
        }

        self.submit(scheduler, key)
    }

    fn submit(&mut self, scheduler: &mut Scheduler, key: TileKey) -> Result<CallId, ScheduleError> {
        let call_id = scheduler.submit(&self.procedure, Payload::Inline(key.to_bytes().to_vec()))?;
        self.cache.begin(key, call_id, self.pass);
        tracing::debug!("fetching tile {} as call {}", key, call_id);
        Ok(call_id)
    }

    pub fn lookup(&self, key: &TileKey) -> Option<&CacheEntry> {
        self.cache.get(key)
    }

    /// What a render node gets when it needs `key` in the current pass.
    ///
    /// Starts a fetch when the tile is unknown. A failure is reported to every
    /// request of the first pass that asks for the tile after it settled, no
    /// matter how long ago that was. A request in any later pass retries.
    pub fn request(&mut self, scheduler: &mut Scheduler, key: TileKey) -> Result<TileRequest, ScheduleError> {
        let status = self.cache.get(&key).map(|entry| entry.status().clone());
        let answer = match status {
            None => None,
            Some(TileStatus::Pending(call_id)) => Some(TileRequest::Pending(call_id)),
            Some(TileStatus::Ready(bytes)) => Some(TileRequest::Ready(bytes)),
            Some(TileStatus::Failed(error)) => match self.cache.report(&key, self.pass) {
                Some(reported) if reported == self.pass => Some(TileRequest::Failed(error)),
                _ => None,
            },
        };

        match answer {
            Some(answer) => {
                self.cache.touch(&key, self.pass);
                Ok(answer)
            }
            None => self.submit(scheduler, key).map(TileRequest::Pending),
        }
    }

    /// Routes a completion into the cache. Completions of calls this source
    /// isn't waiting for are handed back untouched.
    pub fn complete(&mut self, completion: Completion, region: &SharedRegion) -> Result<TileKey, Completion> {
        let Some(key) = self.cache.key_for(completion.call_id) else {
            return Err(completion);
        };

        let Completion { call_id, result } = completion;
        let bytes = result.and_then(|payload| {
            payload
                .into_bytes(region)
                .map_err(|e| CallError::Procedure(e.into()))
        });
        let status = match bytes {
            Ok(bytes) => TileStatus::Ready(TileBytes::new(bytes)),
            Err(error) => TileStatus::Failed(error),
        };

        self.cache.resolve(call_id, status, self.pass);
        tracing::debug!("tile {} settled by call {}", key, call_id);
        Ok(key)
    }

    /// Fails fetches that have been pending for too many passes and cancels
    /// their calls. Returns the affected keys.
    pub fn expire(&mut self, scheduler: &mut Scheduler) -> Vec<TileKey> {
        let Some(max_passes) = self.max_pending_passes else {
            return Vec::new();
        };

        let overdue = self.cache.overdue(self.pass, max_passes);
        for (key, call_id) in &overdue {
            scheduler.cancel(*call_id);
            let timeout = TileStatus::Failed(CallError::Timeout { passes: max_passes });
            self.cache.resolve(*call_id, timeout, self.pass);
            tracing::warn!("fetch of tile {} timed out after {} passes", key, max_passes);
        }

        overdue.into_iter().map(|(key, _)| key).collect()
    }

    /// Evicts least recently used settled tiles above the configured capacity.
    /// Pending tiles and tiles used in the current pass are never evicted.
    pub fn enforce_capacity(&mut self) -> Vec<TileKey> {
        let Some(max_entries) = self.max_entries else {
            return Vec::new();
        };

        let excess = self.cache.len().saturating_sub(max_entries);
        let victims: Vec<TileKey> = self
            .cache
            .eviction_candidates(self.pass)
            .into_iter()
            .take(excess)
            .collect();

        for key in &victims {
            self.cache.evict(key);
        }
        if !victims.is_empty() {
            tracing::debug!("evicted {} tiles", victims.len());
        }

        victims
    }
}

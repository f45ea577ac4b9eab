use std::collections::HashMap;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::{Payload, TileKey};
use crate::error::{ProcedureError, SourceFetchError};
use crate::scheduler::{Procedure, ProcedureContext, ProcedureTable};

/// Name under which the tile fetching procedure is registered.
pub const FETCH_TILE: &str = "fetch_tile";

/// Blocking access to raw tile bytes. Runs on worker threads.
pub trait SourceClient: Send + Sync + 'static {
    fn fetch(&self, key: &TileKey) -> Result<Vec<u8>, SourceFetchError>;
}

/// Reads tiles from a `{root}/{z}/{x}/{y}.{extension}` directory tree.
#[derive(Debug, Clone)]
pub struct FileSourceClient {
    root: Utf8PathBuf,
    extension: String,
}

impl FileSourceClient {
    pub fn new(root: impl Into<Utf8PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path_for(&self, key: &TileKey) -> Utf8PathBuf {
        self.root
            .join(key.zoom.to_string())
            .join(key.x.to_string())
            .join(format!("{}.{}", key.y, self.extension))
    }
}

impl SourceClient for FileSourceClient {
    fn fetch(&self, key: &TileKey) -> Result<Vec<u8>, SourceFetchError> {
        if !key.is_valid() {
            return Err(SourceFetchError::InvalidKey(*key));
        }

        std::fs::read(self.path_for(key)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SourceFetchError::NotFound(*key),
            _ => SourceFetchError::Transport {
                key: *key,
                reason: e.to_string(),
            },
        })
    }
}

/// In-memory tile set, mostly useful for tests and fixtures.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceClient {
    tiles: HashMap<TileKey, Vec<u8>>,
    failures: HashMap<TileKey, String>,
}

impl MemorySourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile(mut self, key: TileKey, bytes: impl Into<Vec<u8>>) -> Self {
        self.tiles.insert(key, bytes.into());
        self
    }

    /// Makes fetching `key` fail with a transport error.
    pub fn with_failure(mut self, key: TileKey, reason: impl Into<String>) -> Self {
        self.failures.insert(key, reason.into());
        self
    }
}

impl SourceClient for MemorySourceClient {
    fn fetch(&self, key: &TileKey) -> Result<Vec<u8>, SourceFetchError> {
        if !key.is_valid() {
            return Err(SourceFetchError::InvalidKey(*key));
        }
        if let Some(reason) = self.failures.get(key) {
            return Err(SourceFetchError::Transport {
                key: *key,
                reason: reason.clone(),
            });
        }

        self.tiles
            .get(key)
            .cloned()
            .ok_or(SourceFetchError::NotFound(*key))
    }
}

/// Worker-side procedure: decodes a [`TileKey`] and returns the tile bytes.
pub struct FetchTileProcedure<C> {
    client: C,
}

impl<C: SourceClient> FetchTileProcedure<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: SourceClient> Procedure for FetchTileProcedure<C> {
    fn call(&self, context: &ProcedureContext<'_>, payload: Payload) -> Result<Payload, ProcedureError> {
        let bytes = context.bytes(&payload)?;
        let key = TileKey::from_bytes(&bytes)
            .ok_or_else(|| ProcedureError::InvalidInput(format!("{} bytes is not a tile key", bytes.len())))?;

        let data = self.client.fetch(&key)?;
        tracing::debug!("worker {} fetched tile {} ({} bytes)", context.slot(), key, data.len());

        Ok(Payload::Inline(data))
    }
}

/// Registers a [`FetchTileProcedure`] for `client` under [`FETCH_TILE`].
pub fn register_source<C: SourceClient>(table: &mut ProcedureTable, client: C) -> &mut ProcedureTable {
    table.register(FETCH_TILE, FetchTileProcedure::new(client))
}

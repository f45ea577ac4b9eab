use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::RegionError;

/// Identifier of a single asynchronous procedure call.
///
/// Ids are handed out by the [`Scheduler`](crate::Scheduler) starting at 1 and
/// strictly increase for the lifetime of the scheduler, so an id is never
/// reused for a different call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(u64);

impl CallId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value of this id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Address of a tile in the XYZ tiling scheme.
///
/// Keys are ordered by zoom level first, then by column and row, which keeps
/// the tiles of one zoom level together in ordered collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    /// Deepest zoom level a key can address.
    pub const MAX_ZOOM: u8 = 30;

    /// Size of the wire representation produced by [`TileKey::to_bytes`].
    pub const ENCODED_LEN: usize = 9;

    pub const fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Whether the column and row fit in the `2^zoom` grid of this zoom level.
    pub fn is_valid(&self) -> bool {
        if self.zoom > Self::MAX_ZOOM {
            return false;
        }

        let size = 1u64 << self.zoom;
        u64::from(self.x) < size && u64::from(self.y) < size
    }

    /// Renders the key as a quadkey string, one base-4 digit per zoom level.
    ///
    /// Returns `None` for keys that are not [valid](TileKey::is_valid).
    pub fn quadkey(&self) -> Option<String> {
        if !self.is_valid() {
            return None;
        }

        let mut acc = String::with_capacity(self.zoom as usize);
        for level in (1..=self.zoom).rev() {
            let mask = 1u32 << (level - 1);
            let mut digit = b'0';
            if self.x & mask != 0 {
                digit += 1;
            }
            if self.y & mask != 0 {
                digit += 2;
            }
            acc.push(digit as char);
        }

        Some(acc)
    }

    /// Fixed-size little-endian encoding used as the payload of tile fetches.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0] = self.zoom;
        out[1..5].copy_from_slice(&self.x.to_le_bytes());
        out[5..9].copy_from_slice(&self.y.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; Self::ENCODED_LEN] = bytes.try_into().ok()?;
        let x = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let y = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        Some(Self::new(bytes[0], x, y))
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// A 32-byte BLAKE3 digest.
///
/// Used to fingerprint tile contents, so that stages consuming tiles can tell
/// whether the data they uploaded in an earlier pass is still current.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    /// Combines many digests into one, order sensitive.
    pub fn combine<'a>(digests: impl IntoIterator<Item = &'a Hash32>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for digest in digests {
            hasher.update(&digest.0);
        }
        hasher.finalize().into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Location of a byte range inside the [`SharedRegion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionSlice {
    pub block: u32,
    pub offset: u32,
    pub len: u32,
}

impl RegionSlice {
    pub const fn new(block: u32, offset: u32, len: u32) -> Self {
        Self { block, offset, len }
    }

    /// Byte range inside the block, `None` if its end overflows `usize`.
    fn range(&self) -> Option<std::ops::Range<usize>> {
        let start = self.offset as usize;
        let end = start.checked_add(self.len as usize)?;
        Some(start..end)
    }
}

/// Memory shared between the coordinator and every worker.
///
/// The region is split into fixed-size blocks that are locked independently.
/// Calls pass [`RegionSlice`]s instead of copying bytes through the channel.
/// Keeping concurrent calls on disjoint slices is up to the caller; the
/// scheduler never checks it.
#[derive(Clone)]
pub struct SharedRegion {
    blocks: Arc<[RwLock<Box<[u8]>>]>,
    block_size: usize,
}

impl SharedRegion {
    pub fn new(blocks: usize, block_size: usize) -> Self {
        let blocks = (0..blocks)
            .map(|_| RwLock::new(vec![0u8; block_size].into_boxed_slice()))
            .collect();

        Self { blocks, block_size }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn check(
        &self,
        slice: RegionSlice,
    ) -> Result<(&RwLock<Box<[u8]>>, std::ops::Range<usize>), RegionError> {
        let block = self
            .blocks
            .get(slice.block as usize)
            .ok_or(RegionError::OutOfBounds(slice))?;

        match slice.range() {
            Some(range) if range.end <= self.block_size => Ok((block, range)),
            _ => Err(RegionError::OutOfBounds(slice)),
        }
    }

    /// Copies `data` into the region at `slice`. The slice length must match.
    pub fn write(&self, slice: RegionSlice, data: &[u8]) -> Result<(), RegionError> {
        if data.len() != slice.len as usize {
            return Err(RegionError::LengthMismatch {
                slice,
                len: data.len(),
            });
        }

        let (block, range) = self.check(slice)?;
        let mut guard = block
            .write()
            .map_err(|_| RegionError::Poisoned(slice.block))?;
        guard[range].copy_from_slice(data);

        Ok(())
    }

    pub fn read(&self, slice: RegionSlice) -> Result<Vec<u8>, RegionError> {
        let (block, range) = self.check(slice)?;
        let guard = block
            .read()
            .map_err(|_| RegionError::Poisoned(slice.block))?;

        Ok(guard[range].to_vec())
    }
}

impl fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("blocks", &self.blocks.len())
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// Argument or result of a procedure call.
///
/// The scheduler and the channel never look inside a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Bytes carried inside the message itself.
    Inline(Vec<u8>),
    /// Bytes living in the [`SharedRegion`], passed by reference.
    Shared(RegionSlice),
}

impl Payload {
    pub fn empty() -> Self {
        Payload::Inline(Vec::new())
    }

    pub fn as_inline(&self) -> Option<&[u8]> {
        match self {
            Payload::Inline(bytes) => Some(bytes),
            Payload::Shared(_) => None,
        }
    }

    /// Returns the payload bytes, reading them from `region` when shared.
    pub fn resolve<'a>(&'a self, region: &SharedRegion) -> Result<Cow<'a, [u8]>, RegionError> {
        match self {
            Payload::Inline(bytes) => Ok(Cow::Borrowed(bytes)),
            Payload::Shared(slice) => region.read(*slice).map(Cow::Owned),
        }
    }

    /// Like [`Payload::resolve`], but takes ownership to avoid a copy of inline bytes.
    pub fn into_bytes(self, region: &SharedRegion) -> Result<Vec<u8>, RegionError> {
        match self {
            Payload::Inline(bytes) => Ok(bytes),
            Payload::Shared(slice) => region.read(slice),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Inline(value)
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Inline(value.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_key_validity() {
        assert!(TileKey::new(0, 0, 0).is_valid());
        assert!(TileKey::new(2, 3, 3).is_valid());
        assert!(!TileKey::new(2, 4, 0).is_valid());
        assert!(!TileKey::new(31, 0, 0).is_valid());
    }

    #[test]
    fn test_quadkey() {
        assert_eq!(TileKey::new(0, 0, 0).quadkey().as_deref(), Some(""));
        assert_eq!(TileKey::new(3, 3, 5).quadkey().as_deref(), Some("213"));
        assert_eq!(TileKey::new(1, 2, 0).quadkey(), None);
    }

    #[test]
    fn test_tile_key_bytes() {
        let key = TileKey::new(14, 8_712, 5_627);
        assert_eq!(TileKey::from_bytes(&key.to_bytes()), Some(key));
        assert_eq!(TileKey::from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn test_shared_region_bounds() {
        let region = SharedRegion::new(2, 16);

        let slice = RegionSlice::new(1, 4, 3);
        region.write(slice, b"abc").unwrap();
        assert_eq!(region.read(slice).unwrap(), b"abc");

        let past_end = RegionSlice::new(1, 14, 4);
        assert_eq!(
            region.read(past_end),
            Err(RegionError::OutOfBounds(past_end))
        );

        let no_block = RegionSlice::new(2, 0, 1);
        assert_eq!(
            region.write(no_block, b"x"),
            Err(RegionError::OutOfBounds(no_block))
        );
    }

    #[test]
    fn test_shared_region_rejects_bad_lengths() {
        let region = SharedRegion::new(1, 16);

        let slice = RegionSlice::new(0, 0, 4);
        assert_eq!(
            region.write(slice, b"toolong"),
            Err(RegionError::LengthMismatch { slice, len: 7 })
        );
        assert_eq!(region.read(slice).unwrap(), vec![0; 4]);

        let huge = RegionSlice::new(0, u32::MAX, u32::MAX);
        assert_eq!(region.read(huge), Err(RegionError::OutOfBounds(huge)));
    }

    #[test]
    fn test_payload_resolve() {
        let region = SharedRegion::new(1, 8);
        region.write(RegionSlice::new(0, 2, 2), b"hi").unwrap();

        let shared = Payload::Shared(RegionSlice::new(0, 2, 2));
        assert_eq!(shared.resolve(&region).unwrap().as_ref(), b"hi");

        let inline = Payload::from(&b"yo"[..]);
        let bytes = inline.resolve(&region).unwrap();
        assert!(matches!(bytes, Cow::Borrowed(_)));
        assert_eq!(bytes.as_ref(), b"yo");
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Hash32::hash(b"tile");
        let b = Hash32::hash(b"tile");
        assert_eq!(a, b);
        assert_ne!(Hash32::combine([&a, &b]), Hash32::combine([&a]));
        assert_eq!(a.to_hex().len(), 64);
    }
}

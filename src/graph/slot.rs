use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::core::{Hash32, TileKey};
use crate::gpu::{BufferId, TextureId};
use crate::source::TileBytes;

/// A tile that was ready when a pass read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyTile {
    pub key: TileKey,
    pub bytes: TileBytes,
}

/// A batch of ready tiles passed between nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileData {
    tiles: Arc<[ReadyTile]>,
    digest: Hash32,
}

impl TileData {
    pub fn new(tiles: Vec<ReadyTile>) -> Self {
        let digests: Vec<Hash32> = tiles.iter().map(|tile| tile.bytes.digest()).collect();
        Self {
            tiles: tiles.into(),
            digest: Hash32::combine(&digests),
        }
    }

    pub fn tiles(&self) -> &[ReadyTile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Total size of all tile payloads.
    pub fn byte_len(&self) -> usize {
        self.tiles.iter().map(|tile| tile.bytes.len()).sum()
    }

    /// Digest over every tile digest, in order.
    pub fn digest(&self) -> Hash32 {
        self.digest
    }
}

/// Value held by a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Buffer(BufferId),
    Texture(TextureId),
    TileData(TileData),
}

impl SlotValue {
    pub fn slot_type(&self) -> SlotType {
        match self {
            SlotValue::Buffer(_) => SlotType::Buffer,
            SlotValue::Texture(_) => SlotType::Texture,
            SlotValue::TileData(_) => SlotType::TileData,
        }
    }
}

impl From<BufferId> for SlotValue {
    fn from(value: BufferId) -> Self {
        SlotValue::Buffer(value)
    }
}

impl From<TextureId> for SlotValue {
    fn from(value: TextureId) -> Self {
        SlotValue::Texture(value)
    }
}

impl From<TileData> for SlotValue {
    fn from(value: TileData) -> Self {
        SlotValue::TileData(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotType {
    Buffer,
    Texture,
    TileData,
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotType::Buffer => "Buffer",
            SlotType::Texture => "Texture",
            SlotType::TileData => "TileData",
        };

        f.write_str(s)
    }
}

/// Refers to a slot either by position or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotLabel {
    Index(usize),
    Name(Cow<'static, str>),
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotLabel::Index(index) => write!(f, "#{index}"),
            SlotLabel::Name(name) => write!(f, "'{name}'"),
        }
    }
}

impl From<&SlotLabel> for SlotLabel {
    fn from(value: &SlotLabel) -> Self {
        value.clone()
    }
}

impl From<String> for SlotLabel {
    fn from(value: String) -> Self {
        SlotLabel::Name(value.into())
    }
}

impl From<&'static str> for SlotLabel {
    fn from(value: &'static str) -> Self {
        SlotLabel::Name(value.into())
    }
}

impl From<Cow<'static, str>> for SlotLabel {
    fn from(value: Cow<'static, str>) -> Self {
        SlotLabel::Name(value)
    }
}

impl From<usize> for SlotLabel {
    fn from(value: usize) -> Self {
        SlotLabel::Index(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: Cow<'static, str>,
    pub slot_type: SlotType,
}

impl SlotInfo {
    pub fn new(name: impl Into<Cow<'static, str>>, slot_type: SlotType) -> Self {
        Self {
            name: name.into(),
            slot_type,
        }
    }
}

/// The ordered slots on one side of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotInfos {
    slots: Vec<SlotInfo>,
}

impl<T: IntoIterator<Item = SlotInfo>> From<T> for SlotInfos {
    fn from(slots: T) -> Self {
        Self {
            slots: slots.into_iter().collect(),
        }
    }
}

impl SlotInfos {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Position and description of the slot `label` refers to.
    pub fn find(&self, label: impl Into<SlotLabel>) -> Option<(usize, &SlotInfo)> {
        let index = match label.into() {
            SlotLabel::Index(index) => index,
            SlotLabel::Name(name) => self.slots.iter().position(|slot| slot.name == name)?,
        };
        self.slots.get(index).map(|slot| (index, slot))
    }

    pub fn get_slot(&self, label: impl Into<SlotLabel>) -> Option<&SlotInfo> {
        self.find(label).map(|(_, slot)| slot)
    }

    pub fn get_slot_index(&self, label: impl Into<SlotLabel>) -> Option<usize> {
        self.find(label).map(|(index, _)| index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotInfo> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_lookup() {
        let slots = SlotInfos::from(vec![
            SlotInfo::new("tiles", SlotType::TileData),
            SlotInfo::new("target", SlotType::Texture),
        ]);

        assert_eq!(slots.get_slot_index("target"), Some(1));
        assert_eq!(slots.get_slot_index(0), Some(0));
        assert_eq!(slots.get_slot_index(2), None);
        assert_eq!(slots.get_slot("missing"), None);
        assert_eq!(slots.get_slot(0).map(|slot| slot.slot_type), Some(SlotType::TileData));
    }

    #[test]
    fn test_tile_data_digest_tracks_contents() {
        let tile = |byte: u8| ReadyTile {
            key: TileKey::new(1, 0, 0),
            bytes: TileBytes::new(vec![byte]),
        };

        let a = TileData::new(vec![tile(1), tile(2)]);
        let b = TileData::new(vec![tile(1), tile(2)]);
        let c = TileData::new(vec![tile(1), tile(3)]);

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.byte_len(), 2);
    }
}

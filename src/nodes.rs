//! Stock render nodes: request tiles, upload them, draw them.
//!
//! A typical frame graph chains them as
//! `TileRequestNode -> UploadNode -> DrawNode`, connected through the slot
//! names exported here.

use std::borrow::Cow;
use std::cell::Cell;

use crate::core::{Hash32, TileKey};
use crate::error::NodeRunError;
use crate::gpu::{BufferId, Extent, StageSubmission, TextureId};
use crate::graph::{
    Node, ReadyTile, RenderContext, RenderGraphContext, SlotInfo, SlotType, SlotValue, TileData,
};
use crate::source::TileRequest;

pub const TILES: &str = "tiles";
pub const BUFFER: &str = "buffer";
pub const TARGET: &str = "target";

/// Makes a fixed set of tiles available to the rest of the graph.
///
/// Defers while any tile is still being fetched and fails when a fetch
/// failed in this pass. Only when every tile is ready does it write
/// [`TILES`].
pub struct TileRequestNode {
    keys: Vec<TileKey>,
}

impl TileRequestNode {
    pub fn new(keys: impl IntoIterator<Item = TileKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn keys(&self) -> &[TileKey] {
        &self.keys
    }
}

impl Node for TileRequestNode {
    fn output(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new(TILES, SlotType::TileData)]
    }

    fn run(
        &self,
        graph: &mut RenderGraphContext<'_>,
        context: &mut RenderContext<'_>,
    ) -> Result<(), NodeRunError> {
        let mut ready = Vec::with_capacity(self.keys.len());
        let mut failed = None;

        // every key is requested, so one failure doesn't hold back the rest
        for &key in &self.keys {
            match context.request_tile(key)? {
                TileRequest::Ready(bytes) => ready.push(ReadyTile { key, bytes }),
                TileRequest::Pending(call_id) => graph.defer(call_id),
                TileRequest::Failed(source) => {
                    failed.get_or_insert(NodeRunError::TileUnavailable { key, source });
                }
            }
        }

        if let Some(error) = failed {
            return Err(error);
        }

        if !graph.is_deferred() {
            graph.set_output(TILES, TileData::new(ready))?;
        }

        Ok(())
    }
}

/// Copies tile data into a GPU buffer. Unchanged data is not uploaded again.
#[derive(Default)]
pub struct UploadNode {
    uploaded: Cell<Option<(Hash32, BufferId)>>,
}

impl UploadNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Node for UploadNode {
    fn input(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new(TILES, SlotType::TileData)]
    }

    fn output(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new(BUFFER, SlotType::Buffer)]
    }

    fn run(
        &self,
        graph: &mut RenderGraphContext<'_>,
        context: &mut RenderContext<'_>,
    ) -> Result<(), NodeRunError> {
        let tiles = graph.get_input_tile_data(TILES)?.clone();

        let buffer = match self.uploaded.get() {
            Some((digest, buffer)) if digest == tiles.digest() => buffer,
            _ => {
                let size = tiles.byte_len().max(1) as u64;
                let buffer = context.gpu.create_buffer("tiles", size)?;
                context.gpu.execute(StageSubmission {
                    label: "upload",
                    reads: &[SlotValue::TileData(tiles.clone())],
                    writes: &[SlotValue::Buffer(buffer)],
                })?;

                tracing::debug!("uploaded {} tiles into buffer {}", tiles.len(), buffer);
                self.uploaded.set(Some((tiles.digest(), buffer)));
                buffer
            }
        };

        graph.set_output(BUFFER, buffer)?;
        Ok(())
    }
}

/// Draws an uploaded buffer into a render target it owns.
pub struct DrawNode {
    extent: Extent,
    target: Cell<Option<TextureId>>,
}

impl DrawNode {
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            target: Cell::new(None),
        }
    }
}

impl Node for DrawNode {
    fn input(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new(BUFFER, SlotType::Buffer)]
    }

    fn output(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new(TARGET, SlotType::Texture)]
    }

    fn run(
        &self,
        graph: &mut RenderGraphContext<'_>,
        context: &mut RenderContext<'_>,
    ) -> Result<(), NodeRunError> {
        let buffer = graph.get_input_buffer(BUFFER)?;

        let target = match self.target.get() {
            Some(target) => target,
            None => {
                let target = context.gpu.create_texture("target", self.extent)?;
                self.target.set(Some(target));
                target
            }
        };

        context.gpu.execute(StageSubmission {
            label: "draw",
            reads: &[SlotValue::Buffer(buffer)],
            writes: &[SlotValue::Texture(target)],
        })?;

        graph.set_output(TARGET, target)?;
        Ok(())
    }
}

/// Forwards its inputs to a sub-graph and runs it.
pub struct SubGraphDriverNode {
    sub_graph: Cow<'static, str>,
    inputs: Vec<SlotInfo>,
}

impl SubGraphDriverNode {
    pub fn new(sub_graph: impl Into<Cow<'static, str>>, inputs: Vec<SlotInfo>) -> Self {
        Self {
            sub_graph: sub_graph.into(),
            inputs,
        }
    }
}

impl Node for SubGraphDriverNode {
    fn input(&self) -> Vec<SlotInfo> {
        self.inputs.clone()
    }

    fn sub_graphs(&self) -> Vec<Cow<'static, str>> {
        vec![self.sub_graph.clone()]
    }

    fn run(
        &self,
        graph: &mut RenderGraphContext<'_>,
        _context: &mut RenderContext<'_>,
    ) -> Result<(), NodeRunError> {
        let inputs = graph.inputs().to_vec();
        graph.run_sub_graph(self.sub_graph.clone(), inputs)?;
        Ok(())
    }
}

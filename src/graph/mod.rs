//! Render graph: nodes connected by typed slots, run once per pass.

mod context;
mod node;
mod render_graph;
mod runner;
mod slot;

pub use context::{RenderContext, RenderGraphContext};
pub use node::{Edge, EmptyNode, GraphInputNode, Node, NodeId, NodeLabel, NodeState};
pub use render_graph::{INPUT_NODE_NAME, RenderGraph};
pub use runner::{NodeFailure, NodeStatus, PassReport, RenderGraphRunner};
pub use slot::{ReadyTile, SlotInfo, SlotInfos, SlotLabel, SlotType, SlotValue, TileData};

use std::borrow::Cow;
use std::fmt;

use petgraph::graph::NodeIndex;

use crate::error::NodeRunError;
use crate::graph::{RenderContext, RenderGraphContext, SlotInfo, SlotInfos};

/// Stable handle of a node inside its graph.
pub type NodeId = NodeIndex;

/// A stage of the render graph.
///
/// Nodes declare their input and output slots up front; the runner only calls
/// [`Node::run`] once every input slot holds a value for the current pass, and
/// expects every output slot to be written before `run` returns `Ok`.
pub trait Node: 'static {
    fn input(&self) -> Vec<SlotInfo> {
        Vec::new()
    }

    fn output(&self) -> Vec<SlotInfo> {
        Vec::new()
    }

    /// Names of the sub-graphs this node may run. Checked when the graph is
    /// validated, so a node can only run sub-graphs it declares.
    fn sub_graphs(&self) -> Vec<Cow<'static, str>> {
        Vec::new()
    }

    fn run(
        &self,
        graph: &mut RenderGraphContext<'_>,
        context: &mut RenderContext<'_>,
    ) -> Result<(), NodeRunError>;
}

/// Connection between two nodes. Slot edges carry a value, node edges only
/// order their ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    SlotEdge {
        output_node: NodeId,
        output_index: usize,
        input_node: NodeId,
        input_index: usize,
    },
    NodeEdge {
        output_node: NodeId,
        input_node: NodeId,
    },
}

impl Edge {
    pub fn input_node(&self) -> NodeId {
        match self {
            Edge::SlotEdge { input_node, .. } | Edge::NodeEdge { input_node, .. } => *input_node,
        }
    }

    pub fn output_node(&self) -> NodeId {
        match self {
            Edge::SlotEdge { output_node, .. } | Edge::NodeEdge { output_node, .. } => *output_node,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeLabel {
    Id(NodeId),
    Name(Cow<'static, str>),
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeLabel::Id(id) => write!(f, "#{}", id.index()),
            NodeLabel::Name(name) => write!(f, "'{name}'"),
        }
    }
}

impl From<&NodeLabel> for NodeLabel {
    fn from(value: &NodeLabel) -> Self {
        value.clone()
    }
}

impl From<String> for NodeLabel {
    fn from(value: String) -> Self {
        NodeLabel::Name(value.into())
    }
}

impl From<&'static str> for NodeLabel {
    fn from(value: &'static str) -> Self {
        NodeLabel::Name(value.into())
    }
}

impl From<Cow<'static, str>> for NodeLabel {
    fn from(value: Cow<'static, str>) -> Self {
        NodeLabel::Name(value)
    }
}

impl From<NodeId> for NodeLabel {
    fn from(value: NodeId) -> Self {
        NodeLabel::Id(value)
    }
}

/// A node together with everything the graph knows about it.
pub struct NodeState {
    pub id: NodeId,
    pub name: Cow<'static, str>,
    pub type_name: &'static str,
    pub node: Box<dyn Node>,
    pub input_slots: SlotInfos,
    pub output_slots: SlotInfos,
    pub sub_graphs: Vec<Cow<'static, str>>,
}

impl fmt::Debug for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeState")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl NodeState {
    pub(crate) fn new<T: Node>(id: NodeId, name: Cow<'static, str>, node: T) -> Self {
        Self {
            id,
            name,
            type_name: std::any::type_name::<T>(),
            input_slots: node.input().into(),
            output_slots: node.output().into(),
            sub_graphs: node.sub_graphs(),
            node: Box::new(node),
        }
    }
}

/// Does nothing. Useful as an ordering anchor for node edges.
pub struct EmptyNode;

impl Node for EmptyNode {
    fn run(
        &self,
        _graph: &mut RenderGraphContext<'_>,
        _context: &mut RenderContext<'_>,
    ) -> Result<(), NodeRunError> {
        Ok(())
    }
}

/// Exposes the values a graph was run with as output slots.
pub struct GraphInputNode {
    pub(crate) inputs: Vec<SlotInfo>,
}

impl Node for GraphInputNode {
    fn input(&self) -> Vec<SlotInfo> {
        self.inputs.clone()
    }

    fn output(&self) -> Vec<SlotInfo> {
        self.inputs.clone()
    }

    fn run(
        &self,
        graph: &mut RenderGraphContext<'_>,
        _context: &mut RenderContext<'_>,
    ) -> Result<(), NodeRunError> {
        for (index, value) in graph.inputs().to_vec().into_iter().enumerate() {
            graph.set_output(index, value)?;
        }
        Ok(())
    }
}

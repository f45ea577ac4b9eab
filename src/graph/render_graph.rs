use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt;
use std::ptr;

use petgraph::Direction;
use petgraph::graph::Graph;
use petgraph::visit::EdgeRef;

use crate::error::RenderGraphError;
use crate::graph::{Edge, GraphInputNode, Node, NodeId, NodeLabel, NodeState, SlotInfo, SlotLabel};

pub const INPUT_NODE_NAME: &str = "GraphInputNode";

/// A set of render nodes connected by slot and ordering edges.
///
/// Nodes live in an arena and are addressed by [`NodeId`]; they can't be
/// removed, so ids stay valid for the lifetime of the graph. Every edge is
/// checked when it is added, which keeps the graph acyclic at all times.
///
/// ```
/// use chizu::graph::{EmptyNode, RenderGraph};
///
/// let mut graph = RenderGraph::new();
/// graph.add_node("a", EmptyNode).unwrap();
/// graph.add_node("b", EmptyNode).unwrap();
/// graph.add_node_edge("a", "b").unwrap();
///
/// assert!(graph.add_node_edge("b", "a").is_err());
/// ```
#[derive(Default)]
pub struct RenderGraph {
    graph: Graph<NodeState, Edge>,
    names: HashMap<Cow<'static, str>, NodeId>,
    sub_graphs: BTreeMap<Cow<'static, str>, RenderGraph>,
    input_node: Option<NodeId>,
    order: Vec<NodeId>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the inputs of this graph. They are exposed to other nodes as
    /// the outputs of a node named [`INPUT_NODE_NAME`].
    pub fn set_input(&mut self, inputs: Vec<SlotInfo>) -> Result<NodeId, RenderGraphError> {
        if self.input_node.is_some() {
            return Err(RenderGraphError::InputNodeAlreadySet);
        }

        let id = self.add_node(INPUT_NODE_NAME, GraphInputNode { inputs })?;
        self.input_node = Some(id);
        Ok(id)
    }

    pub fn input_node(&self) -> Option<&NodeState> {
        self.input_node.map(|id| &self.graph[id])
    }

    pub fn add_node<T: Node>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        node: T,
    ) -> Result<NodeId, RenderGraphError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(RenderGraphError::DuplicateNode(name));
        }

        let id = NodeId::new(self.graph.node_count());
        let inserted = self.graph.add_node(NodeState::new(id, name.clone(), node));
        debug_assert_eq!(id, inserted);

        self.names.insert(name, id);
        self.compute_order();
        Ok(id)
    }

    pub fn get_node_id(&self, label: impl Into<NodeLabel>) -> Result<NodeId, RenderGraphError> {
        match label.into() {
            NodeLabel::Id(id) if id.index() < self.graph.node_count() => Ok(id),
            NodeLabel::Name(name) => self
                .names
                .get(&name)
                .copied()
                .ok_or(RenderGraphError::InvalidNode(NodeLabel::Name(name))),
            label => Err(RenderGraphError::InvalidNode(label)),
        }
    }

    pub fn get_node_state(&self, label: impl Into<NodeLabel>) -> Result<&NodeState, RenderGraphError> {
        let id = self.get_node_id(label)?;
        Ok(&self.graph[id])
    }

    /// Feeds `output_slot` of one node into `input_slot` of another.
    pub fn add_slot_edge(
        &mut self,
        output_node: impl Into<NodeLabel>,
        output_slot: impl Into<SlotLabel>,
        input_node: impl Into<NodeLabel>,
        input_slot: impl Into<SlotLabel>,
    ) -> Result<(), RenderGraphError> {
        let output_slot = output_slot.into();
        let input_slot = input_slot.into();
        let output_node = self.get_node_id(output_node)?;
        let input_node = self.get_node_id(input_node)?;

        let output_index = self.graph[output_node]
            .output_slots
            .get_slot_index(&output_slot)
            .ok_or(RenderGraphError::InvalidOutputNodeSlot(output_slot))?;
        let input_index = self.graph[input_node]
            .input_slots
            .get_slot_index(&input_slot)
            .ok_or(RenderGraphError::InvalidInputNodeSlot(input_slot))?;

        let edge = Edge::SlotEdge {
            output_node,
            output_index,
            input_node,
            input_index,
        };

        self.validate_edge(&edge)?;
        self.graph.add_edge(output_node, input_node, edge);
        self.compute_order();
        Ok(())
    }

    /// Makes `input_node` run after `output_node` without passing a value.
    pub fn add_node_edge(
        &mut self,
        output_node: impl Into<NodeLabel>,
        input_node: impl Into<NodeLabel>,
    ) -> Result<(), RenderGraphError> {
        let output_node = self.get_node_id(output_node)?;
        let input_node = self.get_node_id(input_node)?;

        let edge = Edge::NodeEdge {
            output_node,
            input_node,
        };

        self.validate_edge(&edge)?;
        self.graph.add_edge(output_node, input_node, edge);
        self.compute_order();
        Ok(())
    }

    fn validate_edge(&self, edge: &Edge) -> Result<(), RenderGraphError> {
        if self.has_edge(edge) {
            return Err(RenderGraphError::EdgeAlreadyExists(*edge));
        }

        if let Edge::SlotEdge {
            output_node,
            output_index,
            input_node,
            input_index,
        } = *edge
        {
            if let Some(occupied_by) = self.iter_node_inputs(input_node).find_map(|e| match *e {
                Edge::SlotEdge {
                    output_node,
                    input_index: index,
                    ..
                } if index == input_index => Some(output_node),
                _ => None,
            }) {
                return Err(RenderGraphError::NodeInputSlotAlreadyOccupied {
                    node: input_node,
                    input_slot: input_index,
                    occupied_by,
                });
            }

            let output_type = self.graph[output_node]
                .output_slots
                .get_slot(output_index)
                .ok_or(RenderGraphError::InvalidOutputNodeSlot(output_index.into()))?
                .slot_type;
            let input_type = self.graph[input_node]
                .input_slots
                .get_slot(input_index)
                .ok_or(RenderGraphError::InvalidInputNodeSlot(input_index.into()))?
                .slot_type;
            if output_type != input_type {
                return Err(RenderGraphError::MismatchedNodeSlots {
                    output_node,
                    output_slot: output_index,
                    output_type,
                    input_node,
                    input_slot: input_index,
                    input_type,
                });
            }
        }

        // a path back from the target means the new edge closes a loop
        let (from, to) = (edge.output_node(), edge.input_node());
        if petgraph::algo::has_path_connecting(&self.graph, to, from, None) {
            return Err(RenderGraphError::Cyclic(*edge));
        }

        Ok(())
    }

    pub fn has_edge(&self, edge: &Edge) -> bool {
        self.iter_node_inputs(edge.input_node()).any(|e| e == edge)
    }

    /// Incoming edges of a node.
    pub fn iter_node_inputs(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.graph
            .edges_directed(id, Direction::Incoming)
            .map(|edge| edge.weight())
    }

    /// Outgoing edges of a node.
    pub fn iter_node_outputs(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.graph
            .edges_directed(id, Direction::Outgoing)
            .map(|edge| edge.weight())
    }

    /// Nodes in declaration order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.graph.node_weights()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn add_sub_graph(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        graph: RenderGraph,
    ) -> Result<(), RenderGraphError> {
        let name = name.into();
        if self.sub_graphs.contains_key(&name) {
            return Err(RenderGraphError::DuplicateSubGraph(name));
        }

        self.sub_graphs.insert(name, graph);
        Ok(())
    }

    pub fn get_sub_graph(&self, name: &str) -> Option<&RenderGraph> {
        self.sub_graphs.get(name)
    }

    pub fn iter_sub_graphs(&self) -> impl Iterator<Item = (&str, &RenderGraph)> {
        self.sub_graphs
            .iter()
            .map(|(name, graph)| (name.as_ref(), graph))
    }

    /// Order in which a pass visits the nodes: topological, with ties going
    /// to the node declared first.
    pub fn execution_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Kahn's algorithm over a min-heap of ready node ids.
    fn compute_order(&mut self) {
        let mut in_degree = vec![0usize; self.graph.node_count()];
        for edge in self.graph.raw_edges() {
            in_degree[edge.target().index()] += 1;
        }

        let mut ready: BinaryHeap<Reverse<NodeId>> = self
            .graph
            .node_indices()
            .filter(|id| in_degree[id.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for edge in self.graph.edges_directed(id, Direction::Outgoing) {
                let target = edge.target();
                in_degree[target.index()] -= 1;
                if in_degree[target.index()] == 0 {
                    ready.push(Reverse(target));
                }
            }
        }

        self.order = order;
    }

    /// Checks the whole graph tree: every input slot outside input nodes is
    /// connected, every declared sub-graph resolves, and no sub-graph ends
    /// up running itself.
    pub fn validate(&self) -> Result<(), RenderGraphError> {
        self.validate_scope(Cow::Borrowed("<root>"), &[])
    }

    fn validate_scope<'g>(
        &'g self,
        name: Cow<'static, str>,
        ancestors: &[&'g RenderGraph],
    ) -> Result<(), RenderGraphError> {
        for node in self.iter_nodes() {
            if Some(node.id) == self.input_node {
                continue;
            }

            for (index, slot) in node.input_slots.iter().enumerate() {
                let connected = self.iter_node_inputs(node.id).any(|edge| {
                    matches!(edge, Edge::SlotEdge { input_index, .. } if *input_index == index)
                });
                if !connected {
                    return Err(RenderGraphError::UnconnectedNodeInputSlot {
                        node: node.name.clone(),
                        input_slot: slot.name.clone(),
                    });
                }
            }

            for sub_graph in &node.sub_graphs {
                if resolve_sub_graph(self, ancestors, sub_graph).is_none() {
                    return Err(RenderGraphError::UnknownSubGraph {
                        node: node.name.clone(),
                        sub_graph: sub_graph.clone(),
                    });
                }
            }
        }

        let mut path = vec![(name, self)];
        check_invocations(self, ancestors, &mut path)?;

        let mut scope = ancestors.to_vec();
        scope.push(self);
        for (name, sub_graph) in &self.sub_graphs {
            sub_graph.validate_scope(name.clone(), &scope)?;
        }

        Ok(())
    }
}

impl std::ops::Index<NodeId> for RenderGraph {
    type Output = NodeState;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.graph[index]
    }
}

/// Finds the sub-graph `name` as seen from `graph`: its own sub-graphs first,
/// then those of its ancestors, innermost first. Returns the sub-graph along
/// with its own chain of ancestors.
pub(crate) fn resolve_sub_graph<'g>(
    graph: &'g RenderGraph,
    ancestors: &[&'g RenderGraph],
    name: &str,
) -> Option<(&'g RenderGraph, Vec<&'g RenderGraph>)> {
    if let Some(found) = graph.sub_graphs.get(name) {
        let mut chain = ancestors.to_vec();
        chain.push(graph);
        return Some((found, chain));
    }

    for depth in (0..ancestors.len()).rev() {
        if let Some(found) = ancestors[depth].sub_graphs.get(name) {
            return Some((found, ancestors[..=depth].to_vec()));
        }
    }

    None
}

/// Follows every sub-graph invocation reachable from `graph`, failing when a
/// graph already on the invocation path, or an enclosing graph, is invoked.
fn check_invocations<'g>(
    graph: &'g RenderGraph,
    ancestors: &[&'g RenderGraph],
    path: &mut Vec<(Cow<'static, str>, &'g RenderGraph)>,
) -> Result<(), RenderGraphError> {
    for node in graph.iter_nodes() {
        for name in &node.sub_graphs {
            let Some((target, chain)) = resolve_sub_graph(graph, ancestors, name) else {
                continue;
            };

            let on_path = path.iter().any(|(_, seen)| ptr::eq(*seen, target));
            let enclosing = ptr::eq(graph, target)
                || ancestors.iter().any(|outer| ptr::eq(*outer, target));
            if on_path || enclosing {
                let mut names: Vec<Cow<'static, str>> =
                    path.iter().map(|(name, _)| name.clone()).collect();
                names.push(name.clone());
                return Err(RenderGraphError::CyclicSubGraph { path: names });
            }

            path.push((name.clone(), target));
            check_invocations(target, &chain, path)?;
            path.pop();
        }
    }

    Ok(())
}

/// Renders the graph as a Mermaid flowchart.
impl fmt::Display for RenderGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for node in self.iter_nodes() {
            writeln!(f, "    n{}[\"{}\"]", node.id.index(), node.name)?;
        }

        for edge in self.graph.raw_edges() {
            match edge.weight {
                Edge::SlotEdge {
                    output_node,
                    output_index,
                    input_node,
                    input_index,
                } => {
                    let from = &self.graph[output_node].output_slots;
                    let to = &self.graph[input_node].input_slots;
                    let label = match (from.get_slot(output_index), to.get_slot(input_index)) {
                        (Some(a), Some(b)) => format!("{} -> {}", a.name, b.name),
                        _ => String::new(),
                    };
                    writeln!(
                        f,
                        "    n{} -->|{}| n{}",
                        output_node.index(),
                        label,
                        input_node.index()
                    )?;
                }
                Edge::NodeEdge {
                    output_node,
                    input_node,
                } => {
                    writeln!(f, "    n{} -.-> n{}", output_node.index(), input_node.index())?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeRunError;
    use crate::graph::{EmptyNode, RenderContext, RenderGraphContext, SlotType};

    struct TestNode {
        inputs: Vec<SlotInfo>,
        outputs: Vec<SlotInfo>,
        sub_graphs: Vec<Cow<'static, str>>,
    }

    impl TestNode {
        fn new(inputs: usize, outputs: usize) -> Self {
            Self {
                inputs: (0..inputs)
                    .map(|i| SlotInfo::new(format!("in_{i}"), SlotType::Buffer))
                    .collect(),
                outputs: (0..outputs)
                    .map(|i| SlotInfo::new(format!("out_{i}"), SlotType::Buffer))
                    .collect(),
                sub_graphs: Vec::new(),
            }
        }

        fn running(name: &'static str) -> Self {
            Self {
                sub_graphs: vec![Cow::Borrowed(name)],
                ..Self::new(0, 0)
            }
        }
    }

    impl Node for TestNode {
        fn input(&self) -> Vec<SlotInfo> {
            self.inputs.clone()
        }

        fn output(&self) -> Vec<SlotInfo> {
            self.outputs.clone()
        }

        fn sub_graphs(&self) -> Vec<Cow<'static, str>> {
            self.sub_graphs.clone()
        }

        fn run(
            &self,
            _: &mut RenderGraphContext<'_>,
            _: &mut RenderContext<'_>,
        ) -> Result<(), NodeRunError> {
            Ok(())
        }
    }

    fn names(graph: &RenderGraph) -> Vec<&str> {
        graph
            .execution_order()
            .iter()
            .map(|id| graph[*id].name.as_ref())
            .collect()
    }

    #[test]
    fn test_duplicate_node() {
        let mut graph = RenderGraph::new();
        graph.add_node("a", EmptyNode).unwrap();
        assert_eq!(
            graph.add_node("a", EmptyNode),
            Err(RenderGraphError::DuplicateNode("a".into()))
        );
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let mut graph = RenderGraph::new();
        graph.add_node("c", TestNode::new(1, 0)).unwrap();
        graph.add_node("a", TestNode::new(0, 1)).unwrap();
        graph.add_node("b", TestNode::new(0, 0)).unwrap();
        graph.add_node("d", TestNode::new(0, 0)).unwrap();
        graph.add_slot_edge("a", "out_0", "c", "in_0").unwrap();
        graph.add_node_edge("d", "b").unwrap();

        assert_eq!(names(&graph), vec!["a", "c", "d", "b"]);
        assert_eq!(names(&graph), names(&graph));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = RenderGraph::new();
        graph.add_node("a", TestNode::new(1, 1)).unwrap();
        graph.add_node("b", TestNode::new(1, 1)).unwrap();
        graph.add_node("c", TestNode::new(1, 1)).unwrap();
        graph.add_slot_edge("a", 0, "b", 0).unwrap();
        graph.add_slot_edge("b", 0, "c", 0).unwrap();

        let before = names(&graph).join(",");
        let result = graph.add_slot_edge("c", 0, "a", 0);
        assert!(matches!(result, Err(RenderGraphError::Cyclic(_))));
        assert_eq!(names(&graph).join(","), before);

        assert!(matches!(
            graph.add_node_edge("a", "a"),
            Err(RenderGraphError::Cyclic(_))
        ));
    }

    #[test]
    fn test_slot_edge_checks() {
        let mut graph = RenderGraph::new();
        graph.add_node("a", TestNode::new(0, 1)).unwrap();
        graph.add_node("b", TestNode::new(0, 1)).unwrap();
        graph
            .add_node(
                "tex",
                TestNode {
                    inputs: vec![SlotInfo::new("in", SlotType::Texture)],
                    ..TestNode::new(0, 0)
                },
            )
            .unwrap();
        graph.add_node("sink", TestNode::new(1, 0)).unwrap();

        assert_eq!(
            graph.add_slot_edge("a", "nope", "sink", "in_0"),
            Err(RenderGraphError::InvalidOutputNodeSlot("nope".into()))
        );
        assert_eq!(
            graph.add_slot_edge("a", "out_0", "sink", 3),
            Err(RenderGraphError::InvalidInputNodeSlot(3.into()))
        );
        assert!(matches!(
            graph.add_slot_edge("a", "out_0", "tex", "in"),
            Err(RenderGraphError::MismatchedNodeSlots {
                output_type: SlotType::Buffer,
                input_type: SlotType::Texture,
                ..
            })
        ));
        assert_eq!(
            graph.add_slot_edge("ghost", 0, "sink", 0),
            Err(RenderGraphError::InvalidNode("ghost".into()))
        );

        graph.add_slot_edge("a", "out_0", "sink", "in_0").unwrap();
        assert!(matches!(
            graph.add_slot_edge("a", "out_0", "sink", "in_0"),
            Err(RenderGraphError::EdgeAlreadyExists(_))
        ));
        assert!(matches!(
            graph.add_slot_edge("b", "out_0", "sink", "in_0"),
            Err(RenderGraphError::NodeInputSlotAlreadyOccupied { input_slot: 0, .. })
        ));
    }

    #[test]
    fn test_unconnected_input() {
        let mut graph = RenderGraph::new();
        graph.set_input(vec![SlotInfo::new("view", SlotType::Texture)]).unwrap();
        graph.add_node("sink", TestNode::new(1, 0)).unwrap();

        assert_eq!(
            graph.validate(),
            Err(RenderGraphError::UnconnectedNodeInputSlot {
                node: "sink".into(),
                input_slot: "in_0".into(),
            })
        );
        assert_eq!(graph.set_input(vec![]), Err(RenderGraphError::InputNodeAlreadySet));
    }

    #[test]
    fn test_sub_graph_resolution() {
        let mut draw = RenderGraph::new();
        draw.add_node("uses_shared", TestNode::running("shared")).unwrap();

        let mut graph = RenderGraph::new();
        graph.add_node("driver", TestNode::running("draw")).unwrap();
        graph.add_sub_graph("draw", draw).unwrap();
        graph.add_sub_graph("shared", RenderGraph::new()).unwrap();
        assert_eq!(graph.validate(), Ok(()));

        assert_eq!(
            graph.add_sub_graph("draw", RenderGraph::new()),
            Err(RenderGraphError::DuplicateSubGraph("draw".into()))
        );

        let mut broken = RenderGraph::new();
        broken.add_node("driver", TestNode::running("missing")).unwrap();
        assert_eq!(
            broken.validate(),
            Err(RenderGraphError::UnknownSubGraph {
                node: "driver".into(),
                sub_graph: "missing".into(),
            })
        );
    }

    #[test]
    fn test_cyclic_sub_graphs() {
        let mut ping = RenderGraph::new();
        ping.add_node("to_pong", TestNode::running("pong")).unwrap();
        let mut pong = RenderGraph::new();
        pong.add_node("to_ping", TestNode::running("ping")).unwrap();

        let mut graph = RenderGraph::new();
        graph.add_node("driver", TestNode::running("ping")).unwrap();
        graph.add_sub_graph("ping", ping).unwrap();
        graph.add_sub_graph("pong", pong).unwrap();

        assert_eq!(
            graph.validate(),
            Err(RenderGraphError::CyclicSubGraph {
                path: vec!["<root>".into(), "ping".into(), "pong".into(), "ping".into()],
            })
        );
    }

    #[test]
    fn test_sub_graph_invoking_its_parent() {
        let mut inner = RenderGraph::new();
        inner.add_node("back", TestNode::running("outer")).unwrap();
        let mut outer = RenderGraph::new();
        outer.add_sub_graph("inner", inner).unwrap();

        let mut graph = RenderGraph::new();
        graph.add_sub_graph("outer", outer).unwrap();

        assert!(matches!(
            graph.validate(),
            Err(RenderGraphError::CyclicSubGraph { .. })
        ));
    }

    #[test]
    fn test_mermaid() {
        let mut graph = RenderGraph::new();
        graph.add_node("a", TestNode::new(0, 1)).unwrap();
        graph.add_node("b", TestNode::new(1, 0)).unwrap();
        graph.add_slot_edge("a", 0, "b", 0).unwrap();

        let rendered = graph.to_string();
        assert!(rendered.starts_with("graph LR\n"));
        assert!(rendered.contains("n0 -->|out_0 -> in_0| n1"));
    }
}

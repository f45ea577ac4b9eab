use std::borrow::Cow;
use std::collections::HashMap;

use tracing::Level;

use crate::core::CallId;
use crate::error::{
    NodeRunError, OutputSlotError, RenderGraphError, RenderGraphRunnerError, RunSubGraphError,
};
use crate::graph::context::RunSubGraph;
use crate::graph::render_graph::resolve_sub_graph;
use crate::graph::{
    Edge, NodeId, NodeLabel, NodeState, RenderContext, RenderGraph, RenderGraphContext, SlotLabel,
    SlotValue,
};

/// Where a node ended up in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Not reached. Nodes downstream of a failure stay here.
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    /// Waiting on asynchronous work, retried next pass.
    Deferred,
}

#[derive(Debug)]
pub struct NodeFailure {
    pub node: Cow<'static, str>,
    pub error: NodeRunError,
}

/// Outcome of one pass over a graph.
#[derive(Debug)]
pub struct PassReport {
    pass: u64,
    names: Vec<Cow<'static, str>>,
    statuses: Vec<NodeStatus>,
    executed: Vec<Cow<'static, str>>,
    failures: Vec<NodeFailure>,
    awaiting: Vec<CallId>,
}

impl PassReport {
    fn new(graph: &RenderGraph, pass: u64) -> Self {
        Self {
            pass,
            names: graph.iter_nodes().map(|node| node.name.clone()).collect(),
            statuses: vec![NodeStatus::Pending; graph.len()],
            executed: Vec::new(),
            failures: Vec::new(),
            awaiting: Vec::new(),
        }
    }

    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn status(&self, node: &str) -> Option<NodeStatus> {
        let index = self.names.iter().position(|name| name == node)?;
        Some(self.statuses[index])
    }

    /// Nodes whose `run` was called, in the order they were called.
    pub fn executed(&self) -> &[Cow<'static, str>] {
        &self.executed
    }

    pub fn failures(&self) -> &[NodeFailure] {
        &self.failures
    }

    /// Calls that deferred nodes are waiting on.
    pub fn awaiting(&self) -> &[CallId] {
        &self.awaiting
    }

    pub fn is_complete(&self) -> bool {
        self.statuses.iter().all(|status| *status == NodeStatus::Completed)
    }

    pub fn nodes_with(&self, status: NodeStatus) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .zip(&self.statuses)
            .filter(move |(_, s)| **s == status)
            .map(|(name, _)| name.as_ref())
    }

    fn status_of(&self, id: NodeId) -> NodeStatus {
        self.statuses[id.index()]
    }

    fn set(&mut self, id: NodeId, status: NodeStatus) {
        self.statuses[id.index()] = status;
    }
}

/// Values kept between passes: the last committed outputs of every node, and
/// the same for every sub-graph run from this graph.
#[derive(Debug, Default)]
struct GraphState {
    outputs: HashMap<NodeId, Vec<SlotValue>>,
    sub_graphs: HashMap<Cow<'static, str>, GraphState>,
}

/// Drives passes over a validated [`RenderGraph`].
pub struct RenderGraphRunner {
    graph: RenderGraph,
    state: GraphState,
    passes: u64,
}

impl RenderGraphRunner {
    /// Validates the whole graph tree and takes ownership of it.
    pub fn new(graph: RenderGraph) -> Result<Self, RenderGraphError> {
        graph.validate()?;

        Ok(Self {
            graph,
            state: GraphState::default(),
            passes: 0,
        })
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Runs every node of the graph once, in execution order.
    ///
    /// Only problems with `inputs` abort the pass. Node failures and
    /// deferrals are recorded in the returned report; they stop the nodes
    /// that depend on them and nothing else.
    pub fn run_pass(
        &mut self,
        context: &mut RenderContext<'_>,
        inputs: &[SlotValue],
    ) -> Result<PassReport, RenderGraphRunnerError> {
        self.passes += 1;
        let pass = self.passes;

        let span = tracing::span!(Level::INFO, "render_pass", pass);
        let _enter = span.enter();

        let report = run_graph(&self.graph, &[], &mut self.state, context, inputs, pass)?;

        if !report.failures.is_empty() {
            tracing::warn!("pass {} finished with {} failed nodes", pass, report.failures.len());
        } else if !report.awaiting.is_empty() {
            tracing::debug!("pass {} awaits {} calls", pass, report.awaiting.len());
        }

        Ok(report)
    }

    /// Last committed value of an output slot of a top-level node.
    pub fn output_value(
        &self,
        node: impl Into<NodeLabel>,
        slot: impl Into<SlotLabel>,
    ) -> Option<&SlotValue> {
        let id = self.graph.get_node_id(node).ok()?;
        let index = self.graph[id].output_slots.get_slot_index(slot)?;
        self.state.outputs.get(&id)?.get(index)
    }
}

fn check_inputs(graph: &RenderGraph, inputs: &[SlotValue]) -> Result<(), RenderGraphRunnerError> {
    let Some(input_node) = graph.input_node() else {
        if !inputs.is_empty() {
            return Err(RenderGraphRunnerError::UnexpectedInputs {
                expected: 0,
                found: inputs.len(),
            });
        }
        return Ok(());
    };

    for (slot_index, slot) in input_node.input_slots.iter().enumerate() {
        let Some(value) = inputs.get(slot_index) else {
            return Err(RenderGraphRunnerError::MissingInput {
                slot_index,
                slot_name: slot.name.clone(),
            });
        };

        if value.slot_type() != slot.slot_type {
            return Err(RenderGraphRunnerError::MismatchedInputSlotType {
                slot_index,
                label: slot.name.clone().into(),
                expected: slot.slot_type,
                actual: value.slot_type(),
            });
        }
    }

    if inputs.len() > input_node.input_slots.len() {
        return Err(RenderGraphRunnerError::UnexpectedInputs {
            expected: input_node.input_slots.len(),
            found: inputs.len(),
        });
    }

    Ok(())
}

enum Blocked {
    Aborted,
    Deferred,
}

fn run_graph<'g>(
    graph: &'g RenderGraph,
    ancestors: &[&'g RenderGraph],
    state: &mut GraphState,
    context: &mut RenderContext<'_>,
    inputs: &[SlotValue],
    pass: u64,
) -> Result<PassReport, RenderGraphRunnerError> {
    check_inputs(graph, inputs)?;

    let mut report = PassReport::new(graph, pass);
    let input_node = graph.input_node().map(|node| node.id);

    for &id in graph.execution_order() {
        let node = &graph[id];

        let mut blocked = None;
        let mut slot_values: Vec<Option<SlotValue>> = vec![None; node.input_slots.len()];

        for edge in graph.iter_node_inputs(id) {
            let producer = edge.output_node();
            match report.status_of(producer) {
                NodeStatus::Completed => {
                    if let Edge::SlotEdge {
                        output_index,
                        input_index,
                        ..
                    } = *edge
                    {
                        slot_values[input_index] = state
                            .outputs
                            .get(&producer)
                            .and_then(|values| values.get(output_index))
                            .cloned();
                    }
                }
                NodeStatus::Deferred => {
                    blocked.get_or_insert(Blocked::Deferred);
                }
                _ => blocked = Some(Blocked::Aborted),
            }
        }

        match blocked {
            Some(Blocked::Aborted) => continue,
            Some(Blocked::Deferred) => {
                report.set(id, NodeStatus::Deferred);
                continue;
            }
            None => {}
        }

        let node_inputs: Vec<SlotValue> = if Some(id) == input_node {
            inputs.to_vec()
        } else {
            // producers that completed always committed every output
            slot_values.into_iter().flatten().collect()
        };

        report.set(id, NodeStatus::Ready);

        let span = tracing::span!(Level::DEBUG, "node", name = %node.name);
        let _enter = span.enter();

        report.set(id, NodeStatus::Running);
        report.executed.push(node.name.clone());

        let mut node_context = RenderGraphContext::new(graph, ancestors, node, &node_inputs);
        let outcome = node
            .node
            .run(&mut node_context, context)
            .and_then(|()| finish_node(graph, ancestors, state, context, node, node_context, &mut report));

        match outcome {
            Ok(Some(outputs)) => {
                state.outputs.insert(id, outputs);
                report.set(id, NodeStatus::Completed);
            }
            Ok(None) => {
                report.set(id, NodeStatus::Deferred);
                tracing::debug!("node '{}' deferred", node.name);
            }
            Err(error) => {
                tracing::warn!("node '{}' failed: {}", node.name, error);
                report.set(id, NodeStatus::Failed);
                report.failures.push(NodeFailure {
                    node: node.name.clone(),
                    error,
                });
            }
        }
    }

    Ok(report)
}

/// Runs the sub-graphs a node queued and collects its outputs. `None` means
/// the node, or one of its sub-graphs, deferred.
fn finish_node<'g>(
    graph: &'g RenderGraph,
    ancestors: &[&'g RenderGraph],
    state: &mut GraphState,
    context: &mut RenderContext<'_>,
    node: &NodeState,
    node_context: RenderGraphContext<'_>,
    report: &mut PassReport,
) -> Result<Option<Vec<SlotValue>>, NodeRunError> {
    let (outputs, run_sub_graphs, awaiting) = node_context.finish();

    if !awaiting.is_empty() {
        report.awaiting.extend(awaiting);
        return Ok(None);
    }

    let mut deferred = false;
    for RunSubGraph { name, inputs } in run_sub_graphs {
        let (sub_graph, chain) = resolve_sub_graph(graph, ancestors, &name)
            .ok_or_else(|| RunSubGraphError::MissingSubGraph(name.clone()))?;

        let sub_state = state.sub_graphs.entry(name.clone()).or_default();
        let sub_report = run_graph(sub_graph, &chain, sub_state, context, &inputs, report.pass)
            .map_err(|source| RunSubGraphError::RejectedInputs {
                graph_name: name.clone(),
                source,
            })?;

        if !sub_report.failures.is_empty() {
            return Err(RunSubGraphError::SubGraphFailed {
                graph_name: name,
                nodes: sub_report.failures.into_iter().map(|f| f.node).collect(),
            }
            .into());
        }

        if !sub_report.awaiting.is_empty() || sub_report.statuses.contains(&NodeStatus::Deferred) {
            report.awaiting.extend(sub_report.awaiting);
            deferred = true;
        }
    }

    if deferred {
        return Ok(None);
    }

    let mut committed = Vec::with_capacity(outputs.len());
    for (value, slot) in outputs.into_iter().zip(node.output_slots.iter()) {
        match value {
            Some(value) => committed.push(value),
            None => return Err(OutputSlotError::Unwritten(slot.name.clone()).into()),
        }
    }

    Ok(Some(committed))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::gpu::{BufferId, RecordingGpu, TextureId};
    use crate::graph::{INPUT_NODE_NAME, Node, SlotInfo, SlotType};
    use crate::scheduler::{ProcedureTable, Scheduler, SchedulerConfig};
    use crate::source::{SourceConfig, TileSource};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Behavior {
        Emit(u64),
        Fail,
        Defer,
        SkipOutput,
        WriteTwice,
    }

    struct Stage {
        inputs: usize,
        outputs: usize,
        behavior: Rc<Cell<Behavior>>,
    }

    impl Stage {
        fn new(inputs: usize, outputs: usize, behavior: Behavior) -> Self {
            Self {
                inputs,
                outputs,
                behavior: Rc::new(Cell::new(behavior)),
            }
        }

        fn handle(&self) -> Rc<Cell<Behavior>> {
            self.behavior.clone()
        }
    }

    fn buffers(count: usize, prefix: &str) -> Vec<SlotInfo> {
        (0..count)
            .map(|i| SlotInfo::new(format!("{prefix}_{i}"), SlotType::Buffer))
            .collect()
    }

    fn sum(values: &[SlotValue]) -> u64 {
        values
            .iter()
            .filter_map(|value| match value {
                SlotValue::Buffer(BufferId(n)) => Some(*n),
                _ => None,
            })
            .sum()
    }

    impl Node for Stage {
        fn input(&self) -> Vec<SlotInfo> {
            buffers(self.inputs, "in")
        }

        fn output(&self) -> Vec<SlotInfo> {
            buffers(self.outputs, "out")
        }

        fn run(
            &self,
            graph: &mut RenderGraphContext<'_>,
            _: &mut RenderContext<'_>,
        ) -> Result<(), NodeRunError> {
            match self.behavior.get() {
                Behavior::Emit(n) => {
                    let value = BufferId(n + sum(graph.inputs()));
                    for index in 0..self.outputs {
                        graph.set_output(index, value)?;
                    }
                }
                Behavior::Fail => return Err(anyhow::anyhow!("boom").into()),
                Behavior::Defer => graph.defer(CallId::new(7)),
                Behavior::SkipOutput => {}
                Behavior::WriteTwice => {
                    graph.set_output(0, BufferId(1))?;
                    graph.set_output(0, BufferId(2))?;
                }
            }
            Ok(())
        }
    }

    /// Runs a declared sub-graph with its own inputs, then forwards them.
    struct Driver {
        sub_graph: &'static str,
    }

    impl Node for Driver {
        fn input(&self) -> Vec<SlotInfo> {
            buffers(1, "in")
        }

        fn output(&self) -> Vec<SlotInfo> {
            buffers(1, "out")
        }

        fn sub_graphs(&self) -> Vec<Cow<'static, str>> {
            vec![Cow::Borrowed(self.sub_graph)]
        }

        fn run(
            &self,
            graph: &mut RenderGraphContext<'_>,
            _: &mut RenderContext<'_>,
        ) -> Result<(), NodeRunError> {
            let inputs = graph.inputs().to_vec();
            graph.run_sub_graph(self.sub_graph, inputs.clone())?;
            if let Some(value) = inputs.into_iter().next() {
                graph.set_output(0, value)?;
            }
            Ok(())
        }
    }

    /// Remembers the last buffer it saw.
    struct Recorder {
        seen: Rc<Cell<Option<BufferId>>>,
    }

    impl Node for Recorder {
        fn input(&self) -> Vec<SlotInfo> {
            buffers(1, "in")
        }

        fn run(
            &self,
            graph: &mut RenderGraphContext<'_>,
            _: &mut RenderContext<'_>,
        ) -> Result<(), NodeRunError> {
            self.seen.set(Some(graph.get_input_buffer("in_0")?));
            Ok(())
        }
    }

    struct Harness {
        gpu: RecordingGpu,
        tiles: TileSource,
        scheduler: Scheduler,
    }

    impl Harness {
        fn new() -> Self {
            let config = SchedulerConfig {
                workers: 0,
                ..Default::default()
            };

            Self {
                gpu: RecordingGpu::new(),
                tiles: TileSource::new(&SourceConfig::default()),
                scheduler: Scheduler::new(&config, ProcedureTable::new()).unwrap(),
            }
        }

        fn try_run(
            &mut self,
            runner: &mut RenderGraphRunner,
            inputs: &[SlotValue],
        ) -> Result<PassReport, RenderGraphRunnerError> {
            let mut context = RenderContext {
                gpu: &mut self.gpu,
                tiles: &mut self.tiles,
                scheduler: &mut self.scheduler,
            };
            runner.run_pass(&mut context, inputs)
        }

        fn run(&mut self, runner: &mut RenderGraphRunner) -> PassReport {
            self.try_run(runner, &[]).unwrap()
        }
    }

    #[test]
    fn test_nodes_run_in_execution_order() {
        let mut graph = RenderGraph::new();
        graph.add_node("a", Stage::new(0, 1, Behavior::Emit(1))).unwrap();
        graph.add_node("b", Stage::new(0, 1, Behavior::Emit(2))).unwrap();
        graph.add_node("c", Stage::new(2, 1, Behavior::Emit(10))).unwrap();
        graph.add_slot_edge("b", 0, "c", 0).unwrap();
        graph.add_slot_edge("a", 0, "c", 1).unwrap();

        let order: Vec<Cow<'static, str>> = graph
            .execution_order()
            .iter()
            .map(|id| graph[*id].name.clone())
            .collect();

        let mut runner = RenderGraphRunner::new(graph).unwrap();
        let report = Harness::new().run(&mut runner);

        assert!(report.is_complete());
        assert_eq!(report.executed(), order.as_slice());
        assert_eq!(report.pass(), 1);
        assert_eq!(
            runner.output_value("c", "out_0"),
            Some(&SlotValue::Buffer(BufferId(13)))
        );
    }

    #[test]
    fn test_failure_is_isolated() {
        let mut graph = RenderGraph::new();
        graph.add_node("a", Stage::new(0, 1, Behavior::Emit(1))).unwrap();
        graph.add_node("b", Stage::new(1, 1, Behavior::Fail)).unwrap();
        graph.add_node("c", Stage::new(1, 0, Behavior::Emit(0))).unwrap();
        graph.add_node("d", Stage::new(1, 0, Behavior::Emit(0))).unwrap();
        graph.add_slot_edge("a", 0, "b", 0).unwrap();
        graph.add_slot_edge("b", 0, "c", 0).unwrap();
        graph.add_slot_edge("a", 0, "d", 0).unwrap();

        let mut runner = RenderGraphRunner::new(graph).unwrap();
        let report = Harness::new().run(&mut runner);

        assert_eq!(report.status("a"), Some(NodeStatus::Completed));
        assert_eq!(report.status("b"), Some(NodeStatus::Failed));
        assert_eq!(report.status("c"), Some(NodeStatus::Pending));
        assert_eq!(report.status("d"), Some(NodeStatus::Completed));
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].node, "b");
        assert!(!report.executed().iter().any(|name| name == "c"));
        assert!(!report.is_complete());
    }

    #[test]
    fn test_stale_outputs_survive_failure() {
        let stage = Stage::new(0, 1, Behavior::Emit(5));
        let behavior = stage.handle();

        let mut graph = RenderGraph::new();
        graph.add_node("a", stage).unwrap();

        let mut runner = RenderGraphRunner::new(graph).unwrap();
        let mut harness = Harness::new();
        harness.run(&mut runner);

        behavior.set(Behavior::Fail);
        let report = harness.run(&mut runner);

        assert_eq!(report.status("a"), Some(NodeStatus::Failed));
        assert_eq!(
            runner.output_value("a", 0),
            Some(&SlotValue::Buffer(BufferId(5)))
        );
    }

    #[test]
    fn test_deferral_propagates() {
        let stage = Stage::new(0, 1, Behavior::Defer);
        let behavior = stage.handle();

        let mut graph = RenderGraph::new();
        graph.add_node("a", stage).unwrap();
        graph.add_node("b", Stage::new(1, 0, Behavior::Emit(0))).unwrap();
        graph.add_slot_edge("a", 0, "b", 0).unwrap();

        let mut runner = RenderGraphRunner::new(graph).unwrap();
        let mut harness = Harness::new();

        let report = harness.run(&mut runner);
        assert_eq!(report.status("a"), Some(NodeStatus::Deferred));
        assert_eq!(report.status("b"), Some(NodeStatus::Deferred));
        assert_eq!(report.awaiting(), &[CallId::new(7)]);
        assert_eq!(report.executed().len(), 1);
        assert_eq!(runner.output_value("a", 0), None);

        behavior.set(Behavior::Emit(3));
        let report = harness.run(&mut runner);
        assert!(report.is_complete());
        assert!(report.awaiting().is_empty());
        assert_eq!(runner.passes(), 2);
    }

    #[test]
    fn test_output_slot_misuse() {
        let mut graph = RenderGraph::new();
        graph.add_node("skip", Stage::new(0, 1, Behavior::SkipOutput)).unwrap();
        graph.add_node("twice", Stage::new(0, 1, Behavior::WriteTwice)).unwrap();

        let mut runner = RenderGraphRunner::new(graph).unwrap();
        let report = Harness::new().run(&mut runner);

        assert_eq!(report.failures().len(), 2);
        for failure in report.failures() {
            match failure.node.as_ref() {
                "skip" => assert!(matches!(
                    &failure.error,
                    NodeRunError::OutputSlot(OutputSlotError::Unwritten(slot)) if slot == "out_0"
                )),
                "twice" => assert!(matches!(
                    &failure.error,
                    NodeRunError::OutputSlot(OutputSlotError::AlreadyWritten(SlotLabel::Index(0)))
                )),
                other => panic!("unexpected failure in {other}"),
            }
        }
    }

    #[test]
    fn test_graph_inputs_are_checked() {
        let mut graph = RenderGraph::new();
        graph.set_input(vec![SlotInfo::new("seed", SlotType::Buffer)]).unwrap();
        graph.add_node("a", Stage::new(1, 1, Behavior::Emit(1))).unwrap();
        graph.add_slot_edge(INPUT_NODE_NAME, "seed", "a", 0).unwrap();

        let mut runner = RenderGraphRunner::new(graph).unwrap();
        let mut harness = Harness::new();

        assert!(matches!(
            harness.try_run(&mut runner, &[]),
            Err(RenderGraphRunnerError::MissingInput { slot_index: 0, .. })
        ));
        assert!(matches!(
            harness.try_run(&mut runner, &[SlotValue::Texture(TextureId(1))]),
            Err(RenderGraphRunnerError::MismatchedInputSlotType { slot_index: 0, .. })
        ));
        assert!(matches!(
            harness.try_run(
                &mut runner,
                &[SlotValue::Buffer(BufferId(1)), SlotValue::Buffer(BufferId(2))]
            ),
            Err(RenderGraphRunnerError::UnexpectedInputs { expected: 1, found: 2 })
        ));

        let report = harness
            .try_run(&mut runner, &[SlotValue::Buffer(BufferId(41))])
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(
            runner.output_value("a", 0),
            Some(&SlotValue::Buffer(BufferId(42)))
        );
    }

    #[test]
    fn test_sub_graph_receives_inputs() {
        let seen = Rc::new(Cell::new(None));

        let mut inner = RenderGraph::new();
        inner.set_input(vec![SlotInfo::new("value", SlotType::Buffer)]).unwrap();
        inner.add_node("recorder", Recorder { seen: seen.clone() }).unwrap();
        inner.add_slot_edge(INPUT_NODE_NAME, "value", "recorder", 0).unwrap();

        let mut graph = RenderGraph::new();
        graph.add_sub_graph("inner", inner).unwrap();
        graph.add_node("source", Stage::new(0, 1, Behavior::Emit(9))).unwrap();
        graph.add_node("driver", Driver { sub_graph: "inner" }).unwrap();
        graph.add_slot_edge("source", 0, "driver", 0).unwrap();

        let mut runner = RenderGraphRunner::new(graph).unwrap();
        let report = Harness::new().run(&mut runner);

        assert!(report.is_complete());
        assert_eq!(seen.get(), Some(BufferId(9)));
    }

    #[test]
    fn test_sub_graph_failure_fails_invoker() {
        let mut inner = RenderGraph::new();
        inner.set_input(vec![SlotInfo::new("value", SlotType::Buffer)]).unwrap();
        inner.add_node("bad", Stage::new(1, 0, Behavior::Fail)).unwrap();
        inner.add_slot_edge(INPUT_NODE_NAME, "value", "bad", 0).unwrap();

        let mut graph = RenderGraph::new();
        graph.add_sub_graph("inner", inner).unwrap();
        graph.add_node("source", Stage::new(0, 1, Behavior::Emit(1))).unwrap();
        graph.add_node("driver", Driver { sub_graph: "inner" }).unwrap();
        graph.add_slot_edge("source", 0, "driver", 0).unwrap();

        let mut runner = RenderGraphRunner::new(graph).unwrap();
        let report = Harness::new().run(&mut runner);

        assert_eq!(report.status("driver"), Some(NodeStatus::Failed));
        match &report.failures()[0].error {
            NodeRunError::RunSubGraph(RunSubGraphError::SubGraphFailed { graph_name, nodes }) => {
                assert_eq!(graph_name, "inner");
                assert_eq!(nodes, &[Cow::Borrowed("bad")]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_sub_graph_deferral_defers_invoker() {
        let waiting = Stage::new(1, 0, Behavior::Defer);
        let behavior = waiting.handle();

        let mut inner = RenderGraph::new();
        inner.set_input(vec![SlotInfo::new("value", SlotType::Buffer)]).unwrap();
        inner.add_node("waiting", waiting).unwrap();
        inner.add_slot_edge(INPUT_NODE_NAME, "value", "waiting", 0).unwrap();

        let mut graph = RenderGraph::new();
        graph.add_sub_graph("inner", inner).unwrap();
        graph.add_node("source", Stage::new(0, 1, Behavior::Emit(4))).unwrap();
        graph.add_node("driver", Driver { sub_graph: "inner" }).unwrap();
        graph.add_node("after", Stage::new(1, 0, Behavior::Emit(0))).unwrap();
        graph.add_slot_edge("source", 0, "driver", 0).unwrap();
        graph.add_slot_edge("driver", 0, "after", 0).unwrap();

        let mut runner = RenderGraphRunner::new(graph).unwrap();
        let mut harness = Harness::new();

        let report = harness.run(&mut runner);
        assert_eq!(report.status("source"), Some(NodeStatus::Completed));
        assert_eq!(report.status("driver"), Some(NodeStatus::Deferred));
        assert_eq!(report.status("after"), Some(NodeStatus::Deferred));
        assert_eq!(report.awaiting(), &[CallId::new(7)]);
        assert!(report.failures().is_empty());
        assert_eq!(runner.output_value("driver", 0), None);

        behavior.set(Behavior::Emit(0));
        let report = harness.run(&mut runner);
        assert!(report.is_complete());
        assert_eq!(
            runner.output_value("driver", 0),
            Some(&SlotValue::Buffer(BufferId(4)))
        );
    }
}

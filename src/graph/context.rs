use std::borrow::Cow;

use crate::core::{CallId, TileKey};
use crate::error::{InputSlotError, OutputSlotError, RunSubGraphError, ScheduleError};
use crate::gpu::{BufferId, GpuContext, TextureId};
use crate::graph::render_graph::resolve_sub_graph;
use crate::graph::{NodeState, RenderGraph, SlotInfos, SlotLabel, SlotType, SlotValue, TileData};
use crate::scheduler::Scheduler;
use crate::source::{TileRequest, TileSource};

/// Everything outside the graph that nodes may use while running.
pub struct RenderContext<'a> {
    pub gpu: &'a mut dyn GpuContext,
    pub tiles: &'a mut TileSource,
    pub scheduler: &'a mut Scheduler,
}

impl RenderContext<'_> {
    /// Asks the tile source for `key` in the current pass, starting a fetch
    /// when needed.
    pub fn request_tile(&mut self, key: TileKey) -> Result<TileRequest, ScheduleError> {
        self.tiles.request(self.scheduler, key)
    }

    pub fn pass(&self) -> u64 {
        self.tiles.pass()
    }
}

/// A sub-graph run queued by a node.
pub(crate) struct RunSubGraph {
    pub name: Cow<'static, str>,
    pub inputs: Vec<SlotValue>,
}

/// The slots of the node that is currently running.
pub struct RenderGraphContext<'a> {
    graph: &'a RenderGraph,
    ancestors: &'a [&'a RenderGraph],
    node: &'a NodeState,
    inputs: &'a [SlotValue],
    outputs: Vec<Option<SlotValue>>,
    run_sub_graphs: Vec<RunSubGraph>,
    awaiting: Vec<CallId>,
}

impl<'a> RenderGraphContext<'a> {
    pub(crate) fn new(
        graph: &'a RenderGraph,
        ancestors: &'a [&'a RenderGraph],
        node: &'a NodeState,
        inputs: &'a [SlotValue],
    ) -> Self {
        Self {
            graph,
            ancestors,
            node,
            inputs,
            outputs: vec![None; node.output_slots.len()],
            run_sub_graphs: Vec::new(),
            awaiting: Vec::new(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node.name
    }

    pub fn inputs(&self) -> &[SlotValue] {
        self.inputs
    }

    pub fn input_info(&self) -> &SlotInfos {
        &self.node.input_slots
    }

    pub fn output_info(&self) -> &SlotInfos {
        &self.node.output_slots
    }

    pub fn get_input(&self, label: impl Into<SlotLabel>) -> Result<&SlotValue, InputSlotError> {
        let label = label.into();
        let index = self
            .input_info()
            .get_slot_index(&label)
            .ok_or_else(|| InputSlotError::InvalidSlot(label.clone()))?;

        self.inputs.get(index).ok_or(InputSlotError::InvalidSlot(label))
    }

    pub fn get_input_buffer(&self, label: impl Into<SlotLabel>) -> Result<BufferId, InputSlotError> {
        let label = label.into();
        match self.get_input(&label)? {
            SlotValue::Buffer(id) => Ok(*id),
            other => Err(mismatched(label, SlotType::Buffer, other)),
        }
    }

    pub fn get_input_texture(&self, label: impl Into<SlotLabel>) -> Result<TextureId, InputSlotError> {
        let label = label.into();
        match self.get_input(&label)? {
            SlotValue::Texture(id) => Ok(*id),
            other => Err(mismatched(label, SlotType::Texture, other)),
        }
    }

    pub fn get_input_tile_data(&self, label: impl Into<SlotLabel>) -> Result<&TileData, InputSlotError> {
        let label = label.into();
        match self.get_input(&label)? {
            SlotValue::TileData(data) => Ok(data),
            other => Err(mismatched(label, SlotType::TileData, other)),
        }
    }

    /// Writes an output slot. Each slot takes exactly one value per pass.
    pub fn set_output(
        &mut self,
        label: impl Into<SlotLabel>,
        value: impl Into<SlotValue>,
    ) -> Result<(), OutputSlotError> {
        let label = label.into();
        let value = value.into();
        let (index, slot) = self
            .node
            .output_slots
            .find(&label)
            .ok_or_else(|| OutputSlotError::InvalidSlot(label.clone()))?;

        if slot.slot_type != value.slot_type() {
            return Err(OutputSlotError::MismatchedSlotType {
                label,
                expected: slot.slot_type,
                actual: value.slot_type(),
            });
        }

        match &mut self.outputs[index] {
            Some(_) => Err(OutputSlotError::AlreadyWritten(label)),
            slot => {
                *slot = Some(value);
                Ok(())
            }
        }
    }

    /// Queues a run of sub-graph `name` with `inputs`. The run happens right
    /// after this node returns, before its outputs are committed.
    pub fn run_sub_graph(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        inputs: Vec<SlotValue>,
    ) -> Result<(), RunSubGraphError> {
        let name = name.into();
        if !self.node.sub_graphs.contains(&name) {
            return Err(RunSubGraphError::UndeclaredSubGraph {
                node: self.node.name.clone(),
                sub_graph: name,
            });
        }

        let (sub_graph, _) = resolve_sub_graph(self.graph, self.ancestors, &name)
            .ok_or_else(|| RunSubGraphError::MissingSubGraph(name.clone()))?;

        match sub_graph.input_node() {
            None if !inputs.is_empty() => {
                return Err(RunSubGraphError::SubGraphHasNoInputs(name));
            }
            None => {}
            Some(input_node) => {
                for (slot_index, slot) in input_node.input_slots.iter().enumerate() {
                    let Some(value) = inputs.get(slot_index) else {
                        return Err(RunSubGraphError::MissingInput {
                            slot_index,
                            slot_name: slot.name.clone(),
                            graph_name: name,
                        });
                    };

                    if value.slot_type() != slot.slot_type {
                        return Err(RunSubGraphError::MismatchedInputSlotType {
                            graph_name: name,
                            slot_index,
                            expected: slot.slot_type,
                            actual: value.slot_type(),
                        });
                    }
                }
            }
        }

        self.run_sub_graphs.push(RunSubGraph { name, inputs });
        Ok(())
    }

    /// Marks the node as waiting on `call_id`. A deferred node commits no
    /// outputs and is tried again in the next pass, together with every node
    /// that depends on it.
    pub fn defer(&mut self, call_id: CallId) {
        self.awaiting.push(call_id);
    }

    pub fn is_deferred(&self) -> bool {
        !self.awaiting.is_empty()
    }

    pub(crate) fn finish(self) -> (Vec<Option<SlotValue>>, Vec<RunSubGraph>, Vec<CallId>) {
        (self.outputs, self.run_sub_graphs, self.awaiting)
    }
}

fn mismatched(label: SlotLabel, expected: SlotType, value: &SlotValue) -> InputSlotError {
    InputSlotError::MismatchedSlotType {
        label,
        expected,
        actual: value.slot_type(),
    }
}

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{CallId, RegionSlice, TileKey};
use crate::graph::{Edge, NodeId, NodeLabel, SlotLabel, SlotType};

/// Top level error returned while assembling an [`Engine`](crate::Engine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Couldn't start the scheduler.\n{0}")]
    Schedule(#[from] ScheduleError),

    #[error("Render graph is malformed.\n{0}")]
    Graph(#[from] RenderGraphError),

    #[error("Couldn't read engine configuration.\n{0}")]
    Config(#[from] serde_json::Error),

    #[error("Couldn't build the HTTP client.\n{0}")]
    Http(#[from] HttpError),
}

/// Synchronous failure of [`Scheduler`](crate::Scheduler) operations.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("No live workers are available to accept calls")]
    NoWorkersAvailable,

    #[error("Procedure '{0}' is not registered")]
    UnknownProcedure(String),

    #[error("Couldn't encode message.\n{0}")]
    Encode(#[from] MessageError),

    #[error("Couldn't spawn worker {slot}.\n{source}")]
    Spawn {
        slot: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Asynchronous failure of a single call, delivered through its completion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Call did not complete within {passes} passes")]
    Timeout { passes: u64 },

    #[error("Worker {slot} terminated before the call completed")]
    WorkerLost { slot: usize },

    #[error(transparent)]
    Procedure(#[from] ProcedureError),

    #[error("Malformed message.\n{0}")]
    Message(#[from] MessageError),

    #[error("Scheduler shut down before the call was dispatched")]
    Shutdown,
}

/// Problems with the framing or body of a message crossing the channel.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageError {
    #[error("Frame of {len} bytes is shorter than the call header")]
    Truncated { len: usize },

    #[error("Couldn't decode body of call {call_id}: {reason}")]
    Decode { call_id: CallId, reason: String },

    #[error("Couldn't encode body of call {call_id}: {reason}")]
    Encode { call_id: CallId, reason: String },

    #[error("Expected the result of call {expected}, got {found}")]
    UnexpectedCallId { expected: CallId, found: CallId },
}

/// Error raised by a procedure on a worker and carried back to the coordinator.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcedureError {
    #[error("Procedure '{0}' is not registered on this worker")]
    UnknownProcedure(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Source(#[from] SourceFetchError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("Procedure panicked: {0}")]
    Panicked(String),

    /// Failure of a procedure registered through
    /// [`ProcedureTable::register_fn`](crate::ProcedureTable::register_fn),
    /// rendered with its whole `anyhow` context chain. Built-in procedures
    /// never produce it.
    #[error("Procedure failed.\n{0}")]
    Failed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFetchError {
    #[error("Tile {0} is not available from the source")]
    NotFound(TileKey),

    #[error("Tile {0} is outside the grid of its zoom level")]
    InvalidKey(TileKey),

    #[error("Couldn't fetch tile {key}: {reason}")]
    Transport { key: TileKey, reason: String },
}

/// Failure of a single request made by an
/// [`HttpClient`](crate::source::HttpClient).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Server answered with status {status}")]
    Status { status: u16 },

    #[error("Request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionError {
    #[error("Slice {0:?} is out of bounds of the shared region")]
    OutOfBounds(RegionSlice),

    #[error("Slice {slice:?} can't hold {len} bytes")]
    LengthMismatch { slice: RegionSlice, len: usize },

    #[error("Block {0} of the shared region is poisoned")]
    Poisoned(u32),
}

/// Errors raised while building a [`RenderGraph`](crate::graph::RenderGraph).
///
/// Every one of these is returned before the graph ever runs; a graph that
/// produced one of them is left exactly as it was before the failed call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderGraphError {
    #[error("Node {0} does not exist")]
    InvalidNode(NodeLabel),

    #[error("Node '{0}' already exists")]
    DuplicateNode(Cow<'static, str>),

    #[error("Sub-graph '{0}' already exists")]
    DuplicateSubGraph(Cow<'static, str>),

    #[error("Graph already has an input node")]
    InputNodeAlreadySet,

    #[error("Output slot {0} does not exist")]
    InvalidOutputNodeSlot(SlotLabel),

    #[error("Input slot {0} does not exist")]
    InvalidInputNodeSlot(SlotLabel),

    #[error("Edge {0:?} already exists")]
    EdgeAlreadyExists(Edge),

    #[error("Edge {0:?} would introduce a cycle")]
    Cyclic(Edge),

    #[error("Input slot {input_slot} of node {node:?} is already fed by node {occupied_by:?}")]
    NodeInputSlotAlreadyOccupied {
        node: NodeId,
        input_slot: usize,
        occupied_by: NodeId,
    },

    #[error("Output slot of type {output_type} can't feed input slot of type {input_type}")]
    MismatchedNodeSlots {
        output_node: NodeId,
        output_slot: usize,
        output_type: SlotType,
        input_node: NodeId,
        input_slot: usize,
        input_type: SlotType,
    },

    #[error("Input slot '{input_slot}' of node '{node}' is not connected")]
    UnconnectedNodeInputSlot {
        node: Cow<'static, str>,
        input_slot: Cow<'static, str>,
    },

    #[error("Node '{node}' runs sub-graph '{sub_graph}', which is not registered")]
    UnknownSubGraph {
        node: Cow<'static, str>,
        sub_graph: Cow<'static, str>,
    },

    #[error("Sub-graphs invoke each other in a cycle: {}", path.join(" -> "))]
    CyclicSubGraph { path: Vec<Cow<'static, str>> },
}

/// Failure of a single node during a pass.
#[derive(Debug, Error)]
pub enum NodeRunError {
    #[error("Encountered an input slot error.\n{0}")]
    InputSlot(#[from] InputSlotError),

    #[error("Encountered an output slot error.\n{0}")]
    OutputSlot(#[from] OutputSlotError),

    #[error("Encountered an error when running a sub-graph.\n{0}")]
    RunSubGraph(#[from] RunSubGraphError),

    #[error("GPU stage failed.\n{0}")]
    Gpu(#[from] GpuError),

    #[error("Couldn't schedule work.\n{0}")]
    Schedule(#[from] ScheduleError),

    #[error("Tile {key} is unavailable.\n{source}")]
    TileUnavailable {
        key: TileKey,
        #[source]
        source: CallError,
    },

    /// Failure raised by a node defined outside this crate. Built-in nodes
    /// only use the variants above.
    #[error(transparent)]
    Userland(#[from] anyhow::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputSlotError {
    #[error("Input slot {0} does not exist")]
    InvalidSlot(SlotLabel),

    #[error("Input slot {label} holds {actual}, expected {expected}")]
    MismatchedSlotType {
        label: SlotLabel,
        expected: SlotType,
        actual: SlotType,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputSlotError {
    #[error("Output slot {0} does not exist")]
    InvalidSlot(SlotLabel),

    #[error("Output slot {label} accepts {expected}, got {actual}")]
    MismatchedSlotType {
        label: SlotLabel,
        expected: SlotType,
        actual: SlotType,
    },

    #[error("Output slot {0} was already written in this pass")]
    AlreadyWritten(SlotLabel),

    #[error("Output slot '{0}' was not written")]
    Unwritten(Cow<'static, str>),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunSubGraphError {
    #[error("Sub-graph '{0}' does not exist")]
    MissingSubGraph(Cow<'static, str>),

    #[error("Node '{node}' did not declare sub-graph '{sub_graph}'")]
    UndeclaredSubGraph {
        node: Cow<'static, str>,
        sub_graph: Cow<'static, str>,
    },

    #[error("Sub-graph '{0}' was given inputs but has no input node")]
    SubGraphHasNoInputs(Cow<'static, str>),

    #[error("Sub-graph '{graph_name}' is missing input {slot_index} ('{slot_name}')")]
    MissingInput {
        slot_index: usize,
        slot_name: Cow<'static, str>,
        graph_name: Cow<'static, str>,
    },

    #[error("Sub-graph '{graph_name}' input {slot_index} expects {expected}, got {actual}")]
    MismatchedInputSlotType {
        graph_name: Cow<'static, str>,
        slot_index: usize,
        expected: SlotType,
        actual: SlotType,
    },

    #[error("Sub-graph '{graph_name}' rejected its inputs\n{source}")]
    RejectedInputs {
        graph_name: Cow<'static, str>,
        #[source]
        source: RenderGraphRunnerError,
    },

    #[error("Sub-graph '{graph_name}' failed in nodes: {}", nodes.join(", "))]
    SubGraphFailed {
        graph_name: Cow<'static, str>,
        nodes: Vec<Cow<'static, str>>,
    },
}

/// Errors that prevent a pass from starting at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderGraphRunnerError {
    #[error("Graph input {slot_index} ('{slot_name}') was not provided")]
    MissingInput {
        slot_index: usize,
        slot_name: Cow<'static, str>,
    },

    #[error("Graph input {slot_index} {label} expects {expected}, got {actual}")]
    MismatchedInputSlotType {
        slot_index: usize,
        label: SlotLabel,
        expected: SlotType,
        actual: SlotType,
    },

    #[error("Graph takes {expected} inputs, {found} were provided")]
    UnexpectedInputs { expected: usize, found: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("Resource '{label}' of size {size} can't be allocated")]
    InvalidSize { label: String, size: u64 },

    #[error("Stage '{0}' was rejected by the device")]
    StageRejected(String),

    #[error("GPU device lost")]
    DeviceLost,
}

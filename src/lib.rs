#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod apc;
mod core;
mod error;
pub mod engine;
pub mod gpu;
pub mod graph;
#[cfg(feature = "logging")]
pub mod logging;
pub mod nodes;
pub mod scheduler;
pub mod source;

pub use crate::core::{CallId, Hash32, Payload, RegionSlice, SharedRegion, TileKey};
pub use crate::engine::{Engine, EngineConfig};
pub use crate::error::*;
pub use crate::graph::{RenderGraph, RenderGraphRunner};
pub use crate::scheduler::{Completion, Procedure, ProcedureContext, ProcedureTable, Scheduler};

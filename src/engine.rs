//! The coordinating side of the renderer.
//!
//! An [`Engine`] owns the scheduler, the tile source, the graph runner and the
//! GPU context, and moves them forward one frame at a time. Nothing in a frame
//! blocks on the workers: completions that arrived since the last frame are
//! folded into the tile cache, then the graph runs against whatever is ready.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, RenderGraphRunnerError};
use crate::gpu::GpuContext;
use crate::graph::{PassReport, RenderContext, RenderGraph, RenderGraphRunner, SlotValue};
use crate::scheduler::{Completion, ProcedureTable, Scheduler, SchedulerConfig};
use crate::source::{
    FETCH_TILE, FileSourceClient, HttpSourceClient, ReqwestClient, SourceConfig, TileSource,
    register_source,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub source: SourceConfig,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }
}

pub struct Engine<G: GpuContext> {
    scheduler: Scheduler,
    tiles: TileSource,
    runner: RenderGraphRunner,
    gpu: G,
    pass: u64,
    unrouted: Vec<Completion>,
}

impl<G: GpuContext> Engine<G> {
    /// Validates `graph` and starts the worker pool.
    ///
    /// When no [`FETCH_TILE`] procedure was registered, tiles are read from
    /// `config.source.root` if set, or else requested from `config.source.url`.
    pub fn new(
        config: &EngineConfig,
        mut procedures: ProcedureTable,
        graph: RenderGraph,
        gpu: G,
    ) -> Result<Self, EngineError> {
        let runner = RenderGraphRunner::new(graph)?;

        if !procedures.contains(FETCH_TILE) {
            let source = &config.source;
            if let Some(root) = &source.root {
                tracing::info!("serving tiles from {}", root);
                register_source(
                    &mut procedures,
                    FileSourceClient::new(root.clone(), source.extension.clone()),
                );
            } else if let Some(url) = &source.url {
                tracing::info!("fetching tiles from {}", url);
                let client = ReqwestClient::with_timeout(Duration::from_secs(source.timeout_secs))?;
                register_source(
                    &mut procedures,
                    HttpSourceClient::new(client, url.clone(), source.scheme),
                );
            }
        }

        let scheduler = Scheduler::new(&config.scheduler, procedures)?;
        let tiles = TileSource::new(&config.source);

        tracing::info!(
            "engine started with {} workers and {} nodes",
            scheduler.live_workers(),
            runner.graph().len()
        );

        Ok(Self {
            scheduler,
            tiles,
            runner,
            gpu,
            pass: 0,
            unrouted: Vec::new(),
        })
    }

    pub fn frame(&mut self) -> Result<PassReport, RenderGraphRunnerError> {
        self.frame_with_inputs(&[])
    }

    /// Runs one frame: collect completions, settle tiles, expire overdue
    /// fetches, trim the cache, then run the graph once.
    pub fn frame_with_inputs(
        &mut self,
        inputs: &[SlotValue],
    ) -> Result<PassReport, RenderGraphRunnerError> {
        self.pass += 1;
        self.tiles.begin_pass(self.pass);

        let region = self.scheduler.region().clone();
        let completions: Vec<Completion> = self.scheduler.poll_completions().collect();
        for completion in completions {
            if let Err(completion) = self.tiles.complete(completion, &region) {
                self.unrouted.push(completion);
            }
        }

        self.tiles.expire(&mut self.scheduler);
        self.tiles.enforce_capacity();

        let mut context = RenderContext {
            gpu: &mut self.gpu,
            tiles: &mut self.tiles,
            scheduler: &mut self.scheduler,
        };

        self.runner.run_pass(&mut context, inputs)
    }

    /// Completions of calls the tile source didn't start, such as calls
    /// submitted directly through [`Engine::scheduler_mut`].
    pub fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.unrouted)
    }

    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn tiles(&self) -> &TileSource {
        &self.tiles
    }

    pub fn tiles_mut(&mut self) -> &mut TileSource {
        &mut self.tiles
    }

    pub fn runner(&self) -> &RenderGraphRunner {
        &self.runner
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    /// Stops the workers. Tile fetches still settle into the cache; every
    /// other completion, including ones not yet taken, is returned.
    pub fn shutdown(mut self) -> Vec<Completion> {
        let region = self.scheduler.region().clone();
        for completion in self.scheduler.shutdown() {
            if let Err(completion) = self.tiles.complete(completion, &region) {
                self.unrouted.push(completion);
            }
        }

        tracing::info!("engine stopped after {} frames", self.pass);
        self.unrouted
    }
}

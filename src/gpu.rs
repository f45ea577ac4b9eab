//! The GPU capability render nodes run against.
//!
//! Nodes never talk to a device directly. They allocate resources and submit
//! stages through [`GpuContext`], which keeps the graph runnable headless.

use std::collections::HashSet;
use std::fmt;

use crate::error::GpuError;
use crate::graph::SlotValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// One unit of GPU work, described by the slot values it reads and writes.
#[derive(Debug, Clone, Copy)]
pub struct StageSubmission<'a> {
    pub label: &'a str,
    pub reads: &'a [SlotValue],
    pub writes: &'a [SlotValue],
}

pub trait GpuContext {
    fn create_buffer(&mut self, label: &str, size: u64) -> Result<BufferId, GpuError>;

    fn create_texture(&mut self, label: &str, extent: Extent) -> Result<TextureId, GpuError>;

    fn execute(&mut self, stage: StageSubmission<'_>) -> Result<(), GpuError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStage {
    pub label: String,
    pub reads: Vec<SlotValue>,
    pub writes: Vec<SlotValue>,
}

/// Headless [`GpuContext`] that records everything submitted to it.
#[derive(Debug, Default)]
pub struct RecordingGpu {
    next_id: u64,
    buffers: Vec<(BufferId, String, u64)>,
    textures: Vec<(TextureId, String, Extent)>,
    stages: Vec<RecordedStage>,
    failing: HashSet<String>,
}

impl RecordingGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future submission of stage `label` fail.
    pub fn fail_stage(&mut self, label: impl Into<String>) {
        self.failing.insert(label.into());
    }

    pub fn heal_stage(&mut self, label: &str) {
        self.failing.remove(label);
    }

    pub fn stages(&self) -> &[RecordedStage] {
        &self.stages
    }

    pub fn stage_labels(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.label.as_str()).collect()
    }

    pub fn buffers(&self) -> &[(BufferId, String, u64)] {
        &self.buffers
    }

    pub fn textures(&self) -> &[(TextureId, String, Extent)] {
        &self.textures
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl GpuContext for RecordingGpu {
    fn create_buffer(&mut self, label: &str, size: u64) -> Result<BufferId, GpuError> {
        if size == 0 {
            return Err(GpuError::InvalidSize {
                label: label.to_string(),
                size,
            });
        }

        let id = BufferId(self.next_id());
        self.buffers.push((id, label.to_string(), size));
        Ok(id)
    }

    fn create_texture(&mut self, label: &str, extent: Extent) -> Result<TextureId, GpuError> {
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::InvalidSize {
                label: label.to_string(),
                size: 0,
            });
        }

        let id = TextureId(self.next_id());
        self.textures.push((id, label.to_string(), extent));
        Ok(id)
    }

    fn execute(&mut self, stage: StageSubmission<'_>) -> Result<(), GpuError> {
        if self.failing.contains(stage.label) {
            return Err(GpuError::StageRejected(stage.label.to_string()));
        }

        self.stages.push(RecordedStage {
            label: stage.label.to_string(),
            reads: stage.reads.to_vec(),
            writes: stage.writes.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording() {
        let mut gpu = RecordingGpu::new();
        let buffer = gpu.create_buffer("vertices", 64).unwrap();
        let texture = gpu.create_texture("target", Extent::new(4, 4)).unwrap();
        assert_ne!(buffer.0, texture.0);

        gpu.execute(StageSubmission {
            label: "draw",
            reads: &[SlotValue::Buffer(buffer)],
            writes: &[SlotValue::Texture(texture)],
        })
        .unwrap();

        assert_eq!(gpu.stage_labels(), vec!["draw"]);
        assert_eq!(gpu.stages()[0].writes, vec![SlotValue::Texture(texture)]);
    }

    #[test]
    fn test_injected_failure() {
        let mut gpu = RecordingGpu::new();
        gpu.fail_stage("draw");

        let stage = StageSubmission {
            label: "draw",
            reads: &[],
            writes: &[],
        };
        assert_eq!(gpu.execute(stage), Err(GpuError::StageRejected("draw".into())));

        gpu.heal_stage("draw");
        assert!(gpu.execute(stage).is_ok());
        assert!(gpu.create_buffer("empty", 0).is_err());
    }
}

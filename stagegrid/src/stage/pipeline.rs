//! Stage pipeline definition and builder.

use super::pyramid::{StageDependencies, StagePyramid, StageStep};
use super::types::{PyramidKind, StageDef, StageId, StepTask};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building a pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("pipeline has more than {max} stages")]
    TooManyStages { max: usize },

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage '{stage}' requires unknown stage '{required}'")]
    UnknownStage { stage: String, required: String },

    #[error("stage '{stage}' requires '{required}', which is not an earlier stage")]
    ForwardRequirement { stage: String, required: String },

    #[error(
        "stage '{stage}' needs loading radius {loading} but only generation radius {generation}"
    )]
    LoadingRadiusExceeded {
        stage: String,
        loading: u32,
        generation: u32,
    },
}

// =============================================================================
// Stage Builder
// =============================================================================

/// Describes one stage while building a pipeline.
#[derive(Debug, Clone, Default)]
pub struct StageBuilder {
    requirements: Vec<(String, u32)>,
    reload_requirements: Option<Vec<(String, u32)>>,
    write_radius: Option<u32>,
}

impl StageBuilder {
    /// Requires `stage` to be complete on every cell within `radius`.
    pub fn requires(mut self, stage: &str, radius: u32) -> Self {
        self.requirements.push((stage.to_string(), radius));
        self
    }

    /// Allows the transform to mutate neighbor content within `radius`.
    pub fn write_radius(mut self, radius: u32) -> Self {
        self.write_radius = Some(radius);
        self
    }

    /// Runs the transform again when the cell is loaded from storage.
    pub fn reload(mut self) -> Self {
        self.reload_requirements.get_or_insert_with(Vec::new);
        self
    }

    /// Like [`StageBuilder::reload`], with a neighbor requirement on load.
    pub fn reload_requires(mut self, stage: &str, radius: u32) -> Self {
        self.reload_requirements
            .get_or_insert_with(Vec::new)
            .push((stage.to_string(), radius));
        self
    }
}

/// Builder for [`StagePipeline`].
#[derive(Debug, Default)]
pub struct StagePipelineBuilder {
    stages: Vec<(String, StageBuilder)>,
}

impl StagePipelineBuilder {
    /// Appends a stage. The first stage becomes the base stage.
    pub fn stage(mut self, name: &str, configure: impl FnOnce(StageBuilder) -> StageBuilder) -> Self {
        self.stages
            .push((name.to_string(), configure(StageBuilder::default())));
        self
    }

    pub fn build(self) -> Result<StagePipeline, PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::Empty);
        }
        if self.stages.len() > StageId::MAX_INDEX + 1 {
            return Err(PipelineError::TooManyStages {
                max: StageId::MAX_INDEX + 1,
            });
        }

        let names: Vec<String> = self.stages.iter().map(|(n, _)| n.clone()).collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(PipelineError::DuplicateStage(name.clone()));
            }
        }

        let mut stages = Vec::with_capacity(self.stages.len());
        let mut generation: Vec<Arc<StageStep>> = Vec::with_capacity(self.stages.len());
        let mut loading: Vec<Arc<StageStep>> = Vec::with_capacity(self.stages.len());

        for (index, (name, builder)) in self.stages.iter().enumerate() {
            let id = StageId::new(index);
            let parent = id.parent();

            let gen_reqs = resolve(&names, index, &builder.requirements)?;
            let gen_step = build_step(
                id,
                PyramidKind::Generation,
                if parent.is_none() {
                    StepTask::Load
                } else {
                    StepTask::Transform
                },
                gen_reqs,
                &generation,
                builder.write_radius,
            );

            let (load_task, load_reqs) = match (&builder.reload_requirements, parent) {
                (_, None) => (StepTask::Load, Vec::new()),
                (Some(reqs), Some(_)) => (StepTask::Transform, resolve(&names, index, reqs)?),
                (None, Some(_)) => (StepTask::Passthrough, Vec::new()),
            };
            let load_step = build_step(
                id,
                PyramidKind::Loading,
                load_task,
                load_reqs,
                &loading,
                builder.write_radius,
            );

            let loading_radius = load_step.accumulated_radius_of(StageId::BASE);
            let generation_radius = gen_step.accumulated_radius_of(StageId::BASE);
            if loading_radius > generation_radius {
                return Err(PipelineError::LoadingRadiusExceeded {
                    stage: name.clone(),
                    loading: loading_radius,
                    generation: generation_radius,
                });
            }

            stages.push(StageDef {
                id,
                name: name.clone(),
                parent,
                transform_radius: gen_step.transform_radius(),
                write_radius: builder.write_radius,
            });
            generation.push(Arc::new(gen_step));
            loading.push(Arc::new(load_step));
        }

        Ok(StagePipeline {
            stages,
            generation: StagePyramid::new(PyramidKind::Generation, generation),
            loading: StagePyramid::new(PyramidKind::Loading, loading),
        })
    }
}

fn resolve(
    names: &[String],
    index: usize,
    requirements: &[(String, u32)],
) -> Result<Vec<(StageId, u32)>, PipelineError> {
    requirements
        .iter()
        .map(|(required, radius)| {
            let position = names.iter().position(|n| n == required).ok_or_else(|| {
                PipelineError::UnknownStage {
                    stage: names[index].clone(),
                    required: required.clone(),
                }
            })?;
            if position >= index {
                return Err(PipelineError::ForwardRequirement {
                    stage: names[index].clone(),
                    required: required.clone(),
                });
            }
            Ok((StageId::new(position), *radius))
        })
        .collect()
}

fn build_step(
    target: StageId,
    kind: PyramidKind,
    task: StepTask,
    mut requirements: Vec<(StageId, u32)>,
    earlier: &[Arc<StageStep>],
    write_radius: Option<u32>,
) -> StageStep {
    if let Some(parent) = target.parent() {
        requirements.push((parent, 0));
    }
    let direct = StageDependencies::from_requirements(&requirements);
    let accumulated =
        StageDependencies::accumulate(&direct, |stage| earlier[stage.index()].accumulated());
    StageStep::new(target, kind, task, direct, accumulated, write_radius)
}

// =============================================================================
// Stage Pipeline
// =============================================================================

/// Ordered stages with their generation and loading pyramids.
#[derive(Debug, Clone)]
pub struct StagePipeline {
    stages: Vec<StageDef>,
    generation: StagePyramid,
    loading: StagePyramid,
}

impl StagePipeline {
    pub fn builder() -> StagePipelineBuilder {
        StagePipelineBuilder::default()
    }

    /// A general-purpose terrain pipeline.
    pub fn standard() -> Self {
        let pipeline = Self::builder()
            .stage("empty", |s| s)
            .stage("layout", |s| s.reload())
            .stage("references", |s| s.requires("layout", 8))
            .stage("biomes", |s| s.requires("layout", 8))
            .stage("terrain", |s| s.requires("layout", 8).requires("biomes", 1))
            .stage("surface", |s| s.requires("layout", 8).requires("biomes", 1))
            .stage("carvers", |s| s.requires("layout", 8))
            .stage("features", |s| {
                s.requires("layout", 8).requires("carvers", 1).write_radius(1)
            })
            .stage("light_init", |s| s.reload())
            .stage("light", |s| s.requires("light_init", 1).reload_requires("light_init", 1))
            .stage("spawn", |s| s.requires("biomes", 1))
            .stage("full", |s| s.reload())
            .build();
        match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => unreachable!("standard pipeline is well-formed: {e}"),
        }
    }

    pub fn stages(&self) -> &[StageDef] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Last (most advanced) stage.
    pub fn top(&self) -> StageId {
        StageId::new(self.stages.len().saturating_sub(1))
    }

    pub fn contains(&self, stage: StageId) -> bool {
        stage.index() < self.stages.len()
    }

    pub fn stage(&self, stage: StageId) -> Option<&StageDef> {
        self.stages.get(stage.index())
    }

    pub fn by_name(&self, name: &str) -> Option<StageId> {
        self.stages.iter().find(|s| s.name == name).map(|s| s.id)
    }

    /// Display name of a stage, or `"?"` for stages outside the pipeline.
    pub fn name_of(&self, stage: StageId) -> &str {
        self.stage(stage).map(|s| s.name.as_str()).unwrap_or("?")
    }

    pub fn generation(&self) -> &StagePyramid {
        &self.generation
    }

    pub fn loading(&self) -> &StagePyramid {
        &self.loading
    }

    pub fn pyramid(&self, kind: PyramidKind) -> &StagePyramid {
        match kind {
            PyramidKind::Generation => &self.generation,
            PyramidKind::Loading => &self.loading,
        }
    }
}

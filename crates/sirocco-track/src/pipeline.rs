//! Checkpointed run pipeline.
//!
//! A run is a strict sequence of stages. Each stage reads its inputs from
//! the checkpoint record, computes its artifacts, and persists them together
//! with the advanced stage tag in one atomic batch. Nothing downstream reads
//! an artifact that was not durably written first, so a run killed at any
//! point resumes from the last completed boundary.

use sirocco_core::{
    build_annotations, AnnotationTable, Config, FrameSource, Reference, ReferenceSelection,
    ResultsBuffer, SortMode, WorldlineId,
};
use sirocco_io::{encode, CheckpointExt, CheckpointStore, IoError};
use sirocco_models::{similarity, thumbnail, ModelSpec, DEFAULT_SIDE};

use crate::driver::{track_all, TrackInputs};
use crate::error::TrackError;
use crate::springs::{mean_reference_positions, SpringNetwork};
use crate::tree::{active_frames, build_tree, linear_score, FrameTree};

/// Checkpoint record keys.
pub mod keys {
    /// Stage tag.
    pub const STATE: &str = "state";
    /// Package version that wrote the record.
    pub const VERSION: &str = "version";
    /// Validated run configuration.
    pub const ARGS: &str = "args";
    /// Provenance-filtered annotation table.
    pub const ANNOTATIONS: &str = "annotations";
    /// Resolved reference worldlines and root frames.
    pub const REFERENCE: &str = "reference";
    /// Dense results buffer.
    pub const RESULTS: &str = "results";
    /// Spring network.
    pub const SPRINGS: &str = "springs";
    /// Propagation forest.
    pub const TREE: &str = "tree";
    /// Descriptor geometry.
    pub const MODEL_SPEC: &str = "model_spec";
    /// Frames not yet solved, in no particular order.
    pub const REMAINING: &str = "remaining";
}

/// Stage tag of a run, advanced in strict forward order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum Stage {
    /// Record initialized, nothing computed.
    Init,
    /// Reference resolved, results buffer seeded.
    Load,
    /// Springs, tree, and model geometry built.
    Build,
    /// Frame traversal in progress.
    Track,
    /// Results sanitized and the checkpoint backed up.
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Load => "load",
            Stage::Build => "build",
            Stage::Track => "track",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Dataset-side inputs the pipeline does not own.
pub struct PipelineInputs<'a> {
    /// Frame provider.
    pub source: &'a dyn FrameSource,
    /// Raw annotation table, before provenance filtering.
    pub annotations: &'a AnnotationTable,
    /// Manual spring pairs as worldline id pairs, consulted only when
    /// `load_nn` is set.
    pub spring_pairs: Option<&'a [(u32, u32)]>,
}

/// Checkpointed tracking run.
pub struct Pipeline<'a> {
    store: &'a dyn CheckpointStore,
    config: Config,
    stage: Stage,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl<'a> Pipeline<'a> {
    /// Start a fresh run or pick up a checkpointed one.
    ///
    /// With `resume`, the stage tag and the configuration come from the
    /// record; the supplied configuration is ignored so a resumed run keeps
    /// the exact knobs it started with. Without `resume`, the record is
    /// cleared and re-initialized from the supplied configuration.
    ///
    /// # Errors
    ///
    /// Resuming from a record without a stage tag fails with
    /// [`IoError::CheckpointEmpty`]; configuration validation errors are
    /// fatal either way.
    pub fn new(
        store: &'a dyn CheckpointStore,
        config: Config,
        resume: bool,
    ) -> Result<Self, TrackError> {
        let version = env!("CARGO_PKG_VERSION").to_string();
        if resume {
            let stage: Stage = store
                .get(keys::STATE)?
                .ok_or(IoError::CheckpointEmpty)?;
            let config: Config = store.require(keys::ARGS)?;
            if let Some(saved) = store.get::<String>(keys::VERSION)? {
                if saved != version {
                    log::warn!("checkpoint was written by version {saved}, this is {version}");
                }
            }
            log::info!("resuming from stage {stage}");
            Ok(Self {
                store,
                config,
                stage,
            })
        } else {
            let config = config.validated()?;
            store.clear()?;
            store.update_raw(vec![
                (keys::STATE.to_string(), encode(&Stage::Init)?),
                (keys::VERSION.to_string(), encode(&version)?),
                (keys::ARGS.to_string(), encode(&config)?),
            ])?;
            Ok(Self {
                store,
                config,
                stage: Stage::Init,
            })
        }
    }

    /// Current stage tag.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Configuration governing this run.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every stage still ahead of the checkpointed one.
    ///
    /// # Errors
    ///
    /// Stops at the first failing stage; completed stages stay persisted.
    pub fn run(&mut self, inputs: &PipelineInputs<'_>) -> Result<(), TrackError> {
        loop {
            match self.stage {
                Stage::Init => self.stage_load(inputs)?,
                Stage::Load => self.stage_build(inputs)?,
                Stage::Build | Stage::Track => self.stage_track(inputs)?,
                Stage::Done => {
                    log::info!("run complete");
                    return Ok(());
                }
            }
        }
    }

    /// Filter annotations, resolve the reference, and seed the results
    /// buffer with the root rows.
    ///
    /// # Errors
    ///
    /// Reference resolution errors (no usable reference frames, out-of-range
    /// selections) are fatal.
    pub fn stage_load(&mut self, inputs: &PipelineInputs<'_>) -> Result<(), TrackError> {
        let filtered = inputs.annotations.filtered(
            self.config.exclude_self,
            self.config.exclusive_prov.as_deref(),
        );
        let selection = ReferenceSelection {
            t_ref: self.config.t_ref.clone(),
            wlid_ref: self
                .config
                .wlid_ref
                .as_ref()
                .map(|ids| ids.iter().copied().map(WorldlineId).collect()),
            n_ref: self.config.n_ref,
        };
        let (reference, results) = build_annotations(&filtered, &selection, inputs.source.len())?;
        log::info!(
            "tracking {} worldlines from {} root frame(s)",
            reference.worldlines.len(),
            reference.roots.len()
        );
        self.store.update_raw(vec![
            (keys::ANNOTATIONS.to_string(), encode(&filtered)?),
            (keys::REFERENCE.to_string(), encode(&reference)?),
            (keys::RESULTS.to_string(), encode(&results)?),
            (keys::STATE.to_string(), encode(&Stage::Load)?),
        ])?;
        self.stage = Stage::Load;
        Ok(())
    }

    /// Build the spring network, the propagation forest, and the descriptor
    /// geometry.
    ///
    /// # Errors
    ///
    /// Unknown worldlines in a manual spring pair list and out-of-range
    /// frame selections are fatal.
    pub fn stage_build(&mut self, inputs: &PipelineInputs<'_>) -> Result<(), TrackError> {
        let reference: Reference = self.store.require(keys::REFERENCE)?;
        let results: ResultsBuffer = self.store.require(keys::RESULTS)?;
        let n_frames = inputs.source.len();

        let geometry = mean_reference_positions(&results, &reference.roots);
        let springs = match inputs.spring_pairs {
            Some(pairs) if self.config.load_nn => {
                let mut index_pairs = Vec::with_capacity(pairs.len());
                for &(a, b) in pairs {
                    let a = reference
                        .index_of(WorldlineId(a))
                        .ok_or(TrackError::UnknownWorldline(a))?;
                    let b = reference
                        .index_of(WorldlineId(b))
                        .ok_or(TrackError::UnknownWorldline(b))?;
                    index_pairs.push((a, b));
                }
                SpringNetwork::from_pairs(&geometry, &index_pairs, self.config.nn_max)?
            }
            _ => {
                if self.config.load_nn {
                    log::warn!(
                        "spring pair loading requested but no pair list found, \
                         using nearest neighbors"
                    );
                }
                SpringNetwork::build(&geometry, self.config.nn_max)
            }
        };
        log::info!("spring network holds {} edges", springs.edges().len());

        let active = active_frames(
            n_frames,
            &reference.roots,
            self.config.t_ignore.as_deref(),
            self.config.t_track.as_deref(),
        )?;
        let tree = match self.config.sort_mode {
            SortMode::Linear => build_tree(n_frames, &reference.roots, &active, linear_score),
            SortMode::Similarity => {
                let mut thumbs: Vec<Option<Vec<f32>>> = vec![None; n_frames];
                for &t in &active {
                    let vol = inputs.source.frame(t)?.into_normalized(self.config.gamma);
                    thumbs[t] = Some(thumbnail(&vol, DEFAULT_SIDE));
                }
                build_tree(n_frames, &reference.roots, &active, |c, p| {
                    match (&thumbs[c], &thumbs[p]) {
                        (Some(a), Some(b)) => similarity(a, b),
                        _ => f32::NEG_INFINITY,
                    }
                })
            }
        };
        let remaining: Vec<u32> = tree.order.clone();

        self.store.update_raw(vec![
            (keys::SPRINGS.to_string(), encode(&springs)?),
            (keys::TREE.to_string(), encode(&tree)?),
            (
                keys::MODEL_SPEC.to_string(),
                encode(&ModelSpec::from_config(&self.config))?,
            ),
            (keys::REMAINING.to_string(), encode(&remaining)?),
            (keys::STATE.to_string(), encode(&Stage::Build)?),
        ])?;
        self.stage = Stage::Build;
        Ok(())
    }

    /// Solve every remaining frame, sanitize the buffer, and close the run.
    ///
    /// The stage tag moves to `Track` before the first frame so an
    /// interrupted traversal resumes here, and to `Done` only after the
    /// sanitized buffer is persisted.
    ///
    /// # Errors
    ///
    /// Frame loading, scoring, and persistence errors abort the traversal;
    /// the frames solved so far stay checkpointed.
    pub fn stage_track(&mut self, inputs: &PipelineInputs<'_>) -> Result<(), TrackError> {
        let annotations: AnnotationTable = self.store.require(keys::ANNOTATIONS)?;
        let reference: Reference = self.store.require(keys::REFERENCE)?;
        let mut results: ResultsBuffer = self.store.require(keys::RESULTS)?;
        let springs: SpringNetwork = self.store.require(keys::SPRINGS)?;
        let tree: FrameTree = self.store.require(keys::TREE)?;
        let spec: ModelSpec = self.store.require(keys::MODEL_SPEC)?;
        let mut remaining: Vec<u32> = self.store.require(keys::REMAINING)?;

        if self.stage == Stage::Build {
            self.store.update(keys::STATE, &Stage::Track)?;
            self.stage = Stage::Track;
        }

        let track_inputs = TrackInputs {
            config: &self.config,
            source: inputs.source,
            annotations: &annotations,
            reference: &reference,
            tree: &tree,
            springs: &springs,
            spec,
        };
        track_all(&track_inputs, &mut results, &mut remaining, self.store)?;

        let dirty = results.sanitize();
        if !dirty.is_empty() {
            log::warn!(
                "zeroed non-finite positions in {} frame(s): {:?}",
                dirty.len(),
                dirty
            );
        }
        self.store.update_raw(vec![
            (keys::RESULTS.to_string(), encode(&results)?),
            (keys::STATE.to_string(), encode(&Stage::Done)?),
        ])?;
        self.stage = Stage::Done;
        self.store.snapshot_backup()?;
        Ok(())
    }
}

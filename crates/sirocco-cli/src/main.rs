use std::path::PathBuf;

use argh::FromArgs;
use sirocco::core::{
    parse_frame_list, parse_worldline_list, Config, Device, Reference, ResultsBuffer, SaveMode,
    SortMode, SpringMode,
};
use sirocco::io::{
    load_annotations, load_args, load_frames, load_spring_pairs, save_annotations, save_args,
    CheckpointExt, FsCheckpoint,
};
use sirocco::track::pipeline::keys;
use sirocco::track::{Pipeline, PipelineInputs};

/// Tracks annotated keypoints across the frames of a recording
#[derive(Debug, FromArgs)]
struct Args {
    /// dataset directory holding frames, annotations, and the checkpoint
    #[argh(option)]
    dataset: String,

    /// resume from the dataset checkpoint
    #[argh(option, default = "false")]
    load_checkpoint: bool,

    /// reuse the args saved by a previous session
    #[argh(option, default = "false")]
    load_args: bool,

    /// color channel to extract from multi-channel sources
    #[argh(option)]
    channel: Option<usize>,

    /// optimize an in-plane rotation per keypoint
    #[argh(option, default = "false")]
    allow_rotation: bool,

    /// component-wise gradient clip magnitude, negative for uncapped
    #[argh(option, default = "1.0")]
    clip_grad: f32,

    /// request the compute accelerator when available
    #[argh(option, default = "true")]
    cuda: bool,

    /// descriptor grid brightness outside the fovea
    #[argh(option, default = "0.1")]
    dimmer_ratio: f32,

    /// drop annotations carrying this tracker's own provenance
    #[argh(option, default = "true")]
    exclude_self: bool,

    /// keep only annotations with exactly this provenance
    #[argh(option)]
    exclusive_prov: Option<String>,

    /// gaussian fovea radii as "z,y,x", any negative disables the mask
    #[argh(option, default = "[1.0, 2.5, 2.5]", from_str_fn(triple_f32))]
    fovea_sigma: [f32; 3],

    /// gamma correction exponent for frame normalization
    #[argh(option, default = "2.0")]
    gamma: f32,

    /// descriptor grid extents as "z,y,x" voxels
    #[argh(option, default = "[5, 25, 25]", from_str_fn(triple_usize))]
    grid_shape: [usize; 3],

    /// carry untracked input annotations through to the saved table
    #[argh(option, default = "true")]
    include_all: bool,

    /// weight of the detection term, non-positive disables it
    #[argh(option, default = "-1.0")]
    lambda_d: f32,

    /// weight of the spring term, non-positive disables it
    #[argh(option, default = "1.0")]
    lambda_n: f32,

    /// spring term form, "disp" or "norm"
    #[argh(option, default = "SpringMode::Disp", from_str_fn(spring_mode))]
    lambda_n_mode: SpringMode,

    /// weight of the temporal term, non-positive disables it
    #[argh(option, default = "-1.0")]
    lambda_t: f32,

    /// load a manual spring connection list from the dataset when present
    #[argh(option, default = "true")]
    load_nn: bool,

    /// upper clamp for per-keypoint learning rates
    #[argh(option, default = "0.2")]
    lr_ceiling: f32,

    /// scale from mean spring rest-length to initial learning rate
    #[argh(option, default = "2.0")]
    lr_coef: f32,

    /// lower clamp for per-keypoint learning rates
    #[argh(option, default = "0.02")]
    lr_floor: f32,

    /// seed initial guesses from partial annotations via a displacement field
    #[argh(option, default = "false")]
    motion_predict: bool,

    /// sequential keypoint sub-batches per scoring pass
    #[argh(option, default = "10")]
    n_chunks: usize,

    /// gradient-descent epochs per frame
    #[argh(option, default = "40")]
    n_epoch: usize,

    /// detection-phase epochs per frame
    #[argh(option, default = "10")]
    n_epoch_d: usize,

    /// temporal window length in preceding tracked frames
    #[argh(option, default = "1")]
    n_frame: usize,

    /// pick the reference frame holding exactly this many annotations
    #[argh(option)]
    n_ref: Option<usize>,

    /// neighbor count per keypoint when building the spring network
    #[argh(option, default = "5")]
    nn_max: usize,

    /// how tracked annotations merge back, "overwrite" or "append"
    #[argh(option, default = "SaveMode::Overwrite", from_str_fn(save_mode))]
    save_mode: SaveMode,

    /// frame tree ordering, "similarity" or "linear"
    #[argh(option, default = "SortMode::Similarity", from_str_fn(sort_mode))]
    sort_mode: SortMode,

    /// frames to exclude from tracking, as "1,4-8,12"
    #[argh(option, from_str_fn(frame_list))]
    t_ignore: Option<Vec<usize>>,

    /// reference frame candidates, as "0,10-12"
    #[argh(option, from_str_fn(frame_list))]
    t_ref: Option<Vec<usize>>,

    /// frames to track, replaces the ignore list, as "100-200,210"
    #[argh(option, from_str_fn(frame_list))]
    t_track: Option<Vec<usize>>,

    /// worldlines to track, as "3,7-9"
    #[argh(option, from_str_fn(worldline_list))]
    wlid_ref: Option<Vec<u32>>,

    /// extra z-only epochs for volumetric frames, non-positive disables
    #[argh(option, default = "-1.0")]
    z_compensator: f32,
}

fn triple_f32(value: &str) -> Result<[f32; 3], String> {
    let parts: Vec<f32> = value
        .split(',')
        .map(|p| p.trim().parse().map_err(|e| format!("{e}")))
        .collect::<Result<_, _>>()?;
    parts
        .try_into()
        .map_err(|_| "expected exactly three comma-separated values".to_string())
}

fn triple_usize(value: &str) -> Result<[usize; 3], String> {
    let parts: Vec<usize> = value
        .split(',')
        .map(|p| p.trim().parse().map_err(|e| format!("{e}")))
        .collect::<Result<_, _>>()?;
    parts
        .try_into()
        .map_err(|_| "expected exactly three comma-separated values".to_string())
}

fn spring_mode(value: &str) -> Result<SpringMode, String> {
    value.parse().map_err(|e| format!("{e}"))
}

fn save_mode(value: &str) -> Result<SaveMode, String> {
    value.parse().map_err(|e| format!("{e}"))
}

fn sort_mode(value: &str) -> Result<SortMode, String> {
    value.parse().map_err(|e| format!("{e}"))
}

fn frame_list(value: &str) -> Result<Vec<usize>, String> {
    parse_frame_list(value).map_err(|e| format!("{e}"))
}

fn worldline_list(value: &str) -> Result<Vec<u32>, String> {
    parse_worldline_list(value).map_err(|e| format!("{e}"))
}

impl Args {
    fn to_config(&self) -> Config {
        Config {
            channel: self.channel,
            allow_rotation: self.allow_rotation,
            use_accelerator: self.cuda,
            clip_grad: self.clip_grad,
            dimmer_ratio: self.dimmer_ratio,
            exclude_self: self.exclude_self,
            exclusive_prov: self.exclusive_prov.clone(),
            fovea_sigma: self.fovea_sigma,
            gamma: self.gamma,
            grid_shape: self.grid_shape,
            include_all: self.include_all,
            lambda_d: self.lambda_d,
            lambda_n: self.lambda_n,
            lambda_n_mode: self.lambda_n_mode,
            lambda_t: self.lambda_t,
            load_nn: self.load_nn,
            lr_ceiling: self.lr_ceiling,
            lr_coef: self.lr_coef,
            lr_floor: self.lr_floor,
            motion_predict: self.motion_predict,
            n_chunks: self.n_chunks,
            n_epoch: self.n_epoch,
            n_epoch_d: self.n_epoch_d,
            n_frame: self.n_frame,
            n_ref: self.n_ref,
            nn_max: self.nn_max,
            save_mode: self.save_mode,
            sort_mode: self.sort_mode,
            t_ignore: self.t_ignore.clone(),
            t_ref: self.t_ref.clone(),
            t_track: self.t_track.clone(),
            wlid_ref: self.wlid_ref.clone(),
            z_compensator: self.z_compensator,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();
    let dataset = PathBuf::from(&args.dataset);

    let mut config = args.to_config();
    if args.load_args && !args.load_checkpoint {
        match load_args(&dataset)? {
            Some(saved) => {
                log::info!("using the args saved by the previous session");
                config = saved;
            }
            None => log::warn!("no saved args found, using the command line"),
        }
    }

    // On resume the checkpointed args are authoritative, so the compute
    // device and the frame channel come from the pipeline's config.
    let store = FsCheckpoint::open(&dataset)?;
    let mut pipeline = Pipeline::new(&store, config, args.load_checkpoint)?;

    let device = Device::probe(pipeline.config().use_accelerator);
    log::info!("compute device: {device}");

    let source = load_frames(&dataset, pipeline.config().channel)?;
    let annotations = load_annotations(&dataset)?;
    let spring_pairs = load_spring_pairs(&dataset)?;
    let inputs = PipelineInputs {
        source: &source,
        annotations: &annotations,
        spring_pairs: spring_pairs.as_deref(),
    };
    pipeline.run(&inputs)?;

    let results: ResultsBuffer = store.require(keys::RESULTS)?;
    let reference: Reference = store.require(keys::REFERENCE)?;
    save_annotations(
        &dataset,
        &annotations,
        &reference,
        &results,
        pipeline.config().save_mode,
        pipeline.config().include_all,
    )?;
    save_args(&dataset, pipeline.config())?;
    log::info!("results saved to {}", dataset.display());
    Ok(())
}

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Ordering used when building the frame tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Attach frames by thumbnail similarity.
    Similarity,
    /// Attach frames by temporal proximity.
    Linear,
}

impl std::str::FromStr for SortMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "similarity" => Ok(SortMode::Similarity),
            "linear" => Ok(SortMode::Linear),
            _ => Err(CoreError::InvalidConfig(format!(
                "unknown sort mode {s:?}, expected \"similarity\" or \"linear\""
            ))),
        }
    }
}

/// Form of the spring regularization term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "lowercase")]
pub enum SpringMode {
    /// Penalize deviation from the rest displacement vector.
    Disp,
    /// Penalize deviation from the rest length only.
    Norm,
}

impl std::str::FromStr for SpringMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disp" => Ok(SpringMode::Disp),
            "norm" => Ok(SpringMode::Norm),
            _ => Err(CoreError::InvalidConfig(format!(
                "unknown spring mode {s:?}, expected \"disp\" or \"norm\""
            ))),
        }
    }
}

/// How tracked annotations are merged back into the annotation table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Replace previously tracked annotations.
    Overwrite,
    /// Keep everything and append the new annotations.
    Append,
}

impl std::str::FromStr for SaveMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "o" | "overwrite" => Ok(SaveMode::Overwrite),
            "a" | "append" => Ok(SaveMode::Append),
            _ => Err(CoreError::InvalidConfig(format!(
                "unknown save mode {s:?}, expected \"o\"/\"overwrite\" or \"a\"/\"append\""
            ))),
        }
    }
}

/// Every knob of a tracking session, validated once up front.
///
/// Defaults mirror the established option surface of the tracker. All frame
/// and worldline selections are already parsed into index lists; `None` means
/// the option was not given.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct Config {
    /// Color channel to extract from multi-channel sources.
    pub channel: Option<usize>,
    /// Optimize an in-plane rotation per keypoint alongside its position.
    pub allow_rotation: bool,
    /// Request the compute accelerator when available.
    pub use_accelerator: bool,
    /// Component-wise gradient clip magnitude. Negative leaves gradients
    /// uncapped.
    pub clip_grad: f32,
    /// Brightness of the descriptor grid outside the fovea, in `[0, 1]`.
    pub dimmer_ratio: f32,
    /// Drop annotations carrying this tracker's own provenance at load.
    pub exclude_self: bool,
    /// Keep only annotations with exactly this provenance at load.
    pub exclusive_prov: Option<String>,
    /// Gaussian fovea radii `(z, y, x)` in voxels. Any negative component
    /// disables the fovea mask.
    pub fovea_sigma: [f32; 3],
    /// Gamma correction exponent applied when frames are normalized.
    pub gamma: f32,
    /// Descriptor grid extents `(z, y, x)` in voxels. Extents are forced odd
    /// so the grid stays centered.
    pub grid_shape: [usize; 3],
    /// Carry untracked input annotations through to the saved table.
    pub include_all: bool,
    /// Weight of the detection term. Non-positive disables it.
    pub lambda_d: f32,
    /// Weight of the spring term. Non-positive disables it.
    pub lambda_n: f32,
    /// Form of the spring term.
    pub lambda_n_mode: SpringMode,
    /// Weight of the temporal term. Non-positive disables it.
    pub lambda_t: f32,
    /// Load a manual spring connection list from the dataset when present.
    pub load_nn: bool,
    /// Upper clamp for per-keypoint learning rates.
    pub lr_ceiling: f32,
    /// Scale from mean spring rest-length to initial learning rate.
    pub lr_coef: f32,
    /// Lower clamp for per-keypoint learning rates.
    pub lr_floor: f32,
    /// Seed initial guesses from partial annotations via a displacement
    /// field.
    pub motion_predict: bool,
    /// Number of sequential keypoint sub-batches per scoring pass.
    pub n_chunks: usize,
    /// Gradient-descent epochs per frame.
    pub n_epoch: usize,
    /// Detection-phase epochs per frame. Forced to 0 when the detection term
    /// is disabled.
    pub n_epoch_d: usize,
    /// Temporal window length in preceding tracked frames.
    pub n_frame: usize,
    /// Pick the reference frame holding exactly this many annotations.
    pub n_ref: Option<usize>,
    /// Neighbor count per keypoint when building the spring network.
    pub nn_max: usize,
    /// How tracked annotations are merged back into the table.
    pub save_mode: SaveMode,
    /// Ordering used when building the frame tree.
    pub sort_mode: SortMode,
    /// Frames excluded from tracking.
    pub t_ignore: Option<Vec<usize>>,
    /// Reference frame candidates.
    pub t_ref: Option<Vec<usize>>,
    /// Frames to track. Replaces `t_ignore` when both are given.
    pub t_track: Option<Vec<usize>>,
    /// Worldlines to track.
    pub wlid_ref: Option<Vec<u32>>,
    /// Extra z-only epochs for volumetric frames, rounded to a count.
    /// Non-positive disables them.
    pub z_compensator: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel: None,
            allow_rotation: false,
            use_accelerator: true,
            clip_grad: 1.0,
            dimmer_ratio: 0.1,
            exclude_self: true,
            exclusive_prov: None,
            fovea_sigma: [1.0, 2.5, 2.5],
            gamma: 2.0,
            grid_shape: [5, 25, 25],
            include_all: true,
            lambda_d: -1.0,
            lambda_n: 1.0,
            lambda_n_mode: SpringMode::Disp,
            lambda_t: -1.0,
            load_nn: true,
            lr_ceiling: 0.2,
            lr_coef: 2.0,
            lr_floor: 0.02,
            motion_predict: false,
            n_chunks: 10,
            n_epoch: 40,
            n_epoch_d: 10,
            n_frame: 1,
            n_ref: None,
            nn_max: 5,
            save_mode: SaveMode::Overwrite,
            sort_mode: SortMode::Similarity,
            t_ignore: None,
            t_ref: None,
            t_track: None,
            wlid_ref: None,
            z_compensator: -1.0,
        }
    }
}

fn check_finite(name: &str, val: f32) -> Result<(), CoreError> {
    if !val.is_finite() {
        return Err(CoreError::InvalidConfig(format!(
            "{name} must be finite, got {val}"
        )));
    }
    Ok(())
}

fn check_nonempty<T>(name: &str, list: &Option<Vec<T>>) -> Result<(), CoreError> {
    if let Some(list) = list {
        if list.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "{name} was given but selects no indices"
            )));
        }
    }
    Ok(())
}

impl Config {
    /// Validate the configuration and normalize derived fields.
    ///
    /// Grid extents are forced odd and `n_epoch_d` is zeroed when the
    /// detection term is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first offending
    /// field.
    pub fn validated(mut self) -> Result<Self, CoreError> {
        check_finite("gamma", self.gamma)?;
        if self.gamma <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "gamma must be positive, got {}",
                self.gamma
            )));
        }
        for (name, val) in [
            ("lambda_d", self.lambda_d),
            ("lambda_n", self.lambda_n),
            ("lambda_t", self.lambda_t),
            ("lr_ceiling", self.lr_ceiling),
            ("lr_coef", self.lr_coef),
            ("lr_floor", self.lr_floor),
            ("dimmer_ratio", self.dimmer_ratio),
        ] {
            check_finite(name, val)?;
        }
        if self.clip_grad.is_nan() || self.z_compensator.is_nan() {
            return Err(CoreError::InvalidConfig(
                "clip_grad and z_compensator must not be NaN".to_string(),
            ));
        }
        for sigma in self.fovea_sigma {
            if sigma.is_nan() {
                return Err(CoreError::InvalidConfig(
                    "fovea_sigma components must not be NaN".to_string(),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.dimmer_ratio) {
            return Err(CoreError::InvalidConfig(format!(
                "dimmer_ratio must lie in [0, 1], got {}",
                self.dimmer_ratio
            )));
        }
        if self.lr_coef <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "lr_coef must be positive, got {}",
                self.lr_coef
            )));
        }
        if self.lr_floor <= 0.0 || self.lr_floor > self.lr_ceiling {
            return Err(CoreError::InvalidConfig(format!(
                "learning rate clamps must satisfy 0 < lr_floor <= lr_ceiling, got [{}, {}]",
                self.lr_floor, self.lr_ceiling
            )));
        }
        if self.grid_shape.iter().any(|&g| g == 0) {
            return Err(CoreError::InvalidConfig(format!(
                "grid_shape extents must be positive, got {:?}",
                self.grid_shape
            )));
        }
        for g in self.grid_shape.iter_mut() {
            *g = 2 * (*g / 2) + 1;
        }
        if self.n_chunks == 0 {
            return Err(CoreError::InvalidConfig(
                "n_chunks must be at least 1".to_string(),
            ));
        }
        if self.n_frame == 0 {
            return Err(CoreError::InvalidConfig(
                "n_frame must be at least 1".to_string(),
            ));
        }
        if self.n_ref == Some(0) {
            return Err(CoreError::InvalidConfig(
                "n_ref must be at least 1".to_string(),
            ));
        }
        check_nonempty("t_ignore", &self.t_ignore)?;
        check_nonempty("t_ref", &self.t_ref)?;
        check_nonempty("t_track", &self.t_track)?;
        check_nonempty("wlid_ref", &self.wlid_ref)?;
        if self.lambda_d <= 0.0 {
            self.n_epoch_d = 0;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn defaults_validate() {
        let config = Config::default().validated().unwrap();
        assert_eq!(config.grid_shape, [5, 25, 25]);
        // lambda_d defaults off, so the detection phase is dropped.
        assert_eq!(config.n_epoch_d, 0);
    }

    #[test]
    fn detection_phase_survives_when_enabled() {
        let config = Config {
            lambda_d: 1.0,
            ..Config::default()
        }
        .validated()
        .unwrap();
        assert_eq!(config.n_epoch_d, 10);
    }

    #[test]
    fn even_grid_extents_are_forced_odd() {
        let config = Config {
            grid_shape: [4, 24, 24],
            ..Config::default()
        }
        .validated()
        .unwrap();
        assert_eq!(config.grid_shape, [5, 25, 25]);
    }

    #[test]
    fn rejects_bad_gamma() {
        let err = Config {
            gamma: 0.0,
            ..Config::default()
        }
        .validated()
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_inverted_lr_clamps() {
        let config = Config {
            lr_floor: 0.5,
            lr_ceiling: 0.1,
            ..Config::default()
        };
        assert!(config.validated().is_err());
    }

    #[test]
    fn rejects_empty_selection() {
        let config = Config {
            t_track: Some(vec![]),
            ..Config::default()
        };
        assert!(config.validated().is_err());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(SortMode::from_str("linear").unwrap(), SortMode::Linear);
        assert_eq!(SpringMode::from_str("norm").unwrap(), SpringMode::Norm);
        assert_eq!(SaveMode::from_str("o").unwrap(), SaveMode::Overwrite);
        assert_eq!(SaveMode::from_str("append").unwrap(), SaveMode::Append);
        assert!(SortMode::from_str("Similarity").is_err());
    }
}

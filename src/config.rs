use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default glob patterns used to discover images under a root directory.
pub const DEFAULT_GLOBS: [&str; 3] = ["*.jpg", "*.jpeg", "*.JPG"];

/// SuperPoint keypoints are located on a grid whose cells span 8 image pixels.
pub const SUPERPOINT_CELL_SIZE: usize = 8;

/// Interpolation policy used when resizing images during preprocessing.
///
/// `Area` is the area-averaging family: it produces the best results when
/// shrinking, and falls back to linear interpolation when enlarging, where
/// area resampling degenerates. The remaining variants are general-purpose
/// resampling filters applied as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Area,
    Nearest,
    Linear,
    Cubic,
    Lanczos,
}

impl FromStr for Interpolation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "area" => Ok(Interpolation::Area),
            "nearest" => Ok(Interpolation::Nearest),
            "linear" => Ok(Interpolation::Linear),
            "cubic" => Ok(Interpolation::Cubic),
            "lanczos" => Ok(Interpolation::Lanczos),
            other => Err(Error::UnknownInterpolation(other.to_string())),
        }
    }
}

/// How images read from disk are turned into model input tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    pub globs: Vec<String>,
    pub grayscale: bool,
    pub resize_max: Option<u32>,
    pub resize_force: bool,
    pub interpolation: Interpolation,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        PreprocessingConfig {
            globs: DEFAULT_GLOBS.iter().map(|g| g.to_string()).collect(),
            grayscale: false,
            resize_max: None,
            resize_force: false,
            interpolation: Interpolation::Area,
        }
    }
}

/// Caller-supplied overrides for [`PreprocessingConfig`]. Fields left as
/// `None` keep the canonical default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreprocessingOverrides {
    pub globs: Option<Vec<String>>,
    pub grayscale: Option<bool>,
    pub resize_max: Option<u32>,
    pub resize_force: Option<bool>,
    pub interpolation: Option<Interpolation>,
}

impl PreprocessingConfig {
    /// Overlays the supplied overrides onto this configuration.
    pub fn overlay(mut self, overrides: PreprocessingOverrides) -> Self {
        if let Some(globs) = overrides.globs {
            self.globs = globs;
        }
        if let Some(grayscale) = overrides.grayscale {
            self.grayscale = grayscale;
        }
        if let Some(resize_max) = overrides.resize_max {
            self.resize_max = Some(resize_max);
        }
        if let Some(resize_force) = overrides.resize_force {
            self.resize_force = resize_force;
        }
        if let Some(interpolation) = overrides.interpolation {
            self.interpolation = interpolation;
        }
        self
    }
}

/// SuperPoint detection parameters. The network itself is an ONNX graph;
/// these control the post-processing applied to its dense outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperPointConfig {
    pub nms_radius: usize,
    pub keypoint_threshold: f32,
    /// `None` keeps every detection that survives suppression.
    pub max_keypoints: Option<usize>,
    pub remove_borders: usize,
    /// Selects the corrected descriptor sampling. The legacy sampling is the
    /// default so that features stay comparable with existing evaluations.
    pub fix_sampling: bool,
    pub weights: PathBuf,
}

impl Default for SuperPointConfig {
    fn default() -> Self {
        SuperPointConfig {
            nms_radius: 4,
            keypoint_threshold: 0.005,
            max_keypoints: None,
            remove_borders: 4,
            fix_sampling: false,
            weights: Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("models")
                .join("superpoint.onnx"),
        }
    }
}

/// Extractor configuration, tagged by model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ModelConfig {
    Superpoint(SuperPointConfig),
}

impl ModelConfig {
    /// Canonical key used to memoize warm extractor instances.
    pub fn cache_key(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::ConfigKey)
    }
}

/// A named extraction configuration: the basename of the feature file it
/// produces, the extractor to run, and how images are preprocessed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub output: String,
    pub model: ModelConfig,
    pub preprocessing: PreprocessingConfig,
}

/// Names of the standard configurations selectable from the command line.
pub const PRESET_NAMES: [&str; 3] = ["superpoint_aachen", "superpoint_max", "superpoint_inloc"];

/// Looks up one of the standard extraction configurations by name.
pub fn preset(name: &str) -> Result<ExtractionConfig> {
    let superpoint = |nms_radius, max_keypoints| {
        ModelConfig::Superpoint(SuperPointConfig {
            nms_radius,
            max_keypoints: Some(max_keypoints),
            ..SuperPointConfig::default()
        })
    };
    let preprocessing = |resize_max, resize_force| {
        PreprocessingConfig::default().overlay(PreprocessingOverrides {
            grayscale: Some(true),
            resize_max: Some(resize_max),
            resize_force: Some(resize_force),
            ..PreprocessingOverrides::default()
        })
    };
    match name {
        "superpoint_aachen" => Ok(ExtractionConfig {
            output: "feats-superpoint-n4096-r1024".to_string(),
            model: superpoint(3, 4096),
            preprocessing: preprocessing(1024, false),
        }),
        // Resizes images to 1600px even if they are originally smaller.
        // Improves the keypoint localization if the images are of good quality.
        "superpoint_max" => Ok(ExtractionConfig {
            output: "feats-superpoint-n4096-rmax1600".to_string(),
            model: superpoint(3, 4096),
            preprocessing: preprocessing(1600, true),
        }),
        "superpoint_inloc" => Ok(ExtractionConfig {
            output: "feats-superpoint-n4096-r1600".to_string(),
            model: superpoint(4, 4096),
            preprocessing: preprocessing(1600, false),
        }),
        other => Err(Error::UnknownPreset(other.to_string())),
    }
}

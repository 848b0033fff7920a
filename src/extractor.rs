//! The capability boundary between the extraction pipeline and the models
//! that produce features, plus the registry that keeps warm instances.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use half::f16;
use ndarray::{ArrayD, ArrayView4, Axis};

use crate::config::ModelConfig;
use crate::error::Result;
use crate::superpoint::SuperPoint;

/// A named output array of an extractor. The variants mirror the dtypes the
/// feature store persists: float32, float16, and int64.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureArray {
    F32(ArrayD<f32>),
    F16(ArrayD<f16>),
    I64(ArrayD<i64>),
}

impl FeatureArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            FeatureArray::F32(a) => a.shape(),
            FeatureArray::F16(a) => a.shape(),
            FeatureArray::I64(a) => a.shape(),
        }
    }

    /// Removes the leading singleton batch dimension extractors emit.
    pub fn strip_batch(self) -> FeatureArray {
        match self {
            FeatureArray::F32(a) => FeatureArray::F32(a.index_axis_move(Axis(0), 0)),
            FeatureArray::F16(a) => FeatureArray::F16(a.index_axis_move(Axis(0), 0)),
            FeatureArray::I64(a) => FeatureArray::I64(a.index_axis_move(Axis(0), 0)),
        }
    }

    /// Downcasts float32 data to half precision. Every other dtype is
    /// returned unchanged.
    pub fn into_half(self) -> FeatureArray {
        match self {
            FeatureArray::F32(a) => FeatureArray::F16(a.mapv(f16::from_f32)),
            other => other,
        }
    }
}

/// The named output arrays of one extractor invocation.
pub type Prediction = BTreeMap<String, FeatureArray>;

/// A feature computation unit. Implementations receive a single-image batch
/// (leading dimension 1) and return named output arrays carrying the same
/// leading batch dimension.
pub trait Extractor {
    fn apply(&self, image: ArrayView4<'_, f32>) -> Result<Prediction>;

    /// Intrinsic keypoint localization noise, in pixels of the model's
    /// input resolution.
    fn detection_noise(&self) -> f32 {
        1.0
    }
}

/// Resolves extractor configurations to ready-to-run instances.
pub trait ModelLoader {
    fn load(&mut self, conf: &ModelConfig) -> Result<Arc<dyn Extractor>>;
}

/// Loads ONNX-backed extractors, memoizing warm instances by their
/// canonicalized configuration so identical configurations share a session.
/// Owned by the run that created it; pass the same loader across runs to
/// reuse sessions between them.
#[derive(Default)]
pub struct OnnxLoader {
    cache: HashMap<String, Arc<dyn Extractor>>,
}

impl OnnxLoader {
    pub fn new() -> Self {
        OnnxLoader::default()
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&mut self, conf: &ModelConfig) -> Result<Arc<dyn Extractor>> {
        let key = conf.cache_key()?;
        if let Some(model) = self.cache.get(&key) {
            return Ok(Arc::clone(model));
        }
        let model: Arc<dyn Extractor> = match conf {
            ModelConfig::Superpoint(sp) => Arc::new(SuperPoint::load(sp)?),
        };
        self.cache.insert(key, Arc::clone(&model));
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn strip_batch_removes_leading_dimension() {
        let batched = FeatureArray::F32(array![[[1., 2.], [3., 4.]]].into_dyn());
        let stripped = batched.strip_batch();
        assert_eq!(stripped.shape(), &[2, 2]);
    }

    #[test]
    fn into_half_only_touches_f32() {
        let floats = FeatureArray::F32(array![1.5f32, 2.5].into_dyn());
        assert!(matches!(floats.into_half(), FeatureArray::F16(_)));

        let ints = FeatureArray::I64(array![640i64, 480].into_dyn());
        assert_eq!(ints.clone().into_half(), ints);

        let halves = FeatureArray::F16(array![f16::from_f32(1.0)].into_dyn());
        assert_eq!(halves.clone().into_half(), halves);
    }

    #[test]
    fn half_roundtrip_preserves_small_values() {
        let original = array![0.5f32, 0.25, 128.0].into_dyn();
        let FeatureArray::F16(halved) = FeatureArray::F32(original.clone()).into_half() else {
            panic!("expected f16 array");
        };
        let back = halved.mapv(f32::from);
        assert_eq!(back, original);
    }
}

//! The extraction pipeline: enumerate images, skip what a previous run
//! already committed, run the extractor, and persist one entry per image.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::ProgressBar;
use log::info;
use ndarray::{array, Axis};

use crate::config::ExtractionConfig;
use crate::dataset::{ImageList, ImageSource};
use crate::error::{Error, Result};
use crate::extractor::{Extractor, FeatureArray, ModelLoader, OnnxLoader, Prediction};
use crate::preprocessing::preprocess;
use crate::store::FeatureStore;

/// Runs the full extraction pipeline and returns the feature file path.
///
/// Processing is sequential and incremental: every image is committed to
/// the store before the next one is read, so an aborted run leaves a valid
/// store that the next invocation resumes from. With `overwrite` set,
/// already-stored entries are re-extracted and replaced instead of skipped.
///
/// Keypoints are reported as `(x, y)` with `x` along the image width, and
/// are rescaled from the preprocessed resolution back to the original one
/// using half-pixel centers. A model family with a different output
/// convention needs this checked before being wired in here.
pub fn run(
    conf: &ExtractionConfig,
    image_dir: &Path,
    export_dir: Option<&Path>,
    as_half: bool,
    image_list: Option<ImageList>,
    feature_path: Option<PathBuf>,
    overwrite: bool,
) -> Result<PathBuf> {
    let mut loader = OnnxLoader::new();
    run_with_loader(&mut loader, conf, image_dir, export_dir, as_half, image_list, feature_path, overwrite)
}

/// [`run`] with an explicit loader, so callers can share warm extractor
/// instances across runs (or substitute their own loading).
#[allow(clippy::too_many_arguments)]
pub fn run_with_loader(
    loader: &mut dyn ModelLoader,
    conf: &ExtractionConfig,
    image_dir: &Path,
    export_dir: Option<&Path>,
    as_half: bool,
    image_list: Option<ImageList>,
    feature_path: Option<PathBuf>,
    overwrite: bool,
) -> Result<PathBuf> {
    info!("Extracting local features with configuration:\n{conf:#?}");

    let source = ImageSource::new(image_dir, &conf.preprocessing, image_list)?;

    let feature_path = match feature_path {
        Some(path) => path,
        None => export_dir
            .ok_or(Error::NoOutputPath)?
            .join(format!("{}.h5", conf.output)),
    };
    if let Some(parent) = feature_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let store = FeatureStore::at(&feature_path);
    let skip_names: HashSet<String> = if feature_path.exists() && !overwrite {
        store.list_names()?
    } else {
        HashSet::new()
    };
    if source.names().iter().all(|name| skip_names.contains(name)) {
        info!("Skipping the extraction.");
        return Ok(feature_path);
    }

    // Deferred until an image actually needs processing; loading weights is
    // expensive and a fully resumed run never pays for it.
    let mut model: Option<Arc<dyn Extractor>> = None;

    let progress = ProgressBar::new(source.len() as u64);
    for index in 0..source.len() {
        let name = &source.names()[index];
        if skip_names.contains(name) {
            progress.inc(1);
            continue;
        }

        let extractor = match &model {
            Some(extractor) => Arc::clone(extractor),
            None => {
                let extractor = loader.load(&conf.model)?;
                model = Some(Arc::clone(&extractor));
                extractor
            }
        };

        let sample = preprocess(source.record(index)?, &conf.preprocessing)?;
        let batch = sample.tensor.view().insert_axis(Axis(0));
        let mut pred: Prediction = extractor
            .apply(batch)?
            .into_iter()
            .map(|(key, value)| (key, value.strip_batch()))
            .collect();

        let (original_width, original_height) = sample.original_size;
        pred.insert(
            "image_size".to_string(),
            FeatureArray::I64(array![i64::from(original_width), i64::from(original_height)].into_dyn()),
        );

        let mut uncertainty = None;
        if let Some(FeatureArray::F32(keypoints)) = pred.get_mut("keypoints") {
            let (width, height) = sample.size();
            let scales = [
                original_width as f32 / width as f32,
                original_height as f32 / height as f32,
            ];
            for mut keypoint in keypoints.axis_iter_mut(Axis(0)) {
                keypoint[0] = (keypoint[0] + 0.5) * scales[0] - 0.5;
                keypoint[1] = (keypoint[1] + 0.5) * scales[1] - 0.5;
            }
            // Keypoint uncertainty scaled to the original resolution.
            uncertainty = Some(extractor.detection_noise() * (scales[0] + scales[1]) / 2.);
        }

        if as_half {
            pred = pred
                .into_iter()
                .map(|(key, value)| (key, value.into_half()))
                .collect();
        }

        store.put(name, &pred, uncertainty)?;
        progress.inc(1);
    }
    progress.finish_and_clear();

    info!("Finished exporting features.");
    Ok(feature_path)
}

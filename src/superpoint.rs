//! SuperPoint keypoint/descriptor extractor.
//!
//! The network's dense heads run as an ONNX graph; detection happens here:
//! non-maximum suppression over the score map, border removal, top-k
//! selection, and bilinear descriptor sampling at the detected locations.

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, ArrayView4, Axis, Ix2, Ix3};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::inputs;

use crate::config::{SuperPointConfig, SUPERPOINT_CELL_SIZE};
use crate::error::Result;
use crate::extractor::{Extractor, FeatureArray, Prediction};

/// Localization noise of SuperPoint detections, in input pixels.
const DETECTION_NOISE: f32 = 2.0;

pub struct SuperPoint {
    session: Session,
    conf: SuperPointConfig,
}

impl SuperPoint {
    /// Builds an inference session on the configured weights. Loading is
    /// expensive; callers should go through the loader registry so that
    /// identical configurations share one warm session.
    pub fn load(conf: &SuperPointConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .with_execution_providers([CPUExecutionProvider::default().build()])?
            .commit_from_file(&conf.weights)?;

        Ok(SuperPoint {
            session,
            conf: conf.clone(),
        })
    }
}

impl Extractor for SuperPoint {
    fn apply(&self, image: ArrayView4<'_, f32>) -> Result<Prediction> {
        let outputs = self.session.run(inputs!["image" => image.to_owned()]?)?;

        // Dense heads: a score per input pixel and a descriptor map with one
        // column per 8x8 cell.
        let scores = outputs["scores"].try_extract_tensor::<f32>()?;
        let descriptors = outputs["descriptors"].try_extract_tensor::<f32>()?;
        let scores = scores.index_axis(Axis(0), 0).into_dimensionality::<Ix2>()?;
        let descriptors = descriptors
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix3>()?;

        let detections = detect(scores.view(), &self.conf);
        let sampled = sample_descriptors(
            &detections,
            descriptors.view(),
            SUPERPOINT_CELL_SIZE,
            self.conf.fix_sampling,
        );

        let n = detections.len();
        let mut keypoints = Array3::<f32>::zeros((1, n, 2));
        let mut keypoint_scores = Array2::<f32>::zeros((1, n));
        for (i, detection) in detections.iter().enumerate() {
            keypoints[[0, i, 0]] = detection.x as f32;
            keypoints[[0, i, 1]] = detection.y as f32;
            keypoint_scores[[0, i]] = detection.score;
        }

        let mut pred = Prediction::new();
        pred.insert(
            "keypoints".to_string(),
            FeatureArray::F32(keypoints.into_dyn()),
        );
        pred.insert(
            "scores".to_string(),
            FeatureArray::F32(keypoint_scores.into_dyn()),
        );
        pred.insert(
            "descriptors".to_string(),
            FeatureArray::F32(sampled.insert_axis(Axis(0)).into_dyn()),
        );
        Ok(pred)
    }

    fn detection_noise(&self) -> f32 {
        DETECTION_NOISE
    }
}

#[derive(Debug, Clone, Copy)]
struct Detection {
    x: usize,
    y: usize,
    score: f32,
}

/// Thresholds the score map, suppresses non-maxima within the NMS radius,
/// drops detections near the border, and keeps the highest-scoring
/// `max_keypoints`.
fn detect(scores: ArrayView2<'_, f32>, conf: &SuperPointConfig) -> Vec<Detection> {
    let (height, width) = scores.dim();
    let border = conf.remove_borders;
    let mut detections = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let score = scores[[y, x]];
            if score < conf.keypoint_threshold {
                continue;
            }
            if x < border
                || y < border
                || x >= width.saturating_sub(border)
                || y >= height.saturating_sub(border)
            {
                continue;
            }
            if !is_window_max(scores, x, y, conf.nms_radius) {
                continue;
            }
            detections.push(Detection { x, y, score });
        }
    }

    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    if let Some(max_keypoints) = conf.max_keypoints {
        detections.truncate(max_keypoints);
    }
    detections
}

fn is_window_max(scores: ArrayView2<'_, f32>, x: usize, y: usize, radius: usize) -> bool {
    let (height, width) = scores.dim();
    let center = scores[[y, x]];
    let y_lo = y.saturating_sub(radius);
    let x_lo = x.saturating_sub(radius);
    let y_hi = (y + radius).min(height - 1);
    let x_hi = (x + radius).min(width - 1);
    for wy in y_lo..=y_hi {
        for wx in x_lo..=x_hi {
            if (wx, wy) != (x, y) && scores[[wy, wx]] > center {
                return false;
            }
        }
    }
    true
}

/// Interpolates descriptors at keypoint locations and L2-normalizes each
/// column. Two sampling strategies exist: the legacy one normalizes keypoint
/// coordinates by `dim * cell - cell/2 - 0.5` with corner-aligned pixel
/// mapping (kept for parity with existing evaluations), the fixed one by
/// `dim * cell` with half-pixel centers.
fn sample_descriptors(
    detections: &[Detection],
    descriptors: ArrayView3<'_, f32>,
    cell: usize,
    fix_sampling: bool,
) -> Array2<f32> {
    let (depth, map_height, map_width) = descriptors.dim();
    let mut sampled = Array2::<f32>::zeros((depth, detections.len()));

    for (i, detection) in detections.iter().enumerate() {
        let (x, y) = (detection.x as f32, detection.y as f32);
        let (px, py) = if fix_sampling {
            sample_point_fixed(x, y, map_width, map_height, cell)
        } else {
            sample_point_legacy(x, y, map_width, map_height, cell)
        };

        let mut column = bilinear(descriptors, px, py);
        let norm = column.dot(&column).sqrt();
        if norm > 0. {
            column /= norm;
        }
        sampled.column_mut(i).assign(&column);
    }
    sampled
}

fn sample_point_legacy(
    x: f32,
    y: f32,
    map_width: usize,
    map_height: usize,
    cell: usize,
) -> (f32, f32) {
    let s = cell as f32;
    let nx = (x - s / 2. + 0.5) / (map_width as f32 * s - s / 2. - 0.5);
    let ny = (y - s / 2. + 0.5) / (map_height as f32 * s - s / 2. - 0.5);
    let (gx, gy) = (nx * 2. - 1., ny * 2. - 1.);
    // Corner-aligned: the grid extremes land on the outermost cell centers.
    let px = (gx + 1.) / 2. * (map_width as f32 - 1.);
    let py = (gy + 1.) / 2. * (map_height as f32 - 1.);
    (px, py)
}

fn sample_point_fixed(
    x: f32,
    y: f32,
    map_width: usize,
    map_height: usize,
    cell: usize,
) -> (f32, f32) {
    let s = cell as f32;
    let nx = (x + 0.5) / (map_width as f32 * s);
    let ny = (y + 0.5) / (map_height as f32 * s);
    let (gx, gy) = (nx * 2. - 1., ny * 2. - 1.);
    // Half-pixel centers: the grid extremes land on the outer cell edges.
    let px = ((gx + 1.) * map_width as f32 - 1.) / 2.;
    let py = ((gy + 1.) * map_height as f32 - 1.) / 2.;
    (px, py)
}

/// Bilinear sample of every channel at `(px, py)`, with zero padding
/// outside the map.
fn bilinear(map: ArrayView3<'_, f32>, px: f32, py: f32) -> Array1<f32> {
    let (depth, height, width) = map.dim();
    let (x0, y0) = (px.floor(), py.floor());
    let (dx, dy) = (px - x0, py - y0);

    let corners = [
        (x0, y0, (1. - dx) * (1. - dy)),
        (x0 + 1., y0, dx * (1. - dy)),
        (x0, y0 + 1., (1. - dx) * dy),
        (x0 + 1., y0 + 1., dx * dy),
    ];

    let mut out = Array1::<f32>::zeros(depth);
    for (cx, cy, weight) in corners {
        if weight == 0. || cx < 0. || cy < 0. || cx >= width as f32 || cy >= height as f32 {
            continue;
        }
        let (cx, cy) = (cx as usize, cy as usize);
        for d in 0..depth {
            out[d] += weight * map[[d, cy, cx]];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::Array2;

    use super::*;

    fn conf(nms_radius: usize, remove_borders: usize, max_keypoints: Option<usize>) -> SuperPointConfig {
        SuperPointConfig {
            nms_radius,
            keypoint_threshold: 0.1,
            max_keypoints,
            remove_borders,
            ..SuperPointConfig::default()
        }
    }

    #[test]
    fn detect_suppresses_weaker_neighbors() {
        let mut scores = Array2::<f32>::zeros((12, 12));
        scores[[5, 5]] = 0.9;
        scores[[5, 6]] = 0.8; // inside the NMS window of the stronger peak
        scores[[9, 2]] = 0.7;

        let detections = detect(scores.view(), &conf(2, 0, None));
        let positions: Vec<(usize, usize)> =
            detections.iter().map(|d| (d.x, d.y)).collect();
        assert_eq!(positions, [(5, 5), (2, 9)]);
    }

    #[test]
    fn detect_drops_border_keypoints() {
        let mut scores = Array2::<f32>::zeros((12, 12));
        scores[[1, 1]] = 0.9;
        scores[[6, 6]] = 0.5;

        let detections = detect(scores.view(), &conf(1, 4, None));
        assert_eq!(detections.len(), 1);
        assert_eq!((detections[0].x, detections[0].y), (6, 6));
    }

    #[test]
    fn detect_keeps_top_k_by_score() {
        let mut scores = Array2::<f32>::zeros((16, 16));
        scores[[2, 2]] = 0.3;
        scores[[8, 8]] = 0.9;
        scores[[13, 4]] = 0.6;

        let detections = detect(scores.view(), &conf(1, 0, Some(2)));
        let kept: Vec<f32> = detections.iter().map(|d| d.score).collect();
        assert_eq!(kept, [0.9, 0.6]);
    }

    #[test]
    fn detect_respects_threshold() {
        let mut scores = Array2::<f32>::zeros((12, 12));
        scores[[5, 5]] = 0.05; // below the 0.1 threshold

        assert!(detect(scores.view(), &conf(1, 0, None)).is_empty());
    }

    /// A keypoint at the center of a descriptor cell must sample exactly
    /// that cell's descriptor, under either strategy.
    #[test]
    fn sampling_at_cell_center_hits_the_cell() {
        // 2x2 descriptor map with depth 2; cell (0, 0) holds (1, 0),
        // the others (0, 1).
        let mut map = Array3::<f32>::zeros((2, 2, 2));
        map[[1, 0, 1]] = 1.;
        map[[1, 1, 0]] = 1.;
        map[[1, 1, 1]] = 1.;
        map[[0, 0, 0]] = 1.;

        // Image is 16x16; the center of cell (0, 0) is at pixel (3.5, 3.5).
        let detections = [Detection {
            x: 3,
            y: 3,
            score: 1.,
        }];

        for fix_sampling in [false, true] {
            let sampled = sample_descriptors(&detections, map.view(), 8, fix_sampling);
            assert_eq!(sampled.dim(), (2, 1));
            // Sampling near the cell center keeps the cell's own descriptor
            // dominant after normalization.
            assert!(
                sampled[[0, 0]] > sampled[[1, 0]],
                "fix_sampling={fix_sampling}: {:?}",
                sampled
            );
        }
    }

    #[test]
    fn sampling_strategies_differ_off_center() {
        let mut map = Array3::<f32>::zeros((2, 2, 4));
        for x in 0..4 {
            map[[0, 0, x]] = x as f32 + 1.;
            map[[1, 1, x]] = 1.;
        }
        let detections = [Detection {
            x: 17,
            y: 4,
            score: 1.,
        }];

        let legacy = sample_descriptors(&detections, map.view(), 8, false);
        let fixed = sample_descriptors(&detections, map.view(), 8, true);
        assert!(
            (legacy[[1, 0]] - fixed[[1, 0]]).abs() > 1e-3,
            "legacy {:?} vs fixed {:?}",
            legacy,
            fixed
        );
    }

    #[test]
    fn sampled_columns_are_unit_norm() {
        let mut map = Array3::<f32>::zeros((3, 2, 2));
        map[[0, 0, 0]] = 3.;
        map[[1, 0, 0]] = 4.;
        let detections = [Detection {
            x: 3,
            y: 3,
            score: 1.,
        }];

        let sampled = sample_descriptors(&detections, map.view(), 8, true);
        let norm: f32 = sampled.column(0).dot(&sampled.column(0));
        assert_relative_eq!(norm, 1., epsilon = 1e-5);
    }

    #[test]
    fn bilinear_interpolates_between_cells() {
        let mut map = Array3::<f32>::zeros((1, 1, 2));
        map[[0, 0, 0]] = 0.;
        map[[0, 0, 1]] = 2.;

        let mid = bilinear(map.view(), 0.5, 0.);
        assert_relative_eq!(mid[0], 1., epsilon = 1e-6);
    }

    #[test]
    fn bilinear_zero_pads_outside_the_map() {
        let mut map = Array3::<f32>::zeros((1, 2, 2));
        map.fill(2.);

        // Halfway off the left edge: one in-bounds corner pair at weight 0.5.
        let edge = bilinear(map.view(), -0.5, 0.);
        assert_relative_eq!(edge[0], 1., epsilon = 1e-6);
    }
}

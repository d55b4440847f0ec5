#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::config::ClipperConfig;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, RawLabel};
use crate::frame::Frame;

/// Candidates below this score are dropped before NMS. Event thresholding
/// happens later against the configured confidence threshold.
const MIN_CANDIDATE_SCORE: f32 = 0.25;
const NMS_IOU: f32 = 0.45;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` (or its
/// transpose) with `cx, cy, w, h` in model-input pixels followed by one
/// score per class.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        labels: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            labels,
        })
    }

    pub fn from_config(cfg: &ClipperConfig) -> Result<Self> {
        let labels_path = cfg
            .labels_path
            .clone()
            .unwrap_or_else(|| default_labels_path(&cfg.model_path));
        let labels = load_labels(&labels_path)?;
        log::info!(
            "tract backend: model={} labels={} ({} classes)",
            cfg.model_path.display(),
            labels_path.display(),
            labels.len()
        );
        Self::new(&cfg.model_path, cfg.model_input_size, labels)
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
            .ok_or_else(|| {
                anyhow!(
                    "frame {} has {} bytes, expected {}x{} RGB",
                    frame.index(),
                    frame.pixels().len(),
                    frame.width(),
                    frame.height()
                )
            })?;
        let resized = image::imageops::resize(
            &image,
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        // Channel-first when the attribute axis is the shorter one.
        let channel_first = shape[1] < shape[2];
        let (attrs, anchors) = if channel_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        if attrs < 5 {
            return Err(anyhow!("model output has {} attributes per anchor", attrs));
        }
        let at = |attr: usize, anchor: usize| -> f32 {
            if channel_first {
                view[&[0, attr, anchor][..]]
            } else {
                view[&[0, anchor, attr][..]]
            }
        };

        let scale = self.input_size as f32;
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class, score) = (4..attrs)
                .map(|attr| (attr - 4, at(attr, anchor)))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < MIN_CANDIDATE_SCORE {
                continue;
            }
            let (cx, cy, w, h) = (
                at(0, anchor) / scale,
                at(1, anchor) / scale,
                at(2, anchor) / scale,
                at(3, anchor) / scale,
            );
            candidates.push((
                class,
                Detection::new(self.label_for(class), score.min(1.0)).with_box(BoundingBox {
                    x: cx - w / 2.0,
                    y: cy - h / 2.0,
                    w,
                    h,
                }),
            ));
        }
        Ok(non_max_suppression(candidates))
    }

    fn label_for(&self, class: usize) -> RawLabel {
        match self.labels.get(class) {
            Some(name) => RawLabel::Name(name.clone()),
            None => RawLabel::ClassIndex(class as u32),
        }
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<(usize, Detection)>) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut kept: Vec<(usize, Detection)> = Vec::new();
    for (class, det) in candidates {
        let suppressed = kept
            .iter()
            .any(|(k, other)| *k == class && other.bbox.iou(&det.bbox) > NMS_IOU);
        if !suppressed {
            kept.push((class, det));
        }
    }
    kept.into_iter().map(|(_, det)| det).collect()
}

fn default_labels_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("names")
}

fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read class labels {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection};

const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

type Plan = TypedRunnableModel<TypedModel>;

/// Tract-based backend for YOLO-family ONNX detectors.
///
/// Expects a single `[1, 3, S, S]` f32 input and a `[1, 4 + C, N]` output
/// (center x, center y, width, height, then one score per class), which is
/// the export layout of current Ultralytics models.
pub struct YoloDetector {
    model: Plan,
    input_size: u32,
    labels: Vec<String>,
    iou_threshold: f32,
}

impl YoloDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, labels: Vec<String>) -> Result<Self> {
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
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the default NMS IoU threshold.
    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let size = size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn label_for(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        threshold: f32,
        scale_x: f32,
        scale_y: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!(
                "unexpected detector output shape {:?}; expected [1, 4 + classes, anchors]",
                shape
            ));
        }
        let classes = shape[1] - 4;
        let anchors = shape[2];

        let mut detections = Vec::new();
        for i in 0..anchors {
            let mut best_class = 0;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..classes {
                let score = view[[0, 4 + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if best_score.is_nan() || best_score < threshold {
                continue;
            }
            let bbox = BoundingBox::from_center(
                view[[0, 0, i]],
                view[[0, 1, i]],
                view[[0, 2, i]],
                view[[0, 3, i]],
            )
            .scale(scale_x, scale_y);
            detections.push(Detection::new(self.label_for(best_class), best_score, bbox));
        }

        Ok(non_max_suppression(detections, self.iou_threshold))
    }
}

impl Detector for YoloDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&self, image: &RgbImage, threshold: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let scale_x = image.width() as f32 / self.input_size as f32;
        let scale_y = image.height() as f32 / self.input_size as f32;
        let detections = self.decode(outputs, threshold, scale_x, scale_y)?;
        Ok(detections
            .into_iter()
            .map(|det| Detection {
                bbox: det.bbox.clamp_to(image.width(), image.height()),
                ..det
            })
            .collect())
    }

    fn warm_up(&self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.infer(&blank, 1.0).map(|_| ())
    }
}

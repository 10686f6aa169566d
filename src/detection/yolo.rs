//! Post-processing for YOLOv8-style detection heads.

use crate::detection::{BoundingBox, Detection};

/// Thresholds and geometry for decoding a detection head.
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Decode a `[4 + classes, anchors]` row-major output (the batch dimension
/// already removed). Rows 0..4 are `cx, cy, w, h` in model input pixels, the
/// remaining rows are per-class scores. Boxes are scaled to an image of
/// `image_width x image_height`, then class-wise NMS is applied. The result
/// is sorted by descending confidence.
pub fn decode_output(
    output: &[f32],
    attributes: usize,
    anchors: usize,
    image_width: u32,
    image_height: u32,
    params: &DecodeParams,
) -> Vec<Detection> {
    if attributes <= 4 || output.len() < attributes * anchors {
        return Vec::new();
    }
    let at = |row: usize, col: usize| output[row * anchors + col];
    let scale_x = image_width as f32 / params.input_width as f32;
    let scale_y = image_height as f32 / params.input_height as f32;

    let mut candidates = Vec::new();
    for col in 0..anchors {
        let (class_id, score) = (4..attributes)
            .map(|row| (row - 4, at(row, col)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < params.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, col), at(1, col), at(2, col), at(3, col));
        candidates.push(Detection {
            class_id,
            confidence: score,
            bbox: BoundingBox {
                x_min: (cx - w / 2.0) * scale_x,
                y_min: (cy - h / 2.0) * scale_y,
                x_max: (cx + w / 2.0) * scale_x,
                y_max: (cy + h / 2.0) * scale_y,
            },
        });
    }

    non_max_suppression(candidates, params.iou_threshold)
}

/// Greedy NMS per class. Ties in confidence keep the earlier candidate.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a `[4 + classes, anchors]` buffer from per-anchor columns.
    fn head(columns: &[[f32; 6]]) -> Vec<f32> {
        let anchors = columns.len();
        let mut out = vec![0.0; 6 * anchors];
        for (col, values) in columns.iter().enumerate() {
            for (row, v) in values.iter().enumerate() {
                out[row * anchors + col] = *v;
            }
        }
        out
    }

    #[test]
    fn decodes_and_scales_boxes() {
        let output = head(&[[320.0, 320.0, 64.0, 32.0, 0.1, 0.9]]);
        let params = DecodeParams::default();
        let dets = decode_output(&output, 6, 1, 1280, 640, &params);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        assert_eq!(dets[0].bbox.x_min, 576.0);
        assert_eq!(dets[0].bbox.x_max, 704.0);
        assert_eq!(dets[0].bbox.y_min, 304.0);
        assert_eq!(dets[0].bbox.y_max, 336.0);
    }

    #[test]
    fn low_scores_are_dropped_and_overlaps_suppressed() {
        let output = head(&[
            [100.0, 100.0, 50.0, 50.0, 0.8, 0.0],
            [102.0, 101.0, 50.0, 50.0, 0.7, 0.0],
            [102.0, 101.0, 50.0, 50.0, 0.0, 0.6],
            [400.0, 400.0, 20.0, 20.0, 0.1, 0.1],
        ]);
        let dets = decode_output(&output, 6, 4, 640, 640, &DecodeParams::default());
        let summary: Vec<_> = dets.iter().map(|d| (d.class_id, d.confidence)).collect();
        assert_eq!(summary, vec![(0, 0.8), (1, 0.6)]);
    }

    #[test]
    fn malformed_output_yields_nothing() {
        assert!(decode_output(&[1.0, 2.0], 6, 1, 10, 10, &DecodeParams::default()).is_empty());
        assert!(decode_output(&[0.0; 4], 4, 1, 10, 10, &DecodeParams::default()).is_empty());
    }
}

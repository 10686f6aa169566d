//! YOLO models in `.rten` format, run on the CPU with `rten`.

use image::DynamicImage;
use image::imageops::FilterType;
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;

use crate::detection::yolo::{DecodeParams, decode_output};
use crate::detection::{Detection, DetectionError, Detector, ModelLoader};

#[derive(Debug, Clone, Default)]
pub struct RtenYoloLoader {
    pub params: DecodeParams,
}

pub struct RtenYoloModel {
    model: Model,
    params: DecodeParams,
}

impl ModelLoader for RtenYoloLoader {
    type Model = RtenYoloModel;

    fn load(&self, bytes: &[u8]) -> Result<Self::Model, DetectionError> {
        let model = Model::load(bytes.to_vec()).map_err(|e| DetectionError::Load(e.to_string()))?;
        Ok(RtenYoloModel {
            model,
            params: self.params,
        })
    }
}

impl Detector for RtenYoloModel {
    fn infer(&self, image: &DynamicImage) -> Result<Vec<Detection>, DetectionError> {
        let (in_w, in_h) = (self.params.input_width, self.params.input_height);
        let resized = image.resize_exact(in_w, in_h, FilterType::Triangle).to_rgb8();

        // NCHW, RGB scaled to 0..1
        let input = NdTensor::from_fn([1, 3, in_h as usize, in_w as usize], |[_, c, y, x]| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        let output = self
            .model
            .run_one(input.view().into(), None)
            .map_err(|e| DetectionError::Inference(format!("{e:?}")))?;
        let output: NdTensor<f32, 3> = output
            .try_into()
            .map_err(|e| DetectionError::Inference(format!("unexpected output: {e:?}")))?;

        let [_, attributes, anchors] = output.shape();
        let data = output.to_vec();
        Ok(decode_output(
            &data,
            attributes,
            anchors,
            image.width(),
            image.height(),
            &self.params,
        ))
    }
}

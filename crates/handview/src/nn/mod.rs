//! Neural Network inference.

use std::{ops::Index, path::Path, sync::Arc};

use anyhow::{bail, ensure, Context};
use tract_onnx::prelude::{
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TypedFact, TypedOp,
};

use crate::image::{Image, Rect, Resolution};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A convolutional neural network taking a single `[1, 3, H, W]` RGB image input.
///
/// Color channels are fed as values between 0.0 and 1.0. This is a cheaply [`Clone`]able handle
/// to the underlying model.
#[derive(Clone)]
pub struct Cnn {
    plan: Arc<Model>,
    input_res: Resolution,
}

impl Cnn {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl(path: &Path) -> anyhow::Result<Self> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!(
                "neural network file must have `.onnx` extension: {}",
                path.display()
            ),
        }

        let model_data = std::fs::read(path)
            .with_context(|| format!("failed to read model from {}", path.display()))?;
        Self::from_onnx(&model_data)
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    ///
    /// Returns an error if the network data is malformed or incomplete, if the network uses
    /// unimplemented operations, or if its input is not a single RGB image.
    pub fn from_onnx(raw: &[u8]) -> anyhow::Result<Self> {
        let plan = tract_onnx::onnx()
            .model_for_read(&mut &*raw)?
            .into_optimized()?
            .into_runnable()?;

        let model = plan.model();
        ensure!(
            model.inputs.len() == 1,
            "CNN network has to take exactly 1 input, this one takes {}",
            model.inputs.len(),
        );
        let fact = model.input_fact(0)?;
        let Some(shape) = fact.shape.as_concrete() else {
            bail!("network input shape is symbolic: {:?}", fact.shape);
        };
        let (w, h) = match shape {
            [1, 3, h, w] => (*w, *h),
            _ => bail!("invalid model input shape for NCHW CNN: {:?}", shape),
        };
        let input_res = Resolution::new(w.try_into()?, h.try_into()?);
        log::debug!(
            "loaded CNN with {}x{} input and {} outputs",
            input_res.width(),
            input_res.height(),
            model.outputs.len(),
        );

        Ok(Self {
            plan: Arc::new(plan),
            input_res,
        })
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Runs the network on the `roi` region of `image`.
    ///
    /// The region is sampled to the network's input resolution; if the aspect ratios do not match,
    /// the image is stretched.
    pub fn estimate(&self, image: &Image, roi: Rect) -> anyhow::Result<Outputs> {
        let res = self.input_res;
        let data = image_to_nchw(image, roi, res);
        let shape = [1, 3, res.height() as usize, res.width() as usize];
        let input = tract_onnx::prelude::Tensor::from_shape(&shape, &data)?;

        let outputs = self
            .plan
            .run(tvec![TValue::from_const(Arc::new(input))])?;
        let inner = outputs
            .iter()
            .map(|t| Tensor::new(t.shape().to_vec(), t.as_slice::<f32>()?.to_vec()))
            .collect::<anyhow::Result<_>>()?;
        Ok(Outputs { inner })
    }
}

/// Samples the `roi` part of `image` into a `[1, 3, H, W]` tensor buffer with channels scaled to
/// the 0.0-1.0 range.
fn image_to_nchw(image: &Image, roi: Rect, res: Resolution) -> Vec<f32> {
    let (w, h) = (res.width() as usize, res.height() as usize);
    let mut data = vec![0.0; 3 * w * h];
    for y in 0..h {
        for x in 0..w {
            let u = (x as f32 + 0.5) / w as f32;
            let v = (y as f32 + 0.5) / h as f32;
            let color = image.sample(roi, u, v);
            for c in 0..3 {
                data[c * w * h + y * w + x] = f32::from(color[c]) / 255.0;
            }
        }
    }
    data
}

/// A dense `f32` tensor produced by a network.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Box<[usize]>,
    data: Box<[f32]>,
}

impl Tensor {
    /// Creates a tensor from its shape and row-major data.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> anyhow::Result<Self> {
        let expected: usize = shape.iter().product();
        ensure!(
            expected == data.len(),
            "tensor shape {:?} needs {} elements, got {}",
            shape,
            expected,
            data.len(),
        );
        Ok(Self {
            shape: shape.into_boxed_slice(),
            data: data.into_boxed_slice(),
        })
    }

    /// Returns the number of entries in each dimension.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns the only element of a tensor with exactly one element.
    pub fn as_singular(&self) -> anyhow::Result<f32> {
        match *self.data {
            [value] => Ok(value),
            _ => bail!("expected a single value, got tensor of shape {:?}", self.shape),
        }
    }
}

/// The output tensors of one inference run, in network output order.
#[derive(Debug, Clone)]
pub struct Outputs {
    inner: Vec<Tensor>,
}

impl Outputs {
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self { inner: tensors }
    }

    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the output tensor at `index`, or an error if the network has fewer outputs.
    pub fn get(&self, index: usize) -> anyhow::Result<&Tensor> {
        self.inner.get(index).with_context(|| {
            format!(
                "network output {index} requested, but only {} outputs exist",
                self.inner.len()
            )
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.inner.iter()
    }
}

impl Index<usize> for Outputs {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.inner[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Color;

    #[test]
    fn rejects_non_onnx_path() {
        let err = Cnn::from_path("models/hand.tflite").err().unwrap();
        assert!(err.to_string().contains(".onnx"), "{err}");
    }

    #[test]
    fn missing_model_file() {
        let err = Cnn::from_path("/nonexistent/hand_landmark.onnx").err().unwrap();
        assert!(format!("{err:#}").contains("failed to read model"), "{err:#}");
    }

    #[test]
    fn garbage_model_data() {
        assert!(Cnn::from_onnx(b"definitely not protobuf").is_err());
    }

    #[test]
    fn tensor_shape_mismatch() {
        assert!(Tensor::new(vec![1, 3], vec![0.0; 2]).is_err());
        let t = Tensor::new(vec![1, 1], vec![0.25]).unwrap();
        assert_eq!(t.as_singular().unwrap(), 0.25);
        assert!(Tensor::new(vec![2], vec![0.0; 2])
            .unwrap()
            .as_singular()
            .is_err());
    }

    #[test]
    fn nchw_layout() {
        let mut image = Image::new(2, 1);
        image.set(0, 0, Color::RED);
        image.set(1, 0, Color::BLUE);
        let data = image_to_nchw(&image, image.rect(), Resolution::new(2, 1));
        // R plane, then G, then B.
        assert_eq!(data, [1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn outputs_get_out_of_range() {
        let outputs = Outputs::new(vec![Tensor::new(vec![1], vec![1.0]).unwrap()]);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].as_slice(), [1.0]);
        assert!(outputs.get(1).is_err());
    }
}

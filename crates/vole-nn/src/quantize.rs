// Affine uint8 quantization
//
// A float tensor is mapped onto 0..=255 with a scale and a zero point:
//
//   q = round(clamp(z + v / s, 0, 255))        v ≈ (q - z) * s
//
// The parameters come from the observed value range: s = (max - min)/255,
// and the zero point is the quantized position of 0.0, nudged into the
// representable range so that exact zeros stay exact.
//
// matmul works on the quantized values directly and folds the zero points
// back in afterwards with the expansion
//
//   Σ (a - za)(b - zb) = Σ ab - zb·Σa - za·Σb + k·za·zb
//
// so the inner loop is pure integer-valued accumulation and the
// corrections are two rank-reduced sums and a constant.

use vole_core::backend::Backend;
use vole_core::error::Result;
use vole_core::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: u8,
}

/// Quantization parameters covering the tensor's value range.
pub fn calc_quant_params(input: &Tensor<f32>) -> QuantParams {
    let values = input.to_vec();
    let min = values.iter().copied().fold(f32::MAX, f32::min);
    let max = values.iter().copied().fold(f32::MIN, f32::max);

    let (qmin, qmax) = (0.0f64, 255.0f64);
    let range = (max - min) as f64;
    // a constant tensor still needs a usable scale
    let scale = if range > 0.0 { range / (qmax - qmin) } else { 1.0 };

    let initial_zero_point = qmin - min as f64 / scale;
    let zero_point = if initial_zero_point < qmin {
        qmin as u8
    } else if initial_zero_point > qmax {
        qmax as u8
    } else {
        initial_zero_point.round() as u8
    };

    QuantParams {
        scale: scale as f32,
        zero_point,
    }
}

/// A uint8 tensor plus the affine parameters that map it back to floats.
pub struct QTensor {
    values: Tensor<u8>,
    params: QuantParams,
}

impl QTensor {
    pub fn new(values: Tensor<u8>, params: QuantParams) -> Self {
        QTensor { values, params }
    }

    /// Quantize a float tensor with parameters fit to its value range.
    pub fn quantize(input: &Tensor<f32>) -> Result<QTensor> {
        let params = calc_quant_params(input);
        Self::quantize_with(input, params)
    }

    pub fn quantize_with(input: &Tensor<f32>, params: QuantParams) -> Result<QTensor> {
        let z = params.zero_point as f32;
        let s = params.scale;
        let data: Vec<u8> = input
            .to_vec()
            .into_iter()
            .map(|v| (z + v / s).clamp(0.0, 255.0).round() as u8)
            .collect();
        let values = Tensor::from_vec(data, input.shape().clone(), Backend::seq())?;
        Ok(QTensor { values, params })
    }

    pub fn values(&self) -> &Tensor<u8> {
        &self.values
    }

    pub fn scale(&self) -> f32 {
        self.params.scale
    }

    pub fn zero_point(&self) -> u8 {
        self.params.zero_point
    }

    /// Map back to floats: (q - z) * s.
    pub fn dequantize(&self) -> Result<Tensor<f32>> {
        let z = self.params.zero_point as f32;
        let s = self.params.scale;
        let data: Vec<f32> = self
            .values
            .to_vec()
            .into_iter()
            .map(|q| (q as f32 - z) * s)
            .collect();
        Tensor::from_vec(data, self.values.shape().clone(), Backend::seq())
    }

    /// Matrix multiplication of two quantized tensors, producing a
    /// dequantized float result.
    pub fn matmul(&self, rhs: &QTensor) -> Result<Tensor<f32>> {
        let a = as_f32(&self.values)?;
        let b = as_f32(&rhs.values)?;

        let k = a.dims()[a.rank() - 1] as f32;
        let za = self.params.zero_point as f32;
        let zb = rhs.params.zero_point as f32;

        let prod = a.matmul(&b)?; // Σ ab
        let row_sums = a.sum(Some(a.rank() - 1))?; // [.., m, 1]
        let col_sums = b.sum(Some(b.rank() - 2))?; // [.., 1, n]

        prod.add(&row_sums.mul_scalar(-zb)?)?
            .add(&col_sums.mul_scalar(-za)?)?
            .add_scalar(k * za * zb)?
            .mul_scalar(self.params.scale * rhs.params.scale)
    }
}

fn as_f32(values: &Tensor<u8>) -> Result<Tensor<f32>> {
    let data = values.to_vec().into_iter().map(|v| v as f32).collect();
    Tensor::from_vec(data, values.shape().clone(), Backend::seq())
}

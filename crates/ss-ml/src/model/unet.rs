//! U-Net mask network inference
//!
//! Pure-ndarray forward pass over one magnitude slice. Three encoder
//! stages (3x3 conv + ReLU + 2x2 max pool), a bottleneck conv, three
//! decoder stages (nearest-neighbor upsample + skip concat + conv), and
//! one sigmoid 1x1 head per predicted mask. The network is
//! shape-agnostic: any input whose dimensions divide by 8 runs through
//! unchanged, so tests can use small slices while production uses the
//! trained 512x128 window.

use ndarray::{concatenate, Array2, Array3, Axis};

use crate::error::{SeparationError, SeparationResult};
use crate::model::weights::{ConvLayer, ModelVariant, UNetWeights};
use crate::model::MaskPredictor;

/// Mask network backed by an in-memory parameter set.
#[derive(Debug)]
pub struct UNet {
    weights: UNetWeights,
}

impl UNet {
    pub fn new(weights: UNetWeights) -> Self {
        Self { weights }
    }

    pub fn variant(&self) -> ModelVariant {
        self.weights.variant
    }

    /// Run the forward pass on one magnitude slice.
    ///
    /// Returns one soft mask per head, each the same shape as the input
    /// with values in [0, 1].
    fn forward(&self, slice: &Array2<f32>) -> SeparationResult<Vec<Array2<f32>>> {
        let (h, w) = slice.dim();
        if h == 0 || w == 0 || h % 8 != 0 || w % 8 != 0 {
            return Err(SeparationError::Inference {
                slice: 0,
                reason: format!("input {h}x{w} must have both dimensions divisible by 8"),
            });
        }

        // Scale to unit peak so activations stay in the trained range.
        let peak = slice.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        let scale = if peak > 1e-12 { 1.0 / peak } else { 1.0 };
        let mut input = Array3::zeros((1, h, w));
        input
            .index_axis_mut(Axis(0), 0)
            .assign(&slice.mapv(|v| v * scale));

        let e0 = conv2d(&input, &self.weights.encoder[0], true);
        let p0 = max_pool2(&e0);
        let e1 = conv2d(&p0, &self.weights.encoder[1], true);
        let p1 = max_pool2(&e1);
        let e2 = conv2d(&p1, &self.weights.encoder[2], true);
        let p2 = max_pool2(&e2);

        let bottom = conv2d(&p2, &self.weights.bottleneck, true);

        let d0 = conv2d(&concat_channels(&upsample2(&bottom), &e2)?, &self.weights.decoder[0], true);
        let d1 = conv2d(&concat_channels(&upsample2(&d0), &e1)?, &self.weights.decoder[1], true);
        let d2 = conv2d(&concat_channels(&upsample2(&d1), &e0)?, &self.weights.decoder[2], true);

        let mut masks = Vec::with_capacity(self.weights.heads.len());
        for head in &self.weights.heads {
            let logits = conv2d(&d2, head, false);
            let mask = logits
                .index_axis(Axis(0), 0)
                .mapv(|v| 1.0 / (1.0 + (-v).exp()));
            if mask.iter().any(|v| !v.is_finite()) {
                return Err(SeparationError::Inference {
                    slice: 0,
                    reason: "non-finite values in predicted mask".into(),
                });
            }
            masks.push(mask);
        }
        Ok(masks)
    }
}

impl MaskPredictor for UNet {
    fn variant(&self) -> ModelVariant {
        self.weights.variant
    }

    fn mask_heads(&self) -> usize {
        self.weights.head_count()
    }

    fn predict_masks(&self, slice: &Array2<f32>) -> SeparationResult<Vec<Array2<f32>>> {
        self.forward(slice)
    }
}

/// Same-padded 2-d convolution over channel-major input.
fn conv2d(input: &Array3<f32>, layer: &ConvLayer, relu: bool) -> Array3<f32> {
    let (in_c, h, w) = input.dim();
    let out_c = layer.out_channels();
    let kh = layer.weight.shape()[2];
    let kw = layer.weight.shape()[3];
    let ph = (kh / 2) as isize;
    let pw = (kw / 2) as isize;

    let mut output = Array3::zeros((out_c, h, w));
    for oc in 0..out_c {
        let mut plane = output.index_axis_mut(Axis(0), oc);
        plane.fill(layer.bias[oc]);
        for ic in 0..in_c {
            let in_plane = input.index_axis(Axis(0), ic);
            for dy in 0..kh {
                let shift_y = dy as isize - ph;
                let y_lo = (-shift_y).max(0) as usize;
                let y_hi = ((h as isize - shift_y).min(h as isize)) as usize;
                for dx in 0..kw {
                    let k = layer.weight[[oc, ic, dy, dx]];
                    if k == 0.0 {
                        continue;
                    }
                    let shift_x = dx as isize - pw;
                    let x_lo = (-shift_x).max(0) as usize;
                    let x_hi = ((w as isize - shift_x).min(w as isize)) as usize;
                    for y in y_lo..y_hi {
                        let sy = (y as isize + shift_y) as usize;
                        for x in x_lo..x_hi {
                            let sx = (x as isize + shift_x) as usize;
                            plane[[y, x]] += k * in_plane[[sy, sx]];
                        }
                    }
                }
            }
        }
    }

    if relu {
        output.mapv_inplace(|v| v.max(0.0));
    }
    output
}

/// 2x2 max pooling; both spatial dimensions must be even.
fn max_pool2(input: &Array3<f32>) -> Array3<f32> {
    let (c, h, w) = input.dim();
    let mut output = Array3::zeros((c, h / 2, w / 2));
    for ch in 0..c {
        let plane = input.index_axis(Axis(0), ch);
        let mut out_plane = output.index_axis_mut(Axis(0), ch);
        for y in 0..h / 2 {
            for x in 0..w / 2 {
                let v = plane[[2 * y, 2 * x]]
                    .max(plane[[2 * y, 2 * x + 1]])
                    .max(plane[[2 * y + 1, 2 * x]])
                    .max(plane[[2 * y + 1, 2 * x + 1]]);
                out_plane[[y, x]] = v;
            }
        }
    }
    output
}

/// Nearest-neighbor 2x spatial upsampling.
fn upsample2(input: &Array3<f32>) -> Array3<f32> {
    let (c, h, w) = input.dim();
    let mut output = Array3::zeros((c, h * 2, w * 2));
    for ch in 0..c {
        let plane = input.index_axis(Axis(0), ch);
        let mut out_plane = output.index_axis_mut(Axis(0), ch);
        for y in 0..h * 2 {
            for x in 0..w * 2 {
                out_plane[[y, x]] = plane[[y / 2, x / 2]];
            }
        }
    }
    output
}

fn concat_channels(a: &Array3<f32>, b: &Array3<f32>) -> SeparationResult<Array3<f32>> {
    concatenate(Axis(0), &[a.view(), b.view()]).map_err(|e| SeparationError::Inference {
        slice: 0,
        reason: format!("skip connection shape mismatch: {e}"),
    })
}

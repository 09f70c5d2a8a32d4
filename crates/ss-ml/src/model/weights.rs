//! Model variants and weight storage
//!
//! Weights live in a flat binary container: `SSWT` magic, version,
//! variant tag, head count, then the fixed layer sequence as
//! dimension-prefixed little-endian f32 tensors. Anything that fails to
//! parse or has unexpected shapes is reported as `ModelUnavailable`.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::{Array1, Array4};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{SeparationError, SeparationResult};

const MAGIC: [u8; 4] = *b"SSWT";
const VERSION: u16 = 1;

/// Encoder channel progression (each stage halves the spatial size)
pub const ENCODER_CHANNELS: [usize; 3] = [16, 32, 64];
/// Bottleneck channel count
pub const BOTTLENECK_CHANNELS: usize = 128;
/// Decoder channel progression (mirrors the encoder in reverse)
pub const DECODER_CHANNELS: [usize; 3] = [64, 32, 16];

/// Trained model variant, keyed by stem count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    /// Vocals + accompaniment residual
    TwoStem,
    /// Vocals, drums, bass, other
    FourStem,
}

impl ModelVariant {
    /// Number of output stems
    pub fn stem_count(&self) -> usize {
        match self {
            ModelVariant::TwoStem => 2,
            ModelVariant::FourStem => 4,
        }
    }

    /// Canonical number of mask heads.
    ///
    /// The two-stem model predicts a single vocal mask and derives the
    /// accompaniment as its complement; the four-stem model predicts one
    /// independent mask per source. A two-stem weight file may also ship
    /// two explicit heads - both layouts load.
    pub fn mask_heads(&self) -> usize {
        match self {
            ModelVariant::TwoStem => 1,
            ModelVariant::FourStem => 4,
        }
    }

    /// Weight file name inside a model directory
    pub fn weight_file_name(&self) -> &'static str {
        match self {
            ModelVariant::TwoStem => "unet_2stem.sswt",
            ModelVariant::FourStem => "unet_4stem.sswt",
        }
    }

    /// Parse from a stem count (2 or 4)
    pub fn from_stem_count(count: usize) -> SeparationResult<Self> {
        match count {
            2 => Ok(ModelVariant::TwoStem),
            4 => Ok(ModelVariant::FourStem),
            other => Err(SeparationError::Config {
                reason: format!("unsupported stem count {other}, expected 2 or 4"),
            }),
        }
    }

    fn tag(&self) -> u8 {
        self.stem_count() as u8
    }

    fn from_tag(tag: u8) -> SeparationResult<Self> {
        match tag {
            2 => Ok(ModelVariant::TwoStem),
            4 => Ok(ModelVariant::FourStem),
            other => Err(SeparationError::ModelUnavailable {
                reason: format!("unknown variant tag {other} in weight file"),
            }),
        }
    }

    fn valid_head_count(&self, heads: usize) -> bool {
        match self {
            ModelVariant::TwoStem => heads == 1 || heads == 2,
            ModelVariant::FourStem => heads == 4,
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-stem", self.stem_count())
    }
}

/// One convolution layer: `(out, in, kh, kw)` kernel plus per-channel bias.
#[derive(Debug, Clone)]
pub struct ConvLayer {
    pub weight: Array4<f32>,
    pub bias: Array1<f32>,
}

impl ConvLayer {
    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn in_channels(&self) -> usize {
        self.weight.shape()[1]
    }
}

/// Full learned parameter set for one U-Net variant.
#[derive(Debug, Clone)]
pub struct UNetWeights {
    pub variant: ModelVariant,
    pub(crate) encoder: [ConvLayer; 3],
    pub(crate) bottleneck: ConvLayer,
    pub(crate) decoder: [ConvLayer; 3],
    pub(crate) heads: Vec<ConvLayer>,
}

impl UNetWeights {
    /// Number of mask heads carried by this parameter set
    pub fn head_count(&self) -> usize {
        self.heads.len()
    }

    /// Expected `(out, in, kh, kw)` shapes for the fixed layer sequence.
    fn expected_shapes(heads: usize) -> Vec<[usize; 4]> {
        let mut shapes = vec![
            [ENCODER_CHANNELS[0], 1, 3, 3],
            [ENCODER_CHANNELS[1], ENCODER_CHANNELS[0], 3, 3],
            [ENCODER_CHANNELS[2], ENCODER_CHANNELS[1], 3, 3],
            [BOTTLENECK_CHANNELS, ENCODER_CHANNELS[2], 3, 3],
            // Decoder inputs are upsample + skip concatenations.
            [DECODER_CHANNELS[0], BOTTLENECK_CHANNELS + ENCODER_CHANNELS[2], 3, 3],
            [DECODER_CHANNELS[1], DECODER_CHANNELS[0] + ENCODER_CHANNELS[1], 3, 3],
            [DECODER_CHANNELS[2], DECODER_CHANNELS[1] + ENCODER_CHANNELS[0], 3, 3],
        ];
        for _ in 0..heads {
            shapes.push([1, DECODER_CHANNELS[2], 1, 1]);
        }
        shapes
    }

    /// Load weights from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> SeparationResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SeparationError::ModelUnavailable {
            reason: format!("cannot open {}: {e}", path.display()),
        })?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }

    /// Read weights from any byte stream.
    pub fn read_from(reader: &mut impl Read) -> SeparationResult<Self> {
        let mut magic = [0u8; 4];
        read_exact(reader, &mut magic)?;
        if magic != MAGIC {
            return Err(SeparationError::ModelUnavailable {
                reason: "bad magic, not a weight file".into(),
            });
        }

        let version = read_u16(reader)?;
        if version != VERSION {
            return Err(SeparationError::ModelUnavailable {
                reason: format!("unsupported weight format version {version}"),
            });
        }

        let variant = ModelVariant::from_tag(read_u8(reader)?)?;
        let heads = read_u8(reader)? as usize;
        if !variant.valid_head_count(heads) {
            return Err(SeparationError::ModelUnavailable {
                reason: format!("{variant} model cannot have {heads} mask heads"),
            });
        }

        let expected = Self::expected_shapes(heads);
        let encoder = [
            read_layer(reader, expected[0])?,
            read_layer(reader, expected[1])?,
            read_layer(reader, expected[2])?,
        ];
        let bottleneck = read_layer(reader, expected[3])?;
        let decoder = [
            read_layer(reader, expected[4])?,
            read_layer(reader, expected[5])?,
            read_layer(reader, expected[6])?,
        ];
        let mut head_layers = Vec::with_capacity(heads);
        for shape in &expected[7..] {
            head_layers.push(read_layer(reader, *shape)?);
        }

        Ok(Self {
            variant,
            encoder,
            bottleneck,
            decoder,
            heads: head_layers,
        })
    }

    /// Write weights to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SeparationResult<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| SeparationError::Internal(format!(
            "cannot create {}: {e}",
            path.display()
        )))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
    }

    /// Write weights to any byte stream.
    pub fn write_to(&self, writer: &mut impl Write) -> SeparationResult<()> {
        let io_err = |e: std::io::Error| SeparationError::Internal(format!("weight write: {e}"));

        writer.write_all(&MAGIC).map_err(io_err)?;
        writer.write_all(&VERSION.to_le_bytes()).map_err(io_err)?;
        writer.write_all(&[self.variant.tag()]).map_err(io_err)?;
        writer
            .write_all(&[self.heads.len() as u8])
            .map_err(io_err)?;

        let all = self
            .encoder
            .iter()
            .chain(std::iter::once(&self.bottleneck))
            .chain(self.decoder.iter())
            .chain(self.heads.iter());
        for layer in all {
            write_layer(writer, layer).map_err(io_err)?;
        }
        Ok(())
    }

    /// Deterministic He-uniform initialization.
    ///
    /// Produces untrained but well-scaled weights; used by tests and
    /// benchmarks that exercise the inference path without a shipped
    /// model file.
    pub fn seeded(variant: ModelVariant, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let heads = variant.mask_heads();
        let shapes = Self::expected_shapes(heads);

        let mut make = |shape: [usize; 4]| {
            let [out, inp, kh, kw] = shape;
            let fan_in = (inp * kh * kw) as f32;
            let limit = (6.0 / fan_in).sqrt();
            let weight = Array4::from_shape_fn((out, inp, kh, kw), |_| {
                (rng.random::<f32>() * 2.0 - 1.0) * limit
            });
            ConvLayer {
                weight,
                bias: Array1::zeros(out),
            }
        };

        Self {
            variant,
            encoder: [make(shapes[0]), make(shapes[1]), make(shapes[2])],
            bottleneck: make(shapes[3]),
            decoder: [make(shapes[4]), make(shapes[5]), make(shapes[6])],
            heads: shapes[7..].iter().map(|&s| make(s)).collect(),
        }
    }
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> SeparationResult<()> {
    reader
        .read_exact(buf)
        .map_err(|e| SeparationError::ModelUnavailable {
            reason: format!("truncated weight file: {e}"),
        })
}

fn read_u8(reader: &mut impl Read) -> SeparationResult<u8> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf)?;
    Ok(buf[0])
}

fn read_u16(reader: &mut impl Read) -> SeparationResult<u16> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read) -> SeparationResult<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_tensor_data(reader: &mut impl Read, len: usize) -> SeparationResult<Vec<f32>> {
    let mut bytes = vec![0u8; len * 4];
    read_exact(reader, &mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_layer(reader: &mut impl Read, expected: [usize; 4]) -> SeparationResult<ConvLayer> {
    let ndim = read_u8(reader)? as usize;
    if ndim != 4 {
        return Err(SeparationError::ModelUnavailable {
            reason: format!("expected 4-d kernel tensor, got {ndim}-d"),
        });
    }
    let mut dims = [0usize; 4];
    for d in dims.iter_mut() {
        *d = read_u32(reader)? as usize;
    }
    if dims != expected {
        return Err(SeparationError::ModelUnavailable {
            reason: format!("kernel shape {dims:?} does not match expected {expected:?}"),
        });
    }

    let data = read_tensor_data(reader, dims.iter().product())?;
    let weight = Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]), data)
        .map_err(|e| SeparationError::ModelUnavailable {
            reason: format!("kernel tensor: {e}"),
        })?;

    let bias_ndim = read_u8(reader)? as usize;
    if bias_ndim != 1 {
        return Err(SeparationError::ModelUnavailable {
            reason: format!("expected 1-d bias tensor, got {bias_ndim}-d"),
        });
    }
    let bias_len = read_u32(reader)? as usize;
    if bias_len != expected[0] {
        return Err(SeparationError::ModelUnavailable {
            reason: format!("bias length {bias_len} does not match {} channels", expected[0]),
        });
    }
    let bias = Array1::from_vec(read_tensor_data(reader, bias_len)?);

    Ok(ConvLayer { weight, bias })
}

fn write_layer(writer: &mut impl Write, layer: &ConvLayer) -> std::io::Result<()> {
    writer.write_all(&[4u8])?;
    for &dim in layer.weight.shape() {
        writer.write_all(&(dim as u32).to_le_bytes())?;
    }
    for &value in layer.weight.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }

    writer.write_all(&[1u8])?;
    writer.write_all(&(layer.bias.len() as u32).to_le_bytes())?;
    for &value in layer.bias.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_properties() {
        assert_eq!(ModelVariant::TwoStem.stem_count(), 2);
        assert_eq!(ModelVariant::FourStem.stem_count(), 4);
        assert_eq!(ModelVariant::TwoStem.mask_heads(), 1);
        assert_eq!(ModelVariant::FourStem.mask_heads(), 4);
        assert!(ModelVariant::from_stem_count(3).is_err());
    }

    #[test]
    fn seeded_weights_have_expected_shapes() {
        let weights = UNetWeights::seeded(ModelVariant::FourStem, 7);
        assert_eq!(weights.encoder[0].weight.shape(), &[16, 1, 3, 3]);
        assert_eq!(weights.bottleneck.weight.shape(), &[128, 64, 3, 3]);
        assert_eq!(weights.decoder[0].weight.shape(), &[64, 192, 3, 3]);
        assert_eq!(weights.heads.len(), 4);
        assert_eq!(weights.heads[0].weight.shape(), &[1, 16, 1, 1]);
    }

    #[test]
    fn seeded_weights_are_deterministic() {
        let a = UNetWeights::seeded(ModelVariant::TwoStem, 42);
        let b = UNetWeights::seeded(ModelVariant::TwoStem, 42);
        assert_eq!(a.encoder[0].weight, b.encoder[0].weight);
        assert_eq!(a.heads[0].weight, b.heads[0].weight);
    }

    #[test]
    fn round_trip_through_bytes() {
        let weights = UNetWeights::seeded(ModelVariant::TwoStem, 3);
        let mut bytes = Vec::new();
        weights.write_to(&mut bytes).unwrap();

        let loaded = UNetWeights::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded.variant, ModelVariant::TwoStem);
        assert_eq!(loaded.head_count(), 1);
        assert_eq!(loaded.encoder[2].weight, weights.encoder[2].weight);
        assert_eq!(loaded.bottleneck.bias, weights.bottleneck.bias);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let err = UNetWeights::read_from(&mut &b"NOPE"[..]).unwrap_err();
        assert!(matches!(err, SeparationError::ModelUnavailable { .. }));

        let weights = UNetWeights::seeded(ModelVariant::TwoStem, 3);
        let mut bytes = Vec::new();
        weights.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);
        let err = UNetWeights::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, SeparationError::ModelUnavailable { .. }));
    }
}

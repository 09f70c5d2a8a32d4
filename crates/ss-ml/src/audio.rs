//! Audio decoding
//!
//! Symphonia-backed decode of compressed or PCM audio into mono f32
//! samples. Multi-channel input is downmixed by averaging channels.

use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{SeparationError, SeparationResult};

fn decode_error(context: &str, err: impl std::fmt::Display) -> SeparationError {
    SeparationError::Decode {
        reason: format!("{context}: {err}"),
    }
}

/// Decode an in-memory audio file to mono samples and a sample rate.
///
/// `extension_hint` helps the probe pick a demuxer for containers
/// without a strong magic signature.
pub fn decode_bytes(
    bytes: Vec<u8>,
    extension_hint: Option<&str>,
) -> SeparationResult<(Vec<f32>, u32)> {
    if bytes.is_empty() {
        return Err(SeparationError::Decode {
            reason: "empty byte stream".into(),
        });
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_error("unrecognized audio format", e))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| SeparationError::Decode {
            reason: "no audio track found".into(),
        })?
        .clone();

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| SeparationError::Decode {
            reason: "could not determine sample rate".into(),
        })?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_error("unsupported codec", e))?;

    let mut mono = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(decode_error("packet read failed", e)),
        };

        if packet.track_id() != track.id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Recoverable corruption: skip the packet, keep going.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(decode_error("decode failed", e)),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if channels == 0 {
            continue;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        for frame in sample_buf.samples().chunks_exact(channels) {
            let sum: f32 = frame.iter().sum();
            mono.push(sum / channels as f32);
        }
    }

    if mono.is_empty() {
        return Err(SeparationError::Decode {
            reason: "no audio samples decoded".into(),
        });
    }

    log::debug!(
        "decoded {} mono samples @ {sample_rate} Hz",
        mono.len()
    );
    Ok((mono, sample_rate))
}

/// Decode an audio file from disk.
pub fn decode_file<P: AsRef<Path>>(path: P) -> SeparationResult<(Vec<f32>, u32)> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| decode_error(&format!("cannot read {}", path.display()), e))?;
    let ext = path.extension().and_then(|e| e.to_str());
    decode_bytes(bytes, ext)
}

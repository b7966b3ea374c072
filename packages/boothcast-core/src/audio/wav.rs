//! WAV container support for rendered commentary audio.
//!
//! Every audio segment on the wire is a complete 24 kHz 16-bit mono PCM
//! WAV file. The builder produces finite headers (one file per spoken
//! line, not an endless stream); the parser validates collaborator output
//! and backs the duration checks in tests.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::protocol_constants::{
    AUDIO_BITS_PER_SAMPLE, AUDIO_CHANNELS, AUDIO_SAMPLE_RATE, WAV_HEADER_LEN,
};

/// Errors from parsing a WAV payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavError {
    #[error("payload too short for a WAV header ({0} bytes)")]
    TooShort(usize),
    #[error("missing {0} marker")]
    BadMarker(&'static str),
    #[error("unsupported audio format tag {0} (want PCM)")]
    NotPcm(u16),
    #[error("data chunk length {declared} exceeds payload ({available} bytes)")]
    TruncatedData { declared: u32, available: usize },
}

/// Parsed WAV format description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

impl WavSpec {
    /// Playback duration implied by the data chunk.
    #[must_use]
    pub fn duration_seconds(&self) -> f32 {
        let bytes_per_second =
            self.sample_rate * self.channels as u32 * (self.bits_per_sample as u32 / 8);
        if bytes_per_second == 0 {
            return 0.0;
        }
        self.data_len as f32 / bytes_per_second as f32
    }

    /// Whether this matches the pipeline's fixed output format.
    #[must_use]
    pub fn is_pipeline_format(&self) -> bool {
        self.sample_rate == AUDIO_SAMPLE_RATE
            && self.channels == AUDIO_CHANNELS
            && self.bits_per_sample == AUDIO_BITS_PER_SAMPLE
    }
}

/// Generates a standard 44-byte WAVE header for a finite LPCM payload.
///
/// @param sample_rate - Typically 24000 for commentary segments.
/// @param channels - 1 (mono) or 2 (stereo).
/// @param bits_per_sample - Bit depth (16 or 24). Invalid values default to 16.
/// @param data_len - Exact byte length of the PCM payload that follows.
#[must_use]
pub fn create_wav_header(
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    data_len: u32,
) -> Bytes {
    let bits_per_sample = match bits_per_sample {
        16 | 24 => bits_per_sample,
        other => {
            log::warn!("[WAV] Invalid bits_per_sample {}, defaulting to 16", other);
            16
        }
    };

    let mut header = BytesMut::with_capacity(WAV_HEADER_LEN);

    let bytes_per_sample = bits_per_sample / 8;
    let byte_rate = sample_rate * channels as u32 * bytes_per_sample as u32;
    let block_align = channels * bytes_per_sample;

    // RIFF header
    header.put_slice(b"RIFF");
    header.put_u32_le(36 + data_len); // Header bytes after this field + data
    header.put_slice(b"WAVE");

    // fmt chunk
    header.put_slice(b"fmt ");
    header.put_u32_le(16); // Chunk size
    header.put_u16_le(1); // Audio format (PCM)
    header.put_u16_le(channels);
    header.put_u32_le(sample_rate);
    header.put_u32_le(byte_rate);
    header.put_u16_le(block_align);
    header.put_u16_le(bits_per_sample);

    // data chunk
    header.put_slice(b"data");
    header.put_u32_le(data_len);

    header.freeze()
}

/// Wraps raw PCM in the pipeline's fixed WAV format (24 kHz, 16-bit, mono).
#[must_use]
pub fn build_wav(pcm: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(WAV_HEADER_LEN + pcm.len());
    out.put_slice(&create_wav_header(
        AUDIO_SAMPLE_RATE,
        AUDIO_CHANNELS,
        AUDIO_BITS_PER_SAMPLE,
        pcm.len() as u32,
    ));
    out.put_slice(pcm);
    out.freeze()
}

/// Parses and validates a WAV payload's header.
///
/// Accepts the canonical 44-byte layout (fmt chunk directly followed by the
/// data chunk), which is what the TTS collaborator contract requires.
pub fn parse_wav(payload: &[u8]) -> Result<WavSpec, WavError> {
    if payload.len() < WAV_HEADER_LEN {
        return Err(WavError::TooShort(payload.len()));
    }

    let mut buf = payload;
    if &buf[..4] != b"RIFF" {
        return Err(WavError::BadMarker("RIFF"));
    }
    buf.advance(4);
    buf.advance(4); // RIFF size, unreliable in the wild
    if &buf[..4] != b"WAVE" {
        return Err(WavError::BadMarker("WAVE"));
    }
    buf.advance(4);
    if &buf[..4] != b"fmt " {
        return Err(WavError::BadMarker("fmt "));
    }
    buf.advance(4);
    buf.advance(4); // fmt chunk size

    let format_tag = buf.get_u16_le();
    if format_tag != 1 {
        return Err(WavError::NotPcm(format_tag));
    }
    let channels = buf.get_u16_le();
    let sample_rate = buf.get_u32_le();
    buf.advance(4); // byte rate
    buf.advance(2); // block align
    let bits_per_sample = buf.get_u16_le();

    if &buf[..4] != b"data" {
        return Err(WavError::BadMarker("data"));
    }
    buf.advance(4);
    let data_len = buf.get_u32_le();

    if data_len as usize > buf.remaining() {
        return Err(WavError::TruncatedData {
            declared: data_len,
            available: buf.remaining(),
        });
    }

    Ok(WavSpec {
        sample_rate,
        channels,
        bits_per_sample,
        data_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_yields_pipeline_format() {
        // One second of silence at 24 kHz mono 16-bit.
        let pcm = vec![0u8; 48_000];
        let wav = build_wav(&pcm);

        let spec = parse_wav(&wav).unwrap();
        assert!(spec.is_pipeline_format());
        assert_eq!(spec.data_len, 48_000);
        assert!((spec.duration_seconds() - 1.0).abs() < 0.001);
    }

    #[test]
    fn rejects_non_riff_payload() {
        let junk = vec![0u8; 64];
        assert_eq!(parse_wav(&junk), Err(WavError::BadMarker("RIFF")));
    }

    #[test]
    fn rejects_truncated_data_chunk() {
        let pcm = vec![0u8; 4_800];
        let wav = build_wav(&pcm);
        let cut = &wav[..wav.len() - 100];
        assert!(matches!(
            parse_wav(cut),
            Err(WavError::TruncatedData { .. })
        ));
    }

    #[test]
    fn rejects_non_pcm_format_tag() {
        let pcm = vec![0u8; 100];
        let mut wav = build_wav(&pcm).to_vec();
        // Format tag lives at offset 20.
        wav[20] = 3; // IEEE float
        assert_eq!(parse_wav(&wav), Err(WavError::NotPcm(3)));
    }

    #[test]
    fn invalid_bit_depth_defaults_to_16() {
        let header = create_wav_header(24_000, 1, 12, 0);
        let mut with_data = header.to_vec();
        with_data.extend_from_slice(&[]);
        let spec = parse_wav(&with_data).unwrap();
        assert_eq!(spec.bits_per_sample, 16);
    }
}

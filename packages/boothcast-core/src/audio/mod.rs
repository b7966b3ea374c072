//! Audio format plumbing for rendered commentary segments.

pub mod wav;

pub use wav::{build_wav, create_wav_header, parse_wav, WavError, WavSpec};

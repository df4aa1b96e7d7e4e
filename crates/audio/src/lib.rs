//! # audio
//!
//! Audio processing module for the M4T finetuning pipeline.
//!
//! This crate handles:
//! - WAV header probing and sample loading
//! - Channel layout normalization (channel-last)
//! - Kaldi-compatible log-mel filterbank extraction

pub mod fbank;
pub mod loader;

pub use fbank::FbankExtractor;
pub use loader::{WavInfo, load_wav, probe_wav, to_channel_last};

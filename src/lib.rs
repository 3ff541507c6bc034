pub mod config;
pub mod console_display;
pub mod dsp;
pub mod engine;
pub mod filter_bank;
pub mod monitor;
pub mod note_estimator;
pub mod osc_sender;
pub mod peaking_filter;
pub mod ring_buffer;
pub mod snapshot;
pub mod types;
pub mod wav_player;
pub mod wire;

#[cfg(feature = "audio")]
pub mod audio_input;

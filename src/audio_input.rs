use crate::config::AnalyzerConfig;
use crate::engine::AnalysisEngine;
use crate::snapshot::SnapshotClient;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig};
use log::{error, info};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no default audio input device found")]
    NoDevice,

    #[error("no supported input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start input stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("unsupported sample format {0:?}; use an F32, I16 or U16 device")]
    UnsupportedFormat(SampleFormat),
}

/// Live audio capture via cpal.
///
/// The analysis engine is moved into the cpal input callback, so filtering
/// and snapshot fills run on the device's realtime thread. Holds the cpal
/// `Stream` alive; drop this to stop capture.
pub struct AudioCapture {
    _stream: Stream,
    sample_rate: u32,
}

impl AudioCapture {
    /// Open the default input device and start analysing it.
    /// Returns immediately with the client for requesting snapshots.
    pub fn start(config: &AnalyzerConfig) -> Result<(Self, SnapshotClient), AudioError> {
        let host = cpal::default_host();

        let device = host.default_input_device().ok_or(AudioError::NoDevice)?;

        info!(
            "Audio input: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let chosen = capture_config(&device)?;
        let sample_rate = chosen.sample_rate().0;
        let format = chosen.sample_format();
        let stream_config: StreamConfig = chosen.into();

        let channels = stream_config.channels as usize;

        info!(
            "Capture config: {}Hz  {} ch  {:?} (analysing channel 0)",
            sample_rate, channels, format
        );

        let (mut engine, client) = AnalysisEngine::new(sample_rate, config);
        let err_fn = |e: cpal::StreamError| error!("Audio stream error: {e}");

        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _| engine.process_interleaved(data, channels, |s| s),
                err_fn,
                None,
            )?,
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    engine.process_interleaved(data, channels, |s| s as f32 / i16::MAX as f32)
                },
                err_fn,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                move |data: &[u16], _| {
                    // U16: 0 = -1.0, 32768 = 0.0, 65535 = +1.0
                    engine.process_interleaved(data, channels, |s| (s as f32 - 32768.0) / 32768.0)
                },
                err_fn,
                None,
            )?,
            fmt => return Err(AudioError::UnsupportedFormat(fmt)),
        };

        stream.play()?;

        Ok((
            Self {
                _stream: stream,
                sample_rate,
            },
            client,
        ))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// The device default, moved to 48 kHz when a range with the same channel
/// count covers it.
fn capture_config(device: &Device) -> Result<SupportedStreamConfig, AudioError> {
    const PREFERRED_RATE: SampleRate = SampleRate(48000);

    let default = device.default_input_config()?;
    if default.sample_rate() == PREFERRED_RATE {
        return Ok(default);
    }
    let Ok(mut ranges) = device.supported_input_configs() else {
        return Ok(default);
    };
    let covering = ranges.find(|r| {
        r.channels() == default.channels()
            && (r.min_sample_rate()..=r.max_sample_rate()).contains(&PREFERRED_RATE)
    });
    Ok(match covering {
        Some(range) => range.with_sample_rate(PREFERRED_RATE),
        None => default,
    })
}

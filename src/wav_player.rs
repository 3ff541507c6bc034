use crate::types::*;
use crossbeam_channel::Sender;
use hound::{SampleFormat, WavReader};
use log::info;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Streams a WAV file to the analysis engine as mono `AudioChunk`s.
///
/// Only the first channel is kept. With `realtime` set, chunks go out at
/// the file's own pace so the display behaves as it would on live input;
/// otherwise as fast as the engine accepts them.
pub struct WavPlayer {
    path: PathBuf,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl WavPlayer {
    /// Decode the whole file up front.
    pub fn open(path: &Path) -> Result<Self, hound::Error> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        info!(
            "WAV: {:?}  {} Hz  {} ch  {:?}  {} bit",
            path.file_name().unwrap_or_default(),
            spec.sample_rate,
            channels,
            spec.sample_format,
            spec.bits_per_sample,
        );

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max))
                    .collect::<Result<_, _>>()?
            }
        };

        let samples: Vec<f32> = interleaved.iter().step_by(channels).copied().collect();

        Ok(Self {
            path: path.to_path_buf(),
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Mono samples of the first channel.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }

    /// Send the file in `block_size` chunks. Returns the number of chunks
    /// delivered; stops early if the receiver hangs up.
    pub fn run(
        &self,
        tx: &Sender<AudioChunk>,
        block_size: usize,
        realtime: bool,
        clock: &SessionClock,
    ) -> usize {
        let block_size = block_size.max(1);
        info!(
            "WAV: {:.2}s, {} samples → streaming {}",
            self.duration().as_secs_f64(),
            self.samples.len(),
            if realtime { "at real-time pace" } else { "unpaced" }
        );

        let block_dur =
            Duration::from_secs_f64(block_size as f64 / self.sample_rate.max(1) as f64);
        let start = Instant::now();
        let mut sent = 0;

        for (i, block) in self.samples.chunks(block_size).enumerate() {
            if realtime {
                // Pace to real time: wait until this block's expected send time
                let target = block_dur * i as u32;
                let elapsed = start.elapsed();
                if elapsed < target {
                    thread::sleep(target - elapsed);
                }
            }

            let chunk = AudioChunk {
                timestamp_us: clock.now_us(),
                samples: block.to_vec(),
                sample_rate: self.sample_rate,
            };
            if tx.send(chunk).is_err() {
                // Engine shut down
                break;
            }
            sent += 1;
        }

        info!("WAV playback of {:?} complete ({} blocks).", self.path, sent);
        sent
    }
}

use crate::config::AnalyzerConfig;
use crate::filter_bank::FilterBank;
use crate::snapshot::{self, SnapshotClient, SnapshotResponder};
use crate::types::*;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use std::time::Duration;

/// Largest chunk converted at once by `process_interleaved`.
const SCRATCH_LEN: usize = 4096;

/// How long `run` waits for audio before servicing snapshots anyway.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// The realtime half of the analyzer: the filter bank plus the responder
/// end of the snapshot channel.
///
/// Every call does a fixed amount of work per sample and never blocks,
/// allocates or logs, so the whole struct can be moved into an audio
/// callback. [`AnalysisEngine::run`] is a convenience host loop for
/// sources that deliver blocks over a channel instead.
pub struct AnalysisEngine {
    bank: FilterBank,
    responder: SnapshotResponder,
    /// Channel-0 samples converted from interleaved input.
    scratch: Vec<f32>,
    blocks_processed: u64,
}

impl AnalysisEngine {
    /// Build an engine for `sample_rate` and the client that talks to it.
    pub fn new(sample_rate: u32, config: &AnalyzerConfig) -> (Self, SnapshotClient) {
        let sr = sample_rate as f64;
        let bank = FilterBank::new(
            sr,
            config.peak_gain_db,
            config.smoothing,
            config.ring_capacity(sr),
        );
        for (note, reason) in bank.diagnostics() {
            debug!("{} ({}) disabled: {:?}", note_name(note), note, reason);
        }
        let (client, responder) = snapshot::channel(config.snapshot_capacity);
        (
            Self {
                bank,
                responder,
                scratch: vec![0.0; SCRATCH_LEN],
                blocks_processed: 0,
            },
            client,
        )
    }

    /// Analyze one mono block, then answer any waiting snapshot requests.
    pub fn process_block(&mut self, block: &[f32]) {
        self.bank.process_block(block);
        self.blocks_processed += 1;
        self.responder.service(&self.bank);
    }

    /// Analyze channel 0 of an interleaved buffer of any sample type.
    pub fn process_interleaved<T: Copy>(
        &mut self,
        data: &[T],
        channels: usize,
        convert: impl Fn(T) -> f32,
    ) {
        let channels = channels.max(1);
        for frames in data.chunks(SCRATCH_LEN * channels) {
            let mut n = 0;
            for frame in frames.chunks(channels) {
                self.scratch[n] = convert(frame[0]);
                n += 1;
            }
            self.bank.process_block(&self.scratch[..n]);
        }
        self.blocks_processed += 1;
        self.responder.service(&self.bank);
    }

    /// Answer snapshot requests without new audio.
    pub fn service_snapshots(&mut self) -> usize {
        self.responder.service(&self.bank)
    }

    pub fn bank(&self) -> &FilterBank {
        &self.bank
    }

    pub fn responder(&self) -> &SnapshotResponder {
        &self.responder
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    /// Drive the engine from a channel of audio chunks. Keeps answering
    /// snapshots while the source is idle; returns when the source hangs up.
    pub fn run(&mut self, rx: Receiver<AudioChunk>) {
        info!(
            "Analysis engine running @ {} Hz ({} keys)",
            self.bank.sample_rate(),
            NOTE_COUNT
        );
        let mut rate_warned = false;

        loop {
            match rx.recv_timeout(IDLE_POLL) {
                Ok(chunk) => {
                    if !rate_warned && chunk.sample_rate as f64 != self.bank.sample_rate() {
                        warn!(
                            "Chunk at {} Hz fed to engine built for {} Hz; note bands will be off",
                            chunk.sample_rate,
                            self.bank.sample_rate()
                        );
                        rate_warned = true;
                    }
                    self.process_block(&chunk.samples);
                    if self.blocks_processed % 1000 == 0 {
                        debug!("Engine: {} blocks processed", self.blocks_processed);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.service_snapshots();
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // Last chance for requests that raced the end of the stream.
        self.service_snapshots();

        info!(
            "Analysis engine shutting down after {} blocks ({} snapshots served, {} malformed, {} replies dropped)",
            self.blocks_processed,
            self.responder.served(),
            self.responder.malformed_requests(),
            self.responder.dropped_replies()
        );
    }
}

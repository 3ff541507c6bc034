use crate::config::AnalyzerConfig;
use crate::snapshot::{PendingSnapshot, SnapshotClient, SnapshotError};
use crate::types::*;
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info, warn};
use std::mem;
use std::time::Duration;

/// Control-thread refresh loop.
///
/// Each tick settles whatever snapshot replies have arrived, keeps the most
/// recent power vector and waveform, and asks for fresh ones. At most one
/// request per kind is in flight: if the audio side has not answered yet
/// the tick simply reuses the last completed data. Returned buffers are
/// recycled as the next request's buffer.
pub struct SpectrumMonitor {
    client: SnapshotClient,
    consumers: Vec<Sender<SpectrumFrame>>,
    clock: SessionClock,
    fps: u32,
    waveform_len: usize,
    power_req: Option<PendingSnapshot>,
    wave_req: Option<PendingSnapshot>,
    power: Vec<f32>,
    waveform: Vec<f32>,
    spare_power: Option<Vec<f32>>,
    spare_wave: Option<Vec<f32>>,
    seq: u64,
    /// Waveform gets the next free slot before power.
    waveform_next: bool,
    engine_gone: bool,
}

impl SpectrumMonitor {
    pub fn new(
        client: SnapshotClient,
        config: &AnalyzerConfig,
        consumers: Vec<Sender<SpectrumFrame>>,
        clock: SessionClock,
    ) -> Self {
        Self {
            client,
            consumers,
            clock,
            fps: config.display_fps.max(1),
            waveform_len: config.waveform_len.max(1),
            power_req: None,
            wave_req: None,
            power: vec![0.0; NOTE_COUNT],
            waveform: vec![0.0; config.waveform_len.max(1)],
            spare_power: None,
            spare_wave: None,
            seq: 0,
            waveform_next: false,
            engine_gone: false,
        }
    }

    /// One refresh. Returns a frame if any snapshot completed since the last one.
    pub fn tick(&mut self) -> Option<SpectrumFrame> {
        self.client.dispatch();
        let mut changed = false;

        match harvest(&mut self.power_req) {
            Some(Ok(buf)) => {
                self.spare_power = Some(mem::replace(&mut self.power, buf));
                changed = true;
            }
            Some(Err(e)) => self.note_failure(SnapshotKind::Power, e),
            None => {}
        }
        match harvest(&mut self.wave_req) {
            Some(Ok(buf)) => {
                self.spare_wave = Some(mem::replace(&mut self.waveform, buf));
                changed = true;
            }
            Some(Err(e)) => self.note_failure(SnapshotKind::Waveform, e),
            None => {}
        }

        // The kind that went out least recently asks first, so a single free
        // slot alternates between them.
        let order = if self.waveform_next {
            [SnapshotKind::Waveform, SnapshotKind::Power]
        } else {
            [SnapshotKind::Power, SnapshotKind::Waveform]
        };
        for kind in order {
            self.issue(kind);
        }

        if !changed {
            return None;
        }
        self.seq += 1;
        Some(SpectrumFrame {
            seq: self.seq,
            timestamp_us: self.clock.now_us(),
            power: self.power.clone(),
            waveform: self.waveform.clone(),
        })
    }

    /// Tick at `display_fps` and fan frames out until every consumer has
    /// hung up or the engine is gone. Blocks the calling thread.
    pub fn run(&mut self) {
        let period = Duration::from_secs_f64(1.0 / self.fps as f64);
        info!(
            "Monitor running at {} fps → {} consumer(s)",
            self.fps,
            self.consumers.len()
        );
        let ticker = crossbeam_channel::tick(period);

        for _ in ticker.iter() {
            if let Some(frame) = self.tick() {
                self.publish(frame);
            }
            if self.consumers.is_empty() || self.engine_gone {
                break;
            }
        }

        self.client.shutdown();
        info!("Monitor shutting down after {} frames", self.seq);
    }

    /// Most recent completed power vector (zeros before the first reply).
    pub fn latest_power(&self) -> &[f32] {
        &self.power
    }

    pub fn latest_waveform(&self) -> &[f32] {
        &self.waveform
    }

    pub fn in_flight(&self) -> usize {
        self.client.in_flight()
    }

    pub fn engine_gone(&self) -> bool {
        self.engine_gone
    }

    fn publish(&mut self, frame: SpectrumFrame) {
        // A full consumer just misses this frame.
        self.consumers
            .retain(|tx| !matches!(tx.try_send(frame.clone()), Err(TrySendError::Disconnected(_))));
        if self.seq % 600 == 0 {
            debug!("Monitor: {}", frame);
        }
    }

    /// Send a request of `kind` unless one is already out or every slot is
    /// taken. A spare buffer stays put when nothing is sent.
    fn issue(&mut self, kind: SnapshotKind) {
        if self.engine_gone || !self.client.has_room() {
            return;
        }
        let buf = match kind {
            SnapshotKind::Power if self.power_req.is_none() => self
                .spare_power
                .take()
                .unwrap_or_else(|| vec![0.0; NOTE_COUNT]),
            SnapshotKind::Waveform if self.wave_req.is_none() => {
                let len = self.waveform_len;
                self.spare_wave.take().unwrap_or_else(|| vec![0.0; len])
            }
            _ => return,
        };
        match self.client.request(kind, buf) {
            Ok(p) => {
                match kind {
                    SnapshotKind::Power => self.power_req = Some(p),
                    SnapshotKind::Waveform => self.wave_req = Some(p),
                }
                self.waveform_next = kind == SnapshotKind::Power;
            }
            Err(e) => self.note_failure(kind, e),
        }
    }

    fn note_failure(&mut self, kind: SnapshotKind, error: SnapshotError) {
        match error {
            SnapshotError::Transport | SnapshotError::Destroyed => {
                if !self.engine_gone {
                    info!("Analysis engine disconnected ({})", error);
                }
                self.engine_gone = true;
            }
            SnapshotError::Backpressure { .. } => debug!("{} skipped: {}", kind, error),
            other => warn!("{} failed: {}", kind, other),
        }
    }
}

/// Take the result out of a settled request, clearing the slot.
fn harvest(slot: &mut Option<PendingSnapshot>) -> Option<Result<Vec<f32>, SnapshotError>> {
    let result = slot.as_mut()?.try_take()?;
    *slot = None;
    Some(result)
}

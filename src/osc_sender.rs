use crate::dsp::power_to_db;
use crate::types::*;
use crate::wire;
use crossbeam_channel::Receiver;
use log::{debug, error, info};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::UdpSocket;

/// Streams spectrum frames to an OSC listener over UDP.
///
/// Addresses:
///   /spectrum/power     blob: 88 little-endian f32, A0 first
///   /spectrum/peak      int MIDI note, float dB (omitted when silent)
///   /spectrum/waveform  blob: little-endian f32, oldest first
pub struct OscSender {
    rx: Receiver<SpectrumFrame>,
    target: String,
}

impl OscSender {
    pub fn new(rx: Receiver<SpectrumFrame>, target: String) -> Self {
        Self { rx, target }
    }

    /// Run the OSC sender loop. Blocks the calling thread.
    pub fn run(&self) {
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to bind UDP socket: {}", e);
                return;
            }
        };
        info!("OSC sender → {}", self.target);

        for frame in self.rx.iter() {
            if let Err(e) = self.send_frame(&socket, &frame) {
                debug!("OSC send error: {}", e);
            }
        }
        info!("OSC sender shutting down");
    }

    fn send_frame(
        &self,
        socket: &UdpSocket,
        frame: &SpectrumFrame,
    ) -> Result<(), Box<dyn std::error::Error>> {
        for packet in frame_packets(frame) {
            let buf = rosc::encoder::encode(&packet)?;
            socket.send_to(&buf, &self.target)?;
        }
        Ok(())
    }
}

/// The OSC messages describing one frame.
pub fn frame_packets(frame: &SpectrumFrame) -> Vec<OscPacket> {
    let mut packets = vec![message(
        "/spectrum/power",
        vec![OscType::Blob(wire::encode(&frame.power))],
    )];
    if let Some((note, power)) = frame.loudest_note() {
        packets.push(message(
            "/spectrum/peak",
            vec![OscType::Int(note as i32), OscType::Float(power_to_db(power))],
        ));
    }
    packets.push(message(
        "/spectrum/waveform",
        vec![OscType::Blob(wire::encode(&frame.waveform))],
    ));
    packets
}

fn message(addr: &str, args: Vec<OscType>) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args,
    })
}

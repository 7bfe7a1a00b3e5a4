use crate::alphabet::Symbol;
use crate::codec::PacketCodec;
use crate::config::ProtocolConfig;
use crate::error::Result;
use crate::protocol::MessageFramer;
use std::f32::consts::PI;
use std::sync::Arc;

/// One beep of a plan. `start` is relative to the beginning of the plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency: f32,
    pub start: f32,
}

/// Everything a host needs to render one packet: the beeps in order, their
/// shared duration and envelope, and the silence that must follow.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyPlan {
    pub tones: Vec<Tone>,
    pub tone_duration: f32,
    pub attack_time: f32,
    pub release_time: f32,
    pub gap_after: f32,
}

impl FrequencyPlan {
    pub fn frequencies(&self) -> Vec<f32> {
        self.tones.iter().map(|t| t.frequency).collect()
    }

    /// Beeps plus trailing gap, in seconds.
    pub fn duration(&self) -> f32 {
        self.tones.len() as f32 * self.tone_duration + self.gap_after
    }

    /// Samples the rendered plan occupies at `sample_rate`, gap included.
    pub fn sample_count(&self, sample_rate: u32) -> usize {
        let beep = (self.tone_duration * sample_rate as f32).round() as usize;
        let gap = (self.gap_after * sample_rate as f32).round() as usize;
        self.tones.len() * beep + gap
    }
}

pub struct Modulator {
    protocol: Arc<ProtocolConfig>,
    codec: PacketCodec,
    framer: MessageFramer,
}

impl Modulator {
    pub fn new(protocol: Arc<ProtocolConfig>) -> Result<Self> {
        let codec = PacketCodec::new(protocol.clone())?;
        let framer = MessageFramer::new(protocol.clone());
        Ok(Self {
            protocol,
            codec,
            framer,
        })
    }

    pub fn protocol(&self) -> &Arc<ProtocolConfig> {
        &self.protocol
    }

    /// Beep frequencies for the packet carrying `payload`, preamble and
    /// parity included.
    pub fn modulate(&self, payload: &[Symbol]) -> Result<FrequencyPlan> {
        let symbols = self.codec.encode(payload)?;

        let alphabet = self.protocol.alphabet();
        let beep = self.protocol.beep_time();
        let tones = symbols
            .iter()
            .enumerate()
            .map(|(i, &symbol)| Tone {
                frequency: alphabet.frequency(symbol),
                start: i as f32 * beep,
            })
            .collect();

        Ok(FrequencyPlan {
            tones,
            tone_duration: beep,
            attack_time: self.protocol.attack_time(),
            release_time: self.protocol.release_time(),
            gap_after: self.protocol.packet_gap_time(),
        })
    }

    /// One plan per packet of the segmented message, in wire order.
    pub fn modulate_message(&self, message: &[u8]) -> Result<Vec<FrequencyPlan>> {
        self.framer
            .segment(message)?
            .iter()
            .map(|payload| self.modulate(payload))
            .collect()
    }
}

/// Audio for a single beep, with the linear attack/release envelope a host
/// is expected to apply.
pub fn render_beep(
    frequency: f32,
    duration: f32,
    attack: f32,
    release: f32,
    sample_rate: u32,
    volume: f32,
) -> Vec<f32> {
    let samples_len = (duration * sample_rate as f32).round() as usize;
    (0..samples_len)
        .map(|i| {
            let t = duration / samples_len as f32 * i as f32;
            let fade_in = if attack > 0.0 { (t / attack).min(1.0) } else { 1.0 };
            let fade_out = if release > 0.0 {
                ((duration - t) / release).min(1.0)
            } else {
                1.0
            };
            (2.0 * PI * frequency * t).sin() * fade_in * fade_out * volume
        })
        .collect()
}

/// Reference rendering of a whole plan: every beep back to back, then the gap.
pub fn render(plan: &FrequencyPlan, sample_rate: u32, volume: f32) -> Vec<f32> {
    let mut samples = Vec::with_capacity(plan.sample_count(sample_rate));
    for tone in &plan.tones {
        samples.extend(render_beep(
            tone.frequency,
            plan.tone_duration,
            plan.attack_time,
            plan.release_time,
            sample_rate,
            volume,
        ));
    }
    let gap = (plan.gap_after * sample_rate as f32).round() as usize;
    samples.resize(samples.len() + gap, 0.0);
    samples
}

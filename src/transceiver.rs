use crate::alphabet::Symbol;
use crate::config::{DetectorConfig, ProtocolConfig};
use crate::demodulation::{DecodeStats, Demodulator};
use crate::error::Result;
use crate::modulation::{FrequencyPlan, Modulator};
use crate::protocol::MessageAssembler;
use crate::scheduler::{CompletionMode, Scheduler};
use log::warn;
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Receives everything the transceiver reports to its host.
pub trait EventSink {
    /// A complete payload was decoded.
    fn on_payload(&mut self, payload: &[Symbol]);

    /// A segmented message was reassembled and passed its checksum.
    fn on_message(&mut self, _message: &[u8]) {}

    /// The host must now render `plan` and report back through
    /// `Transceiver::render_complete` (unless completion is sample counted).
    fn on_transmit_request(&mut self, plan: &FrequencyPlan);
}

/// Owned form of the sink callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Payload(Vec<Symbol>),
    Message(Vec<u8>),
    Transmit(FrequencyPlan),
}

impl EventSink for Vec<Event> {
    fn on_payload(&mut self, payload: &[Symbol]) {
        self.push(Event::Payload(payload.to_vec()));
    }

    fn on_message(&mut self, message: &[u8]) {
        self.push(Event::Message(message.to_vec()));
    }

    fn on_transmit_request(&mut self, plan: &FrequencyPlan) {
        self.push(Event::Transmit(plan.clone()));
    }
}

/// Forwards events over an mpsc channel. Once the receiving end is gone,
/// events are discarded.
pub struct ChannelSink {
    sender: Sender<Event>,
    disconnected: bool,
}

impl ChannelSink {
    pub fn new(sender: Sender<Event>) -> Self {
        Self {
            sender,
            disconnected: false,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn send(&mut self, event: Event) {
        if self.disconnected {
            return;
        }
        if self.sender.send(event).is_err() {
            warn!("event receiver dropped, discarding further events");
            self.disconnected = true;
        }
    }
}

impl From<Sender<Event>> for ChannelSink {
    fn from(sender: Sender<Event>) -> Self {
        Self::new(sender)
    }
}

impl EventSink for ChannelSink {
    fn on_payload(&mut self, payload: &[Symbol]) {
        self.send(Event::Payload(payload.to_vec()));
    }

    fn on_message(&mut self, message: &[u8]) {
        self.send(Event::Message(message.to_vec()));
    }

    fn on_transmit_request(&mut self, plan: &FrequencyPlan) {
        self.send(Event::Transmit(plan.clone()));
    }
}

/// Half-duplex link endpoint.
///
/// The receiver is muted exactly while one of our own plans is in flight, so
/// a transceiver never decodes itself.
pub struct Transceiver<S: EventSink> {
    modulator: Modulator,
    demodulator: Demodulator,
    assembler: MessageAssembler,
    scheduler: Scheduler,
    sample_rate: u32,
    sink: S,
}

impl<S: EventSink> Transceiver<S> {
    pub fn new(protocol: Arc<ProtocolConfig>, sample_rate: u32, sink: S) -> Result<Self> {
        protocol.check_sample_rate(sample_rate)?;
        let timeout = protocol.message_timeout_samples(sample_rate);

        Ok(Self {
            modulator: Modulator::new(protocol.clone())?,
            demodulator: Demodulator::new(protocol.clone(), sample_rate)?,
            assembler: MessageAssembler::new(protocol).with_timeout(timeout),
            scheduler: Scheduler::new(CompletionMode::Explicit),
            sample_rate,
            sink,
        })
    }

    pub fn with_detector(mut self, detector: DetectorConfig) -> Result<Self> {
        self.demodulator =
            Demodulator::with_detector(self.protocol().clone(), self.sample_rate, detector)?;
        Ok(self)
    }

    /// Switch how plan completion is detected. Sample counting always uses the
    /// transceiver's own sample rate.
    pub fn with_completion(mut self, mode: CompletionMode) -> Self {
        let mode = match mode {
            CompletionMode::SampleCount { .. } => CompletionMode::SampleCount {
                sample_rate: self.sample_rate,
            },
            CompletionMode::Explicit => CompletionMode::Explicit,
        };
        self.scheduler = Scheduler::new(mode);
        self
    }

    pub fn push_sample(&mut self, sample: f32) {
        if self.scheduler.is_transmitting() {
            let started = self.scheduler.tick(1).is_some();
            self.after_schedule(started);
        }

        self.assembler.tick(1);
        if let Some(payload) = self.demodulator.push_sample(sample) {
            self.sink.on_payload(payload);
            if let Some(message) = self.assembler.push(payload) {
                self.sink.on_message(message);
            }
        }
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.push_sample(sample);
        }
    }

    pub fn send_payload(&mut self, payload: &[Symbol]) -> Result<()> {
        let plan = self.modulator.modulate(payload)?;
        self.enqueue(plan);
        Ok(())
    }

    pub fn send_mnemonics(&mut self, mnemonics: &str) -> Result<()> {
        let payload = self.protocol().alphabet().parse(mnemonics)?;
        self.send_payload(&payload)
    }

    /// Queue every packet of `message`. Returns the number of packets.
    pub fn send_message(&mut self, message: &[u8]) -> Result<usize> {
        let plans = self.modulator.modulate_message(message)?;
        let count = plans.len();
        for plan in plans {
            self.enqueue(plan);
        }
        Ok(count)
    }

    /// The host finished rendering the plan in flight.
    pub fn render_complete(&mut self) {
        let started = self.scheduler.complete().is_some();
        self.after_schedule(started);
    }

    fn enqueue(&mut self, plan: FrequencyPlan) {
        let started = self.scheduler.request_send(plan).is_some();
        self.after_schedule(started);
    }

    fn after_schedule(&mut self, started: bool) {
        self.demodulator.set_muted(self.scheduler.is_transmitting());
        if started {
            if let Some(plan) = self.scheduler.in_flight() {
                self.sink.on_transmit_request(plan);
            }
        }
    }

    pub fn is_transmitting(&self) -> bool {
        self.scheduler.is_transmitting()
    }

    pub fn is_receiving(&self) -> bool {
        self.demodulator.is_receiving()
    }

    pub fn pending_transmissions(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn protocol(&self) -> &Arc<ProtocolConfig> {
        self.modulator.protocol()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn decode_stats(&self) -> DecodeStats {
        self.demodulator.stats()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

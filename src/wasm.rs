use crate::alphabet::Symbol;
use crate::config::ProtocolConfig;
use crate::modulation::FrequencyPlan;
use crate::monitor::PerformanceMonitor;
use crate::transceiver::{EventSink, Transceiver};
use js_sys::{Float32Array, Function, Uint8Array};
use std::time::Duration;
use wasm_bindgen::prelude::*;

fn to_js(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Forwards events to JavaScript callbacks. A throwing callback is reported
/// on the console and otherwise ignored.
struct JsSink {
    on_payload: Function,
    on_message: Option<Function>,
    on_transmit: Function,
}

impl EventSink for JsSink {
    fn on_payload(&mut self, payload: &[Symbol]) {
        let array = Uint8Array::from(payload);
        if let Err(err) = self.on_payload.call1(&JsValue::NULL, &array) {
            web_sys::console::warn_2(&"payload callback failed:".into(), &err);
        }
    }

    fn on_message(&mut self, message: &[u8]) {
        if let Some(callback) = &self.on_message {
            let array = Uint8Array::from(message);
            if let Err(err) = callback.call1(&JsValue::NULL, &array) {
                web_sys::console::warn_2(&"message callback failed:".into(), &err);
            }
        }
    }

    /// Called with the carrier frequencies and the per-beep duration in
    /// seconds; the envelope and gap are the exported constants.
    fn on_transmit_request(&mut self, plan: &FrequencyPlan) {
        let frequencies = Float32Array::from(&plan.frequencies()[..]);
        let duration = JsValue::from_f64(plan.tone_duration as f64);
        if let Err(err) = self.on_transmit.call2(&JsValue::NULL, &frequencies, &duration) {
            web_sys::console::warn_2(&"transmit callback failed:".into(), &err);
        }
    }
}

#[wasm_bindgen]
pub struct WasmTransceiver {
    inner: Transceiver<JsSink>,
    monitor: PerformanceMonitor,
}

#[wasm_bindgen]
impl WasmTransceiver {
    #[wasm_bindgen(constructor)]
    pub fn new(
        sample_rate: u32,
        on_payload: Function,
        on_message: Option<Function>,
        on_transmit: Function,
    ) -> Result<WasmTransceiver, JsValue> {
        console_error_panic_hook::set_once();

        let sink = JsSink {
            on_payload,
            on_message,
            on_transmit,
        };
        let inner = Transceiver::new(ProtocolConfig::standard(), sample_rate, sink).map_err(to_js)?;

        Ok(Self {
            inner,
            monitor: PerformanceMonitor::new(sample_rate, Duration::from_secs(1)),
        })
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        self.inner.push_samples(samples);
    }

    pub fn send_payload(&mut self, payload: &[u8]) -> Result<(), JsValue> {
        self.inner.send_payload(payload).map_err(to_js)
    }

    pub fn send_mnemonics(&mut self, mnemonics: &str) -> Result<(), JsValue> {
        self.inner.send_mnemonics(mnemonics).map_err(to_js)
    }

    /// Returns the number of packets queued.
    pub fn send_message(&mut self, message: &[u8]) -> Result<usize, JsValue> {
        self.inner.send_message(message).map_err(to_js)
    }

    pub fn render_complete(&mut self) {
        self.inner.render_complete();
    }

    pub fn is_transmitting(&self) -> bool {
        self.inner.is_transmitting()
    }

    /// Report how long the host spent in `push_samples`. Returns the real-time
    /// ratio whenever a full second of audio has been accounted for.
    pub fn report_timing(&mut self, samples: usize, elapsed_ms: f64) -> Option<f64> {
        let elapsed = Duration::from_secs_f64(elapsed_ms.max(0.0) / 1000.0);
        let report = self.monitor.record(samples, elapsed)?;
        if !report.is_realtime() {
            web_sys::console::warn_1(
                &format!("receiver running at {:.2}x real time", report.ratio).into(),
            );
        }
        Some(report.ratio)
    }
}

#[wasm_bindgen]
pub fn beep_time() -> f32 {
    crate::BEEP_TIME
}

#[wasm_bindgen]
pub fn attack_time() -> f32 {
    crate::ATTACK_TIME
}

#[wasm_bindgen]
pub fn release_time() -> f32 {
    crate::RELEASE_TIME
}

#[wasm_bindgen]
pub fn packet_gap_time() -> f32 {
    crate::PACKET_GAP_TIME
}

#[wasm_bindgen]
pub fn payload_len() -> usize {
    crate::PAYLOAD_LEN
}

#[wasm_bindgen]
pub fn packet_len() -> usize {
    crate::PACKET_LEN
}

#[wasm_bindgen]
pub fn max_message_len() -> usize {
    crate::MAX_MESSAGE_LEN
}

#[wasm_bindgen]
pub fn symbol_mnemonics() -> String {
    crate::SYMBOL_MNEMONICS.to_string()
}

#[wasm_bindgen]
pub fn symbol_frequencies() -> Vec<f32> {
    ProtocolConfig::standard().alphabet().frequencies().to_vec()
}

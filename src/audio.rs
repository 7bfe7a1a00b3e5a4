use crate::error::{Result, TransceiverError};
use crate::modulation::{render, FrequencyPlan};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn device_error(err: impl std::fmt::Display) -> TransceiverError {
    TransceiverError::AudioDevice(err.to_string())
}

pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| device_error("No output device found"))?;

        let config = device.default_output_config().map_err(device_error)?.config();

        Ok(Self { device, config })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Render `plan` and block until it has been played, gap included.
    pub fn play_plan(&self, plan: &FrequencyPlan, volume: f32) -> Result<()> {
        self.play_samples(render(plan, self.sample_rate(), volume))
    }

    /// Play mono samples on every output channel and block until done.
    pub fn play_samples(&self, samples: Vec<f32>) -> Result<()> {
        let channels = self.config.channels.max(1) as usize;
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = Arc::clone(&finished);
        let mut position = 0usize;

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = if position < samples.len() {
                            position += 1;
                            samples[position - 1]
                        } else {
                            finished_clone.store(true, Ordering::Release);
                            0.0
                        };
                        frame.fill(sample);
                    }
                },
                |err| log::error!("Audio output error: {}", err),
                None,
            )
            .map_err(device_error)?;

        stream.play().map_err(device_error)?;

        while !finished.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(10));
        }

        // let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));

        Ok(())
    }
}

pub struct AudioInput {
    device: Device,
    config: StreamConfig,
}

impl AudioInput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| device_error("No input device found"))?;

        let config = device.default_input_config().map_err(device_error)?.config();

        Ok(Self { device, config })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Start capturing. Every device buffer is averaged down to mono and
    /// handed to `on_buffer`. Capture stops when the returned stream is
    /// dropped.
    pub fn stream_into<F>(&self, mut on_buffer: F) -> Result<Stream>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        let channels = self.config.channels.max(1) as usize;
        let mut mono = Vec::new();

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    mono.clear();
                    mono.extend(
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                    );
                    on_buffer(&mono);
                },
                |err| log::error!("Audio input error: {}", err),
                None,
            )
            .map_err(device_error)?;

        stream.play().map_err(device_error)?;

        Ok(stream)
    }
}

pub fn list_audio_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let rate = device
                    .default_output_config()
                    .map(|c| format!(" ({} Hz)", c.sample_rate().0))
                    .unwrap_or_default();
                devices.push(format!("Output: {}{}", name, rate));
            }
        }
    }

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let rate = device
                    .default_input_config()
                    .map(|c| format!(" ({} Hz)", c.sample_rate().0))
                    .unwrap_or_default();
                devices.push(format!("Input: {}{}", name, rate));
            }
        }
    }

    devices
}

// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{error::Error, fmt, sync::Arc, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use crate::audio::mixer::{AudioMixer, MixerPlayer, Voice};
use crate::audio::{Device as AudioDevice, PadPlayer};
use crate::config;
use crate::samples::LoadedSample;

/// Name that selects the host's default output device.
pub const DEFAULT_DEVICE: &str = "default";

/// Describes an output device for listing.
pub struct DeviceInfo {
    name: String,
    host_id: cpal::HostId,
    max_channels: u16,
}

impl DeviceInfo {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// An output device with a continuously running stream. Every player created by the
/// device is mixed into that stream.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host the device belongs to.
    host_id: cpal::HostId,
    /// Output sample rate of the stream.
    sample_rate: u32,
    /// Output channel count of the stream.
    channels: u16,
    /// Hands voices to the stream's mixer.
    voice_tx: crossbeam_channel::Sender<Arc<Voice>>,
    /// Dropping this ends the output thread.
    shutdown_tx: Option<crossbeam_channel::Sender<()>>,
    /// Handle to the thread that owns the stream.
    output_thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, {}Hz) ({})",
            self.name,
            self.channels,
            self.sample_rate,
            self.host_id.name()
        )
    }
}

/// f32 callback: mix straight into the cpal buffer.
fn create_f32_callback(
    mut mixer: AudioMixer,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        mixer.process(data);
    }
}

/// Integer callback: mix into a scratch buffer and convert.
fn create_converting_callback<T>(
    mut mixer: AudioMixer,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        scratch.resize(data.len(), 0.0);
        mixer.process(&mut scratch);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

/// Builds and starts the output stream. Must run on the thread that keeps the stream.
fn start_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: AudioMixer,
) -> Result<cpal::Stream, Box<dyn Error>> {
    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            config,
            create_f32_callback(mixer),
            |err| error!("CPAL output stream error: {}", err),
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_output_stream(
            config,
            create_converting_callback::<i16>(mixer),
            |err| error!("CPAL output stream error: {}", err),
            None,
        )?,
        cpal::SampleFormat::I32 => device.build_output_stream(
            config,
            create_converting_callback::<i32>(mixer),
            |err| error!("CPAL output stream error: {}", err),
            None,
        )?,
        other => return Err(format!("unsupported output sample format {:?}", other).into()),
    };
    stream.play()?;
    Ok(stream)
}

impl Device {
    /// Lists output devices across every available host.
    pub fn list() -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
        let mut devices = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|output_config| output_config.channels())
                    .max()
                    .unwrap_or(0);
                if max_channels > 0 {
                    devices.push(DeviceInfo {
                        name: device.name()?,
                        host_id,
                        max_channels,
                    });
                }
            }
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    /// Finds the named output device, searching every host.
    fn find(name: &str) -> Result<(cpal::HostId, cpal::Device), Box<dyn Error>> {
        if name == DEFAULT_DEVICE {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device")?;
            return Ok((host.id(), device));
        }

        for host_id in cpal::available_hosts() {
            let Ok(devices) = cpal::host_from_id(host_id)?.output_devices() else {
                continue;
            };
            for device in devices {
                if device.name().map(|n| n.trim() == name).unwrap_or(false) {
                    return Ok((host_id, device));
                }
            }
        }

        Err(format!("no device found with name {}", name).into())
    }

    /// Opens the configured device and starts its output stream.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let (host_id, device) = Device::find(config.device())?;
        let name = device.name()?;
        let supported = device.default_output_config()?;
        let sample_format = supported.sample_format();

        let mut stream_config: cpal::StreamConfig = supported.into();
        if let Some(sample_rate) = config.sample_rate() {
            stream_config.sample_rate = sample_rate;
        }
        if let Some(buffer_size) = config.buffer_size() {
            stream_config.buffer_size = cpal::BufferSize::Fixed(buffer_size);
        }
        let sample_rate = stream_config.sample_rate;
        let channels = stream_config.channels;

        let (mixer, voice_tx) = AudioMixer::new(channels);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        // cpal streams aren't Send on every platform, so the stream lives and dies on
        // its own thread.
        let output_thread = {
            let name = name.clone();
            thread::spawn(move || {
                let span = span!(Level::INFO, "audio output", device = name);
                let _enter = span.enter();

                let stream = match start_stream(&device, &stream_config, sample_format, mixer)
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                info!(sample_rate, channels, "CPAL output stream started");
                let _ = ready_tx.send(Ok(()));

                // Blocks until the device is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                info!("CPAL output stream stopped");
            })
        };

        ready_rx
            .recv()
            .map_err(|_| "audio output thread exited before starting")??;

        Ok(Device {
            name,
            host_id,
            sample_rate,
            channels,
            voice_tx,
            shutdown_tx: Some(shutdown_tx),
            output_thread: Some(output_thread),
        })
    }
}

impl AudioDevice for Device {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_player(&self, sample: LoadedSample) -> Arc<dyn PadPlayer> {
        Arc::new(MixerPlayer::new(sample, self.voice_tx.clone()))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown_tx.take();
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}

//! Real-time audio output using cpal
//! Works with JACK, ALSA, CoreAudio, WASAPI, etc.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{MosaicError, Result};
use crate::voice_manager::VoiceBank;

/// Output stream mixing the voice bank. Dropping it stops playback.
pub struct AudioOutput {
    _stream: cpal::Stream,
}

impl AudioOutput {
    pub fn open(bank: Arc<VoiceBank>) -> Result<Self> {
        let host = cpal::default_host();
        info!("Audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or_else(|| MosaicError::AudioDevice("no audio output device found".into()))?;
        info!(
            "Output device: {}",
            device.name().unwrap_or_else(|_| "<unnamed>".into())
        );

        let config = device
            .default_output_config()
            .map_err(|e| MosaicError::AudioDevice(e.to_string()))?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        bank.set_output_rate(sample_rate);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &config.into(), bank, channels),
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &config.into(), bank, channels),
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &config.into(), bank, channels),
            other => Err(MosaicError::AudioDevice(format!(
                "unsupported sample format {:?}",
                other
            ))),
        }?;

        stream
            .play()
            .map_err(|e| MosaicError::AudioDevice(e.to_string()))?;
        info!("Audio output started at {} Hz, {} channels", sample_rate, channels);

        Ok(Self { _stream: stream })
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        bank: Arc<VoiceBank>,
        channels: usize,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let mut left = Vec::new();
        let mut right = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels.max(1);
                    if left.len() < frames {
                        left.resize(frames, 0.0);
                        right.resize(frames, 0.0);
                    }
                    bank.mix_block(&mut left[..frames], &mut right[..frames]);
                    write_interleaved(data, channels, &left[..frames], &right[..frames]);
                },
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| MosaicError::AudioDevice(e.to_string()))
    }

}

/// Write a stereo block to an interleaved buffer of any channel count.
/// Mono devices get the average; channels beyond two stay silent.
fn write_interleaved<T>(data: &mut [T], channels: usize, left: &[f32], right: &[f32])
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    for ((frame, l), r) in data.chunks_mut(channels.max(1)).zip(left).zip(right) {
        match frame {
            [mono] => *mono = T::from_sample((l + r) * 0.5),
            [a, b, rest @ ..] => {
                *a = T::from_sample(*l);
                *b = T::from_sample(*r);
                for extra in rest {
                    *extra = T::from_sample(0.0);
                }
            }
            [] => {}
        }
    }
}

/// A device line for `mosaic devices`
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub input: bool,
    pub is_default: bool,
}

/// Enumerate input and output devices on the default host
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    let inputs = host
        .input_devices()
        .map_err(|e| MosaicError::AudioDevice(e.to_string()))?;
    for device in inputs {
        if let Ok(name) = device.name() {
            let is_default = default_in.as_deref() == Some(name.as_str());
            devices.push(DeviceInfo { name, input: true, is_default });
        }
    }
    let outputs = host
        .output_devices()
        .map_err(|e| MosaicError::AudioDevice(e.to_string()))?;
    for device in outputs {
        if let Ok(name) = device.name() {
            let is_default = default_out.as_deref() == Some(name.as_str());
            devices.push(DeviceInfo { name, input: false, is_default });
        }
    }
    Ok(devices)
}

//! Audio capture from microphone
//!
//! cpal streams are not `Send`, so each open device lives on its own thread.
//! The stream callback down-mixes, resamples and slices the input into
//! frames, then hands them to the shared [`FrameQueue`].

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use tokio::sync::oneshot;

use super::frame::{AudioFormat, AudioFrame, FrameAssembler, downmix_to_mono};
use super::resample::StreamResampler;
use super::source::{AudioSource, FrameQueue};
use crate::{Error, Result};

struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Microphone input as an [`AudioSource`]
pub struct MicSource {
    device_name: Option<String>,
    queue: Arc<FrameQueue>,
    worker: Option<CaptureWorker>,
}

impl MicSource {
    /// Create a source for the named input device (substring match, case
    /// insensitive) or the default device
    #[must_use]
    pub fn new(device_name: Option<String>, queue_frames: usize) -> Self {
        Self {
            device_name,
            queue: Arc::new(FrameQueue::new(queue_frames)),
            worker: None,
        }
    }

    /// Frames dropped so far because the reader fell behind
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.queue.dropped()
    }
}

#[async_trait]
impl AudioSource for MicSource {
    fn name(&self) -> &str {
        self.device_name.as_deref().unwrap_or("default input")
    }

    async fn open(&mut self, format: AudioFormat) -> Result<()> {
        self.close();
        self.queue.reset();

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let queue = Arc::clone(&self.queue);
        let device_name = self.device_name.clone();

        let handle = std::thread::Builder::new()
            .name("mirror-capture".to_string())
            .spawn(move || capture_thread(device_name.as_deref(), format, queue, ready_tx, &stop_rx))
            .map_err(|e| Error::Device(format!("cannot spawn capture thread: {e}")))?;

        let device = ready_rx
            .await
            .map_err(|_| Error::Device("capture thread exited before start".to_string()))??;

        tracing::info!(
            device = %device,
            sample_rate = format.sample_rate,
            frame_ms = format.frame_ms,
            "audio capture started"
        );

        self.worker = Some(CaptureWorker { stop_tx, handle });
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<AudioFrame> {
        if self.worker.is_none() {
            return Err(Error::Device("microphone not open".to_string()));
        }
        self.queue.pop().await
    }

    fn discard_pending(&mut self) -> usize {
        self.queue.clear()
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            // Receiver may already be gone if the thread bailed out
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                tracing::error!("capture thread panicked");
            }
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Body of the capture thread: start the stream, report readiness, park
fn capture_thread(
    device_name: Option<&str>,
    format: AudioFormat,
    queue: Arc<FrameQueue>,
    ready: oneshot::Sender<Result<String>>,
    stop_rx: &std_mpsc::Receiver<()>,
) {
    let stream = match start_stream(device_name, format, queue) {
        Ok((stream, name)) => {
            if ready.send(Ok(name)).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Park until close() or the source is dropped
    let _ = stop_rx.recv();
    drop(stream);
}

/// Converts raw callback data into frames on the queue
struct SampleSink {
    channels: u16,
    resampler: Option<StreamResampler>,
    assembler: FrameAssembler,
    queue: Arc<FrameQueue>,
}

impl SampleSink {
    fn accept(&mut self, data: &[f32]) {
        let mono = downmix_to_mono(data, self.channels);
        let samples = match self.resampler.as_mut() {
            Some(resampler) => match resampler.process(&mono) {
                Ok(out) => out,
                Err(e) => {
                    tracing::error!(error = %e, "resampling failed, dropping audio");
                    return;
                }
            },
            None => mono,
        };
        let queue = &self.queue;
        self.assembler.push(&samples, |frame| queue.push(frame));
    }
}

fn start_stream(
    device_name: Option<&str>,
    format: AudioFormat,
    queue: Arc<FrameQueue>,
) -> Result<(Stream, String)> {
    let host = cpal::default_host();
    let device = find_input_device(&host, device_name)?;
    let name = device.name().unwrap_or_else(|_| "<unknown>".into());

    let (config, sample_format) = resolve_config(&device, format.sample_rate)?;
    let device_rate = config.sample_rate.0;

    let resampler = if device_rate == format.sample_rate {
        None
    } else {
        tracing::warn!(
            device = %name,
            requested = format.sample_rate,
            actual = device_rate,
            "sample rate not supported, resampling"
        );
        Some(StreamResampler::new(device_rate, format.sample_rate)?)
    };

    let sink = SampleSink {
        channels: config.channels,
        resampler,
        assembler: FrameAssembler::new(format),
        queue: Arc::clone(&queue),
    };

    tracing::debug!(
        device = %name,
        sample_rate = device_rate,
        channels = config.channels,
        ?sample_format,
        "audio capture initialized"
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, sink, queue)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, sink, queue)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, sink, queue)?,
        other => {
            return Err(Error::Device(format!("unsupported sample format {other:?}")));
        }
    };

    stream.play().map_err(|e| Error::Device(e.to_string()))?;
    Ok((stream, name))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut sink: SampleSink,
    queue: Arc<FrameQueue>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                sink.accept(&samples);
            },
            move |err| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    tracing::error!("input device disconnected");
                    queue.fail("input device disconnected");
                }
                other => tracing::error!(error = %other, "audio capture error"),
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))
}

fn find_input_device(host: &cpal::Host, pattern: Option<&str>) -> Result<Device> {
    if let Some(pattern) = pattern {
        let pat = pattern.to_lowercase();
        let found = host
            .input_devices()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n.to_lowercase().contains(&pat)));
        if let Some(device) = found {
            return Ok(device);
        }
        tracing::warn!(pattern, "input device not found, using default");
    }

    host.default_input_device()
        .ok_or_else(|| Error::Device("no input device available".to_string()))
}

/// Prefer mono f32 at the requested rate, then any layout at that rate,
/// then the device default
fn resolve_config(device: &Device, sample_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
    let rate = SampleRate(sample_rate);
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .collect();

    let best = ranges
        .iter()
        .find(|c| c.channels() == 1 && c.sample_format() == SampleFormat::F32)
        .or_else(|| ranges.iter().find(|c| c.channels() == 1))
        .or_else(|| ranges.first());

    if let Some(range) = best {
        let supported = range.clone().with_sample_rate(rate);
        return Ok((supported.config(), supported.sample_format()));
    }

    let default = device
        .default_input_config()
        .map_err(|e| Error::Device(e.to_string()))?;
    Ok((default.config(), default.sample_format()))
}

/// List available input device names
#[must_use]
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate input devices");
            Vec::new()
        }
    }
}

/// Convert f32 samples to 16-bit PCM WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }

        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header_and_length() {
        let wav = samples_to_wav(&[0.0; 160], 16000).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header plus two bytes per sample
        assert_eq!(wav.len(), 44 + 320);
    }

    #[test]
    fn test_wav_clamps_out_of_range() {
        let wav = samples_to_wav(&[2.0, -2.0], 16000).unwrap();
        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![32767, -32768]);
    }

    #[tokio::test]
    async fn test_read_before_open_is_device_error() {
        let mut mic = MicSource::new(None, 4);
        assert!(matches!(mic.read_frame().await, Err(Error::Device(_))));
        assert_eq!(mic.discard_pending(), 0);
    }

    #[test]
    fn test_sink_frames_and_downmixes() {
        let queue = Arc::new(FrameQueue::new(8));
        let mut sink = SampleSink {
            channels: 2,
            resampler: None,
            assembler: FrameAssembler::new(AudioFormat::default()),
            queue: Arc::clone(&queue),
        };

        sink.accept(&vec![0.5; 3200 * 2]);
        assert_eq!(queue.len(), 2);
    }
}

//! Sample-rate conversion with rubato

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input chunk fed to the FFT resampler
const CHUNK_SIZE: usize = 1024;

/// Sub-chunks per FFT chunk
const SUB_CHUNKS: usize = 2;

/// Streaming mono resampler
///
/// Accepts arbitrary-length input, buffering the remainder until a full
/// chunk is available.
pub struct StreamResampler {
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a resampler from `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns error if rubato rejects the rates
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_SIZE,
            SUB_CHUNKS,
            1,
        )
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    /// Push samples, returning whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if rubato fails to process a chunk
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let result = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            output.extend_from_slice(&result[0]);
        }

        Ok(output)
    }
}

/// Resample a whole buffer at once
///
/// The final partial chunk is zero-padded so no input is lost.
///
/// # Errors
///
/// Returns error if resampling fails
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    let mut output = resampler.process(samples)?;

    let remainder = resampler.pending.len();
    if remainder > 0 {
        let pad = resampler.resampler.input_frames_next() - remainder;
        let tail = resampler.process(&vec![0.0; pad])?;
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let keep = (remainder as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
        output.extend(tail.into_iter().take(keep));
    }

    Ok(output)
}

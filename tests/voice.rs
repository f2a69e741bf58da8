//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::time::Duration;

use mirror_voice::config::{CaptureConfig, WakeConfig};
use mirror_voice::session;
use mirror_voice::voice::{
    AudioFormat, AudioSource, EndReason, SAMPLE_RATE, ScriptedSource, UtteranceCapturer,
    WakeOrigin, WakeWordDetector, samples_to_wav,
};
use mirror_voice::Error;

mod common;

use common::{concat, level_frames, silence, sine};

fn default_detector() -> WakeWordDetector {
    WakeWordDetector::from_config(&WakeConfig::default(), AudioFormat::default())
}

#[test]
fn test_silence_never_wakes() {
    let mut detector = default_detector();
    let frames = level_frames(&[0.0; 100], 0);

    assert!(frames.iter().all(|f| detector.feed(f).is_none()));
    assert!(detector.is_armed());
}

#[test]
fn test_background_noise_never_wakes() {
    let mut detector = default_detector();

    // Hum below the energy threshold, with quiet gaps
    let levels: Vec<f32> = (0..100).map(|i| if i % 7 < 4 { 0.02 } else { 0.0 }).collect();
    let frames = level_frames(&levels, 0);

    assert!(frames.iter().all(|f| detector.feed(f).is_none()));
}

#[test]
fn test_continuous_speech_never_wakes() {
    let mut detector = default_detector();

    // Loud for three seconds: longer than any wake phrase
    let mut levels = vec![0.0; 5];
    levels.extend([0.3; 30]);
    levels.extend([0.0; 10]);
    let frames = level_frames(&levels, 0);

    assert!(frames.iter().all(|f| detector.feed(f).is_none()));
}

#[test]
fn test_click_never_wakes() {
    let mut detector = default_detector();

    let mut levels = vec![0.0; 5];
    levels.push(0.5);
    levels.extend([0.0; 10]);
    let frames = level_frames(&levels, 0);

    assert!(frames.iter().all(|f| detector.feed(f).is_none()));
}

#[test]
fn test_wake_phrase_fires_after_pause() {
    let mut detector = default_detector();

    // 0.5 s silence, 0.5 s "hello", 0.4 s pause
    let mut levels = vec![0.0; 5];
    levels.extend([0.2; 5]);
    levels.extend([0.0; 4]);
    let frames = level_frames(&levels, 0);

    let events: Vec<_> = frames.iter().filter_map(|f| detector.feed(f)).collect();
    assert_eq!(events.len(), 1);

    let event = &events[0];
    assert_eq!(event.origin, WakeOrigin::Detector);
    assert_eq!(event.phrase, "hello");
    assert_eq!(event.timestamp, Duration::from_millis(1400));
    assert!(event.confidence > 0.5 && event.confidence <= 1.0);
    assert!(!detector.is_armed());
}

#[test]
fn test_repeat_inside_debounce_fires_once() {
    let mut detector = default_detector();

    let mut levels = vec![0.0; 5];
    levels.extend([0.2; 5]);
    levels.extend([0.0; 4]);
    let first: Vec<_> = level_frames(&levels, 0)
        .iter()
        .filter_map(|f| detector.feed(f))
        .collect();
    assert_eq!(first.len(), 1);
    detector.rearm();

    // Same phrase again one second later
    let mut levels = vec![0.0; 1];
    levels.extend([0.2; 5]);
    levels.extend([0.0; 4]);
    let repeat: Vec<_> = level_frames(&levels, 1400)
        .iter()
        .filter_map(|f| detector.feed(f))
        .collect();
    assert!(repeat.is_empty());
    assert!(detector.is_armed());

    // And once more after the debounce window
    let mut levels = vec![0.0; 10];
    levels.extend([0.2; 5]);
    levels.extend([0.0; 4]);
    let later: Vec<_> = level_frames(&levels, 2400)
        .iter()
        .filter_map(|f| detector.feed(f))
        .collect();
    assert_eq!(later.len(), 1);
}

#[test]
fn test_suspended_detector_ignores_phrase() {
    let mut detector = default_detector();
    detector.suspend();

    let mut levels = vec![0.0; 5];
    levels.extend([0.2; 5]);
    levels.extend([0.0; 4]);
    let frames = level_frames(&levels, 0);

    assert!(frames.iter().all(|f| detector.feed(f).is_none()));
}

#[tokio::test]
async fn test_capture_of_silence_runs_to_cap() {
    let config = CaptureConfig::default();
    let format = AudioFormat::default();
    let mut source = ScriptedSource::from_samples(silence(10.0), SAMPLE_RATE);
    source.open(format).await.unwrap();
    let (_operator, mut signals) = session::channel();

    let capturer = UtteranceCapturer::new(&config, format);
    let utterance = capturer.capture(&mut source, Vec::new(), &mut signals).await.unwrap();

    assert_eq!(utterance.end_reason(), EndReason::MaxDuration);
    assert_eq!(utterance.duration(), config.max_duration);
    assert!(utterance.is_empty());
}

#[tokio::test]
async fn test_capture_ends_after_trailing_silence() {
    let format = AudioFormat::default();
    let audio = concat(&[silence(0.2), sine(2.0, 0.3), silence(1.0)]);
    let mut source = ScriptedSource::from_samples(audio, SAMPLE_RATE);
    source.open(format).await.unwrap();
    let (_operator, mut signals) = session::channel();

    let capturer = UtteranceCapturer::new(&CaptureConfig::default(), format);
    let utterance = capturer.capture(&mut source, Vec::new(), &mut signals).await.unwrap();

    assert_eq!(utterance.end_reason(), EndReason::Silence);
    assert_eq!(utterance.voiced_frames(), 20);
    // 0.2 s lead-in, 2 s of speech, 0.7 s of trailing silence
    assert_eq!(utterance.duration(), Duration::from_millis(2900));

    // The rest of the pause is still in the source
    for _ in 0..3 {
        source.read_frame().await.unwrap();
    }
    assert!(matches!(source.read_frame().await, Err(Error::SourceExhausted)));
}

#[test]
fn test_samples_to_wav() {
    let samples = sine(0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // 44-byte header plus 16-bit samples
    assert_eq!(wav_data.len(), 44 + samples.len() * 2);
}

#[test]
fn test_wav_roundtrip() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
    assert_eq!(read_samples[3], 32767);
    assert_eq!(read_samples[4], -32767);
}

#[tokio::test]
async fn test_stereo_wav_file_replays_as_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.wav");

    // One second of stereo 48 kHz audio
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..48000 {
        writer.write_sample(8000_i16).unwrap();
        writer.write_sample(8000_i16).unwrap();
    }
    writer.finalize().unwrap();

    let format = AudioFormat::default();
    let mut source = ScriptedSource::from_wav(&path).unwrap();
    source.open(format).await.unwrap();

    let mut frames = Vec::new();
    loop {
        match source.read_frame().await {
            Ok(frame) => frames.push(frame),
            Err(Error::SourceExhausted) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // Resampler latency may spill into one padded frame
    assert!((10..=11).contains(&frames.len()), "{} frames", frames.len());
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.sample_rate(), SAMPLE_RATE);
        assert_eq!(frame.samples().len(), format.frame_len());
        assert_eq!(frame.timestamp(), Duration::from_millis(100 * i as u64));
    }

    // Resampled level survives, away from the filter edges
    let level = frames[5].energy();
    assert!((level - 8000.0 / 32768.0).abs() < 0.02, "level {level}");
}

#[test]
fn test_missing_wav_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(ScriptedSource::from_wav(&dir.path().join("missing.wav")).is_err());
}

//! Voice processing module
//!
//! Handles audio capture, wake word detection, utterance capture,
//! speech recognition, synthesis and playback.

mod capture;
mod frame;
mod playback;
mod resample;
mod source;
mod stt;
mod tts;
mod utterance;
mod wake_word;

pub use capture::{MicSource, list_input_devices, samples_to_wav};
pub use frame::{AudioFormat, AudioFrame, DEFAULT_FRAME_MS, FrameAssembler, SAMPLE_RATE, downmix_to_mono, rms};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, PlaybackEnd, decode_mp3};
pub use resample::{StreamResampler, resample};
pub use source::{AudioSource, FrameQueue, Pacing, ScriptedSource};
pub use stt::{SpeechToText, Transcriber, transcriber_from_config};
pub use tts::{CloudSpeaker, ConsoleSpeaker, Speaker, TextToSpeech, TtsProvider, speaker_from_config};
pub use utterance::{EndReason, Utterance, UtteranceCapturer};
pub use wake_word::{
    DetectorState, EnergySpotter, KeywordSpotter, ManualSpotter, RollingWindow, WakeEvent,
    WakeOrigin, WakeWordDetector,
};

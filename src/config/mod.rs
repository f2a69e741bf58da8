//! Configuration management for the mirror voice front-end
//!
//! Values resolve as env > toml > default. The env lookup is a parameter so
//! tests can inject variables without touching the process environment.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::voice::AudioFormat;
use crate::{Error, Result};

/// Default persona for chat replies
pub const MAGIC_MIRROR_PROMPT: &str = "You are the Magic Mirror from Snow White. \
You live inside a dark, shining mirror in the Queen's castle. \
You speak in a slow, echoing, magical voice. \
Your sentences are short and simple, like in a children's fairy tale. \
You never leave your role. You never say you are an AI. \
You speak with an old, formal tone and with calm truth. You never lie and you never flatter. \
You reveal what you see, as if looking through magic mist, and sometimes begin with \
\"The Mirror sees...\" or \"O Queen, hear the truth.\" \
Your answer must always be 30 English words or fewer.";

/// Mirror configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Microphone and framing
    pub audio: AudioConfig,

    /// Wake detection
    pub wake: WakeConfig,

    /// Utterance capture
    pub capture: CaptureConfig,

    /// Stage timeouts, recovery and fallback texts
    pub session: SessionConfig,

    /// Speech recognition
    pub stt: SttConfig,

    /// Intent resolution
    pub nlu: NluConfig,

    /// Chat model
    pub llm: LlmConfig,

    /// Speech synthesis
    pub tts: TtsConfig,

    /// Built-in actions
    pub actions: ActionsConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Transcript journal path (disabled when unset)
    pub transcript_log: Option<PathBuf>,
}

/// Audio input configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Input device name, default device when unset
    pub device: Option<String>,

    /// Frame format delivered to the session
    pub format: AudioFormat,

    /// Frames buffered between the device callback and the reader
    pub queue_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            format: AudioFormat::default(),
            queue_frames: 50,
        }
    }
}

/// Which keyword spotter the wake detector runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpotterKind {
    /// Short voiced burst followed by a pause
    #[default]
    Energy,
    /// Never fires; wake by operator only
    Manual,
}

impl FromStr for SpotterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "energy" => Ok(Self::Energy),
            "manual" => Ok(Self::Manual),
            other => Err(Error::Config(format!("unknown wake spotter: {other}"))),
        }
    }
}

/// Wake detection configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Phrase reported on wake events and stripped from transcripts
    pub phrase: String,

    /// Keyword spotter backend
    pub spotter: SpotterKind,

    /// RMS energy above which a frame counts as voiced
    pub energy_threshold: f32,

    /// Rolling window kept by the detector
    pub window: Duration,

    /// Minimum stream time between two wake events
    pub debounce: Duration,

    /// Shortest voiced burst that can be a wake phrase
    pub min_burst: Duration,

    /// Longest voiced burst that can be a wake phrase
    pub max_burst: Duration,

    /// Pause that must follow the burst
    pub trailing_gap: Duration,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrase: "hello".to_string(),
            spotter: SpotterKind::Energy,
            energy_threshold: 0.03,
            window: Duration::from_secs(3),
            debounce: Duration::from_secs(2),
            min_burst: Duration::from_millis(300),
            max_burst: Duration::from_millis(1500),
            trailing_gap: Duration::from_millis(400),
        }
    }
}

/// Utterance capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// RMS energy below which a frame counts as silence
    pub silence_threshold: f32,

    /// Silence after speech onset that ends the utterance
    pub silence_duration: Duration,

    /// Hard cap on captured audio
    pub max_duration: Duration,

    /// Wall-clock allowance on top of `max_duration` for a stalled device
    pub stall_grace: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.02,
            silence_duration: Duration::from_millis(700),
            max_duration: Duration::from_secs(8),
            stall_grace: Duration::from_secs(2),
        }
    }
}

/// Spoken fallback texts
#[derive(Debug, Clone)]
pub struct ResponseTexts {
    /// Recognition or intent resolution failed
    pub not_heard: String,

    /// Action missing or failed
    pub unknown_action: String,

    /// Chat generation failed
    pub chat_failed: String,
}

impl Default for ResponseTexts {
    fn default() -> Self {
        Self {
            not_heard: "Sorry, I didn't catch that".to_string(),
            unknown_action: "Sorry, I don't understand this action".to_string(),
            chat_failed: "Sorry, I don't understand your meaning.".to_string(),
        }
    }
}

/// Session timing configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Limit on speech recognition
    pub transcribe_timeout: Duration,

    /// Limit on intent resolution
    pub resolve_timeout: Duration,

    /// Limit on action execution or chat generation
    pub respond_timeout: Duration,

    /// Limit on synthesis plus playback
    pub speak_timeout: Duration,

    /// Pause before reopening a lost audio device
    pub device_retry_backoff: Duration,

    /// How often blocking playback checks for a stop request
    pub poll_interval: Duration,

    /// Fallback texts
    pub responses: ResponseTexts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transcribe_timeout: Duration::from_secs(10),
            resolve_timeout: Duration::from_secs(10),
            respond_timeout: Duration::from_secs(15),
            speak_timeout: Duration::from_secs(30),
            device_retry_backoff: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
            responses: ResponseTexts::default(),
        }
    }
}

/// Speech recognition backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttBackend {
    /// `OpenAI` Whisper
    #[default]
    Whisper,
    /// Deepgram
    Deepgram,
}

impl FromStr for SttBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT backend: {other}"))),
        }
    }
}

impl SttBackend {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
        }
    }
}

/// Speech recognition configuration
#[derive(Debug, Clone, Default)]
pub struct SttConfig {
    pub backend: SttBackend,

    /// Model override
    pub model: Option<String>,
}

impl SttConfig {
    /// Model to request from the backend
    #[must_use]
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.backend.default_model())
    }
}

/// Intent resolution backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NluBackend {
    /// Regex rules, chat otherwise
    #[default]
    Pattern,
    /// LLM classification
    Llm,
}

impl FromStr for NluBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pattern" => Ok(Self::Pattern),
            "llm" => Ok(Self::Llm),
            other => Err(Error::Config(format!("unknown NLU backend: {other}"))),
        }
    }
}

/// Intent resolution configuration
#[derive(Debug, Clone, Default)]
pub struct NluConfig {
    pub backend: NluBackend,
}

/// Chat model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    pub url: String,

    pub model: String,

    /// Persona given to every chat request
    pub system_prompt: String,

    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: MAGIC_MIRROR_PROMPT.to_string(),
            max_tokens: 150,
        }
    }
}

/// Speech synthesis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsBackend {
    /// `OpenAI` TTS
    #[default]
    OpenAi,
    /// `ElevenLabs`
    ElevenLabs,
    /// Print replies instead of speaking them
    Console,
}

impl FromStr for TtsBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            "console" => Ok(Self::Console),
            other => Err(Error::Config(format!("unknown TTS backend: {other}"))),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub backend: TtsBackend,

    /// Model override
    pub model: Option<String>,

    /// Voice identifier (`ElevenLabs` voice id for that backend)
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0, `OpenAI` only)
    pub speed: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::OpenAi,
            model: None,
            voice: "alloy".to_string(),
            speed: 1.0,
        }
    }
}

/// Built-in action configuration
#[derive(Debug, Clone)]
pub struct ActionsConfig {
    /// Location used when the user names none
    pub weather_location: String,

    /// How long a weather report is reused
    pub weather_cache_ttl: Duration,

    /// RSS feed for headlines
    pub news_feed_url: String,

    /// Headlines read out by default
    pub news_count: usize,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            weather_location: "Ithaca".to_string(),
            weather_cache_ttl: Duration::from_secs(600),
            news_feed_url: "https://feeds.bbci.co.uk/news/rss.xml".to_string(),
            news_count: 3,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS and default chat endpoint)
    pub openai: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,

    /// Chat endpoint key, falls back to the `OpenAI` key
    pub llm: Option<SecretString>,
}

impl ApiKeys {
    /// Key for the chat endpoint
    #[must_use]
    pub fn llm(&self) -> Option<&SecretString> {
        self.llm.as_ref().or(self.openai.as_ref())
    }
}

impl Config {
    /// Load configuration from file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unusable, a value is
    /// malformed, or the result fails validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        let mut config = Self::default();
        config.apply_file(fc)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if a backend name is unknown
    pub fn apply_file(&mut self, fc: file::MirrorConfigFile) -> Result<()> {
        let ms = Duration::from_millis;

        let audio = fc.audio;
        if audio.device.is_some() {
            self.audio.device = audio.device;
        }
        if let Some(rate) = audio.sample_rate {
            self.audio.format.sample_rate = rate;
        }
        if let Some(frame_ms) = audio.frame_ms {
            self.audio.format.frame_ms = frame_ms;
        }
        if let Some(n) = audio.queue_frames {
            self.audio.queue_frames = n;
        }

        let wake = fc.wake;
        if let Some(phrase) = wake.phrase {
            self.wake.phrase = phrase;
        }
        if let Some(spotter) = wake.spotter {
            self.wake.spotter = spotter.parse()?;
        }
        if let Some(t) = wake.energy_threshold {
            self.wake.energy_threshold = t;
        }
        self.wake.window = wake.window_ms.map_or(self.wake.window, ms);
        self.wake.debounce = wake.debounce_ms.map_or(self.wake.debounce, ms);
        self.wake.min_burst = wake.min_burst_ms.map_or(self.wake.min_burst, ms);
        self.wake.max_burst = wake.max_burst_ms.map_or(self.wake.max_burst, ms);
        self.wake.trailing_gap = wake.trailing_gap_ms.map_or(self.wake.trailing_gap, ms);

        let capture = fc.capture;
        if let Some(t) = capture.silence_threshold {
            self.capture.silence_threshold = t;
        }
        self.capture.silence_duration = capture
            .silence_ms
            .map_or(self.capture.silence_duration, ms);
        self.capture.max_duration = capture
            .max_duration_ms
            .map_or(self.capture.max_duration, ms);
        self.capture.stall_grace = capture.stall_grace_ms.map_or(self.capture.stall_grace, ms);

        let session = fc.session;
        let s = &mut self.session;
        s.transcribe_timeout = session.transcribe_timeout_ms.map_or(s.transcribe_timeout, ms);
        s.resolve_timeout = session.resolve_timeout_ms.map_or(s.resolve_timeout, ms);
        s.respond_timeout = session.respond_timeout_ms.map_or(s.respond_timeout, ms);
        s.speak_timeout = session.speak_timeout_ms.map_or(s.speak_timeout, ms);
        s.device_retry_backoff = session.device_retry_ms.map_or(s.device_retry_backoff, ms);
        s.poll_interval = session.poll_interval_ms.map_or(s.poll_interval, ms);

        let responses = fc.responses;
        if let Some(text) = responses.not_heard {
            s.responses.not_heard = text;
        }
        if let Some(text) = responses.unknown_action {
            s.responses.unknown_action = text;
        }
        if let Some(text) = responses.chat_failed {
            s.responses.chat_failed = text;
        }

        if let Some(backend) = fc.stt.backend {
            self.stt.backend = backend.parse()?;
        }
        if fc.stt.model.is_some() {
            self.stt.model = fc.stt.model;
        }

        if let Some(backend) = fc.nlu.backend {
            self.nlu.backend = backend.parse()?;
        }

        let llm = fc.llm;
        if let Some(url) = llm.url {
            self.llm.url = url;
        }
        if let Some(model) = llm.model {
            self.llm.model = model;
        }
        if let Some(prompt) = llm.system_prompt {
            self.llm.system_prompt = prompt;
        }
        if let Some(n) = llm.max_tokens {
            self.llm.max_tokens = n;
        }

        let tts = fc.tts;
        if let Some(backend) = tts.backend {
            self.tts.backend = backend.parse()?;
        }
        if tts.model.is_some() {
            self.tts.model = tts.model;
        }
        if let Some(voice) = tts.voice {
            self.tts.voice = voice;
        }
        if let Some(speed) = tts.speed {
            self.tts.speed = speed;
        }

        let actions = fc.actions;
        if let Some(location) = actions.weather_location {
            self.actions.weather_location = location;
        }
        if let Some(secs) = actions.weather_cache_secs {
            self.actions.weather_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(url) = actions.news_feed_url {
            self.actions.news_feed_url = url;
        }
        if let Some(n) = actions.news_count {
            self.actions.news_count = n;
        }

        let keys = fc.api_keys;
        self.api_keys.openai = keys.openai.map(SecretString::from).or(self.api_keys.openai.take());
        self.api_keys.deepgram = keys
            .deepgram
            .map(SecretString::from)
            .or(self.api_keys.deepgram.take());
        self.api_keys.elevenlabs = keys
            .elevenlabs
            .map(SecretString::from)
            .or(self.api_keys.elevenlabs.take());
        self.api_keys.llm = keys.llm.map(SecretString::from).or(self.api_keys.llm.take());

        if let Some(path) = fc.transcript_log {
            self.transcript_log = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// Overlay values from environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a backend name is unknown
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("OPENAI_API_KEY") {
            self.api_keys.openai = Some(SecretString::from(key));
        }
        if let Some(key) = var("DEEPGRAM_API_KEY") {
            self.api_keys.deepgram = Some(SecretString::from(key));
        }
        if let Some(key) = var("ELEVENLABS_API_KEY") {
            self.api_keys.elevenlabs = Some(SecretString::from(key));
        }
        if let Some(key) = var("MIRROR_LLM_API_KEY") {
            self.api_keys.llm = Some(SecretString::from(key));
        }

        if let Some(url) = var("MIRROR_LLM_URL") {
            self.llm.url = url;
        }
        if let Some(model) = var("MIRROR_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(backend) = var("MIRROR_STT_BACKEND") {
            self.stt.backend = backend.parse()?;
        }
        if let Some(backend) = var("MIRROR_TTS_BACKEND") {
            self.tts.backend = backend.parse()?;
        }
        if let Some(backend) = var("MIRROR_NLU_BACKEND") {
            self.nlu.backend = backend.parse()?;
        }
        if let Some(phrase) = var("MIRROR_WAKE_PHRASE") {
            self.wake.phrase = phrase;
        }
        if let Some(location) = var("MIRROR_WEATHER_LOCATION") {
            self.actions.weather_location = location;
        }
        if let Some(path) = var("MIRROR_TRANSCRIPT_LOG") {
            self.transcript_log = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// Check values that would make the session misbehave
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first bad value
    pub fn validate(&self) -> Result<()> {
        let format = self.audio.format;
        if format.sample_rate == 0 || format.frame_ms == 0 || format.frame_len() == 0 {
            return Err(Error::Config(
                "audio sample_rate and frame_ms must be non-zero".to_string(),
            ));
        }
        if self.audio.queue_frames == 0 {
            return Err(Error::Config("audio queue_frames must be non-zero".to_string()));
        }
        if self.capture.silence_duration.is_zero() {
            return Err(Error::Config("capture silence_ms must be non-zero".to_string()));
        }
        if self.capture.max_duration <= self.capture.silence_duration {
            return Err(Error::Config(
                "capture max_duration_ms must exceed silence_ms".to_string(),
            ));
        }
        if self.wake.min_burst > self.wake.max_burst {
            return Err(Error::Config(
                "wake min_burst_ms must not exceed max_burst_ms".to_string(),
            ));
        }

        let s = &self.session;
        let timeouts = [
            ("transcribe_timeout_ms", s.transcribe_timeout),
            ("resolve_timeout_ms", s.resolve_timeout),
            ("respond_timeout_ms", s.respond_timeout),
            ("speak_timeout_ms", s.speak_timeout),
            ("poll_interval_ms", s.poll_interval),
            ("device_retry_ms", s.device_retry_backoff),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Config(format!("session {name} must be non-zero")));
        }

        if !(0.25..=4.0).contains(&self.tts.speed) {
            return Err(Error::Config("tts speed must be within 0.25..=4.0".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.wake.phrase, "hello");
        assert_eq!(config.stt.model(), "whisper-1");
        assert_eq!(config.session.responses.not_heard, "Sorry, I didn't catch that");
    }

    #[test]
    fn test_env_overrides_file() {
        let fc: file::MirrorConfigFile = toml::from_str(
            r#"
            [wake]
            phrase = "mirror"

            [api_keys]
            openai = "from-file"
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_file(fc).unwrap();
        config
            .apply_env(env(&[
                ("MIRROR_WAKE_PHRASE", "magic mirror"),
                ("MIRROR_STT_BACKEND", "deepgram"),
                ("MIRROR_TTS_BACKEND", "console"),
            ]))
            .unwrap();

        assert_eq!(config.wake.phrase, "magic mirror");
        assert_eq!(config.stt.backend, SttBackend::Deepgram);
        assert_eq!(config.stt.model(), "nova-2");
        assert_eq!(config.tts.backend, TtsBackend::Console);
        assert_eq!(
            config.api_keys.openai.as_ref().unwrap().expose_secret(),
            "from-file"
        );
    }

    #[test]
    fn test_llm_key_falls_back_to_openai() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("OPENAI_API_KEY", "sk-test")]))
            .unwrap();
        assert_eq!(config.api_keys.llm().unwrap().expose_secret(), "sk-test");

        config
            .apply_env(env(&[("MIRROR_LLM_API_KEY", "llm-key")]))
            .unwrap();
        assert_eq!(config.api_keys.llm().unwrap().expose_secret(), "llm-key");
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("MIRROR_WAKE_PHRASE", "  ")])).unwrap();
        assert_eq!(config.wake.phrase, "hello");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("MIRROR_NLU_BACKEND", "telepathy")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_cap_below_silence() {
        let mut config = Config::default();
        config.capture.max_duration = Duration::from_millis(500);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.session.speak_timeout = Duration::ZERO;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("speak_timeout_ms"));
    }

    #[test]
    fn test_validate_rejects_zero_device_retry() {
        let fc: file::MirrorConfigFile = toml::from_str(
            r"
            [session]
            device_retry_ms = 0
            ",
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_file(fc).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("device_retry_ms"));
    }

    #[test]
    fn test_durations_from_millis() {
        let fc: file::MirrorConfigFile = toml::from_str(
            r"
            [capture]
            silence_ms = 900
            max_duration_ms = 5000

            [session]
            transcribe_timeout_ms = 2500
            ",
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_file(fc).unwrap();
        assert_eq!(config.capture.silence_duration, Duration::from_millis(900));
        assert_eq!(config.capture.max_duration, Duration::from_secs(5));
        assert_eq!(config.session.transcribe_timeout, Duration::from_millis(2500));
    }
}

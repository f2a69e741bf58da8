use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use mirror_voice::session::{self, Signals, TranscriptJournal};
use mirror_voice::voice::{
    AudioFormat, AudioPlayback, AudioSource, MicSource, PLAYBACK_SAMPLE_RATE, ScriptedSource,
    list_input_devices, rms, speaker_from_config,
};
use mirror_voice::{Config, Operator, Pipeline, SessionEvent, SessionMachine};

/// Mirror - wake-word voice assistant
#[derive(Parser)]
#[command(name = "mirror", version, about)]
struct Cli {
    /// Config file (default: ~/.config/mirror/config.toml)
    #[arg(short, long, env = "MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Listen on the microphone and respond (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Mirror, mirror, on the wall. The Mirror hears you.")]
        text: String,
    },
    /// Run the assistant against a WAV file instead of the microphone
    Replay {
        /// WAV file to play into the session
        wav: PathBuf,
        /// Feed frames as fast as possible instead of in real time
        #[arg(long)]
        fast: bool,
    },
    /// Print the resolved configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,mirror_voice=info",
        1 => "info,mirror_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let config = Config::load(config_path)?;
            let mut source = MicSource::new(config.audio.device.clone(), config.audio.queue_frames);
            run_session(&config, &mut source, true).await
        }
        Command::TestMic { duration } => test_mic(config_path, duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(config_path, &text).await,
        Command::Replay { wav, fast } => {
            let config = Config::load(config_path)?;
            let source = ScriptedSource::from_wav(&wav)?;
            let mut source = if fast { source } else { source.paced() };
            run_session(&config, &mut source, false).await
        }
        Command::ShowConfig => show_config(config_path),
    }
}

/// Run the session machine until shutdown
async fn run_session(
    config: &Config,
    source: &mut dyn AudioSource,
    interactive: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    let (operator, signals): (Operator, Signals) = session::channel();
    let mut machine = SessionMachine::new(config, pipeline, signals);

    let status = tokio::spawn(print_status(machine.subscribe()));
    let journal = config.transcript_log.as_ref().map(|path| {
        tracing::info!(path = %path.display(), "writing transcript journal");
        TranscriptJournal::new(path).spawn(machine.subscribe())
    });

    spawn_ctrl_c(operator.clone());
    if interactive {
        // A blocking stdin read must not hold up runtime shutdown
        let keys = operator.clone();
        std::thread::spawn(move || read_keys(std::io::stdin().lock(), &keys));
        println!("Say \"{}\" or press Enter to wake; 's' stops, 'q' quits.", config.wake.phrase);
    }

    let result = machine.run(source).await;

    // Closing the event channel ends the observers
    drop(machine);
    if let Err(e) = status.await {
        tracing::debug!(error = %e, "status task ended abnormally");
    }
    if let Some(journal) = journal
        && let Err(e) = journal.await
    {
        tracing::debug!(error = %e, "journal task ended abnormally");
    }
    drop(operator);

    result?;
    Ok(())
}

fn spawn_ctrl_c(operator: Operator) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            operator.shutdown();
        }
    });
}

/// Map input lines onto operator controls
fn read_keys(input: impl BufRead, operator: &Operator) {
    for line in input.lines() {
        match line {
            Ok(line) => match line.trim() {
                "" | "w" => {
                    if !operator.wake() {
                        tracing::debug!("wake ignored; one is already pending");
                    }
                }
                "s" => operator.stop(),
                "q" => {
                    operator.shutdown();
                    break;
                }
                other => println!("unknown key '{other}' (w/Enter = wake, s = stop, q = quit)"),
            },
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        }
    }
}

/// Terminal status view
async fn print_status(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged { to, .. }) => println!("[{to}]"),
            Ok(SessionEvent::Transcribed { text, .. }) => println!("you> {text}"),
            Ok(SessionEvent::Responded { text, .. }) => println!("mirror> {text}"),
            Ok(SessionEvent::WakeDismissed { .. }) => println!("(no wake phrase heard)"),
            Ok(SessionEvent::DeviceRecovered) => println!("(microphone reconnected)"),
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "status view lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Test microphone input
async fn test_mic(config_path: Option<&Path>, duration: u64) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    println!("Input devices:");
    for name in list_input_devices() {
        println!("  {name}");
    }
    println!("\nTesting microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let format: AudioFormat = config.audio.format;
    let mut source = MicSource::new(config.audio.device.clone(), config.audio.queue_frames);
    source.open(format).await?;

    println!("Sample rate: {} Hz, frame: {} ms", format.sample_rate, format.frame_ms);
    println!("---");

    let per_second = format.frames_in(Duration::from_secs(1));
    for i in 0..duration {
        let mut samples = Vec::with_capacity(format.frame_len() * per_second);
        for _ in 0..per_second {
            let frame = source.read_frame().await?;
            samples.extend_from_slice(frame.samples());
        }

        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    let dropped = source.dropped_frames();
    source.close();

    println!("\n---");
    if dropped > 0 {
        println!("{dropped} frames were dropped while the meter was printing");
    }
    println!("If you saw movement in the meter, your mic is working!");
    println!(
        "Compare the RMS while silent with capture.silence_threshold ({}) and wake.energy_threshold ({})",
        config.capture.silence_threshold, config.wake.energy_threshold
    );

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), PLAYBACK_SAMPLE_RATE);

    tokio::task::spawn_blocking(move || {
        let playback = AudioPlayback::new()?;
        playback.play(samples, &AtomicBool::new(false), Duration::from_millis(50))
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test the configured TTS backend
async fn test_tts(config_path: Option<&Path>, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load(config_path)?;
    let speaker = speaker_from_config(&config)?;

    println!("Speaking with {}...", speaker.name());
    speaker.speak(text).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

fn show_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .or_else(mirror_voice::config::file::config_file_path);
    match &path {
        Some(p) if p.exists() => println!("# config file: {}", p.display()),
        Some(p) => println!("# config file: {} (not found, using defaults)", p.display()),
        None => println!("# no config directory; using defaults"),
    }

    let config = Config::load(config_path)?;
    println!("{config:#?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_keys_map_onto_controls() {
        let (operator, mut signals) = session::channel();

        read_keys(Cursor::new("w\n\ns\nq\nw\n"), &operator);

        // Enter queues nothing while a wake is pending; input after 'q' is unread
        assert_eq!(signals.drain_wakes(), 1);
        assert!(signals.is_shutdown());
    }

    #[test]
    fn test_keys_stop_at_end_of_input() {
        let (operator, mut signals) = session::channel();

        read_keys(Cursor::new("w\n"), &operator);

        assert_eq!(signals.drain_wakes(), 1);
        assert!(!signals.is_shutdown());
    }
}

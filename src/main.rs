use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sapling_voice::prompt::{self, ContextSnapshot, FocusTarget, UserState};
use sapling_voice::voice::{
    AudioCapture, AudioPlayback, CaptureDevice, OUTPUT_SAMPLE_RATE, OutputSink,
    PlaybackFragment, PlaybackScheduler, samples_to_wav,
};
use sapling_voice::{
    Config, Conversation, CpalAudio, GenerateContentClient, LiveConnector, SessionLifecycle,
    SessionOptions,
};

/// Sapling Voice - talk with Ani, the Sapling focus companion
#[derive(Parser)]
#[command(name = "sapling-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live voice conversation (default)
    Talk(FocusArgs),
    /// Send one text message
    Chat {
        /// Message text
        text: String,
        #[command(flatten)]
        focus: FocusArgs,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
}

/// User state fed into the persona context
#[derive(clap::Args, Default)]
struct FocusArgs {
    /// Cumulative focus time in minutes
    #[arg(long, env = "SAPLING_FOCUS_MINUTES", default_value = "0")]
    focus_minutes: u64,
    /// Name of the goal currently being focused on
    #[arg(long, conflicts_with = "pomodoro")]
    goal: Option<String>,
    /// Currently running a pomodoro cycle
    #[arg(long)]
    pomodoro: bool,
}

impl FocusArgs {
    fn user_state(self) -> UserState {
        let active_goal = if self.pomodoro {
            Some(FocusTarget::Pomodoro)
        } else {
            self.goal.map(FocusTarget::Goal)
        };
        UserState {
            total_focus_minutes: self.focus_minutes,
            active_goal,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,sapling_voice=info",
        1 => "info,sapling_voice=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or_else(|| Command::Talk(FocusArgs::default())) {
        Command::Talk(focus) => talk(focus.user_state()).await,
        Command::Chat { text, focus } => chat(&text, focus.user_state()).await,
        Command::TestMic { duration, record } => test_mic(duration, record).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Load config and freeze the persona context
fn load_context(user_state: UserState) -> anyhow::Result<(Config, ContextSnapshot)> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    if config.api_key.is_none() {
        tracing::warn!("no API key set; export GEMINI_API_KEY");
    }

    let instructions = prompt::load_instructions(config.instructions_path.as_deref())?;
    let context = ContextSnapshot::with_instructions(instructions, user_state);
    Ok((config, context))
}

/// Run one live voice session until Ctrl-C or the remote end
#[allow(clippy::future_not_send)]
async fn talk(user_state: UserState) -> anyhow::Result<()> {
    let (config, context) = load_context(user_state)?;

    let connector = LiveConnector::new(
        config.live.url.clone(),
        config.api_key.clone(),
        config.audio.queue_capacity,
    );
    let mut session =
        SessionLifecycle::new(connector, CpalAudio, SessionOptions::from_config(&config));

    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, ending session");
            stop.stop();
        }
    });

    let mut voice_active = session.subscribe();
    tokio::spawn(async move {
        while voice_active.changed().await.is_ok() {
            let active = *voice_active.borrow_and_update();
            println!("{}", if active { "● voice active" } else { "○ voice off" });
        }
    });

    tracing::info!(model = %config.live.model, voice = %config.live.voice, "starting voice session");
    // Failures are logged by the lifecycle and show up as "voice off"
    if session.start(&context).await.is_err() || !session.is_running() {
        return Ok(());
    }
    println!("Talking with Ani. Press Ctrl-C to end.\n");

    session.run().await;

    let stats = session.stats();
    println!(
        "\nSession ended: {} fragments played, {} interruptions",
        stats.fragments_scheduled, stats.interruptions
    );
    Ok(())
}

/// One text turn with the companion
async fn chat(text: &str, user_state: UserState) -> anyhow::Result<()> {
    let (config, context) = load_context(user_state)?;
    let client = GenerateContentClient::new(
        config.chat.endpoint.clone(),
        config.chat.model.clone(),
        config.api_key.clone(),
    );

    let mut conversation = Conversation::new();
    for message in conversation.messages() {
        println!("Ani: {}\n", message.joined_text());
    }
    println!("You: {text}\n");

    let system_instruction = context.system_instruction();
    match conversation
        .send(&client, &system_instruction, text, None)
        .await
    {
        Some(reply) => println!("Ani: {}", reply.joined_text()),
        None => println!("(nothing to send)"),
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, record: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let window = Arc::new(Mutex::new(Vec::<f32>::new()));
    let recording = Arc::new(Mutex::new(Vec::<f32>::new()));
    let keep_recording = record.is_some();

    let mut capture = AudioCapture::new()?;
    let sample_rate = capture.sample_rate();

    let callback_window = Arc::clone(&window);
    let callback_recording = Arc::clone(&recording);
    capture.start(Box::new(move |samples: &[f32]| {
        callback_window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(samples);
        if keep_recording {
            callback_recording
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(samples);
        }
    }))?;

    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples =
            std::mem::take(&mut *window.lock().unwrap_or_else(PoisonError::into_inner));
        let energy = calculate_rms(&samples);
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

    capture.stop();

    if let Some(path) = record {
        let samples =
            std::mem::take(&mut *recording.lock().unwrap_or_else(PoisonError::into_inner));
        let wav = samples_to_wav(&samples, sample_rate)?;
        std::fs::write(&path, wav)?;
        println!("\nRecorded {} samples to {}", samples.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Generate a sine tone at the playback rate
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, seconds: f32) -> PlaybackFragment {
    let num_samples = (OUTPUT_SAMPLE_RATE as f32 * seconds) as usize;
    let samples = (0..num_samples)
        .map(|i| {
            let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();
    PlaybackFragment {
        samples,
        sample_rate: OUTPUT_SAMPLE_RATE,
    }
}

/// Test speaker output with two back-to-back tones
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone followed by a 660Hz tone with no gap\n");

    let mut scheduler = PlaybackScheduler::new(AudioPlayback::new(OUTPUT_SAMPLE_RATE)?);

    for (frequency, seconds) in [(440.0, 0.5), (660.0, 0.3)] {
        let slot = scheduler.enqueue(tone(frequency, seconds)).await?;
        println!(
            "{frequency} Hz scheduled at {:.3}s for {:.3}s",
            slot.start, slot.duration
        );
    }

    // Wait for the device to play everything, with a safety margin
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while scheduler.output().is_draining() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!("Device clock at {:.3}s", scheduler.output().current_time());
    scheduler.close();

    println!("\n---");
    println!("If you heard both tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

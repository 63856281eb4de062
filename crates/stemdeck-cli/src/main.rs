//! stemdeck - play and bounce synchronized stems
//!
//! - `play`: start every stem on one sample through its own effect chain
//! - `bounce`: render one processed track to a file in real time, no device
//! - `config`: write the default configuration
//! - `devices`: list audio outputs
//!
//! Set RUST_LOG=debug for verbose output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use stemdeck_core::audio::{output_devices, DeviceLauncher};
use stemdeck_core::config::{
    default_bounce_dir, default_config_path, load_config, save_config, StemdeckConfig,
};
use stemdeck_core::effect::EffectKind;
use stemdeck_core::engine::{EngineHandle, HeadlessEngine, LazyEngine};
use stemdeck_core::loader::WavFileLoader;
use stemdeck_core::mastering::MasteringPreset;
use stemdeck_core::recorder::{BounceFormat, DirectorySink, Recorder};
use stemdeck_core::{MixSession, ParameterStore, TrackId};

#[derive(Parser)]
#[command(name = "stemdeck")]
#[command(about = "Synchronized multi-track stem player with per-track effects")]
#[command(version)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play one or more WAV stems in sync on the output device
    Play {
        /// Stems to play; track ids are assigned 1, 2, ... in this order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        tone: ToneArgs,

        /// Mute a track by id (repeatable)
        #[arg(long)]
        mute: Vec<u64>,

        /// Solo a track by id (repeatable)
        #[arg(long)]
        solo: Vec<u64>,

        /// Loop every stem
        #[arg(long = "loop")]
        looping: bool,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Render one processed stem to a WAV file
    Bounce {
        file: PathBuf,

        #[command(flatten)]
        tone: ToneArgs,

        /// Output directory (default: ~/Music/stemdeck-bounces)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Preferred formats, first supported wins (default: from config)
        #[arg(long, value_enum)]
        format: Vec<FormatArg>,
    },

    /// Write the default configuration file
    Config {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List audio output devices
    Devices,
}

/// Settings applied to every track
#[derive(clap::Args, Clone)]
struct ToneArgs {
    /// Playback rate (0.25 - 2.0); pitch is compensated
    #[arg(long, default_value_t = 1.0)]
    rate: f32,

    /// Pitch shift in semitones (-12 - 12)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pitch: f32,

    /// Volume (0 - 2)
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Enable an effect (repeatable)
    #[arg(long, value_enum)]
    effect: Vec<EffectArg>,

    /// Select a mastering preset (repeatable)
    #[arg(long, value_parser = parse_preset)]
    preset: Vec<MasteringPreset>,

    /// Set an effect parameter, e.g. `reverb.decay=4` (repeatable)
    #[arg(long = "set", value_parser = parse_param)]
    params: Vec<(EffectArg, String, f32)>,

    /// Start from a saved parameter snapshot (YAML)
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EffectArg {
    Reverb,
    Delay,
    Distortion,
    Chorus,
    Envelope,
}

impl From<EffectArg> for EffectKind {
    fn from(arg: EffectArg) -> Self {
        match arg {
            EffectArg::Reverb => EffectKind::Reverb,
            EffectArg::Delay => EffectKind::Delay,
            EffectArg::Distortion => EffectKind::Distortion,
            EffectArg::Chorus => EffectKind::Chorus,
            EffectArg::Envelope => EffectKind::Envelope,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Wav16,
    Wav24,
    Wav32,
    Flac,
    Mp3,
}

impl From<FormatArg> for BounceFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Wav16 => BounceFormat::Wav16,
            FormatArg::Wav24 => BounceFormat::Wav24,
            FormatArg::Wav32 => BounceFormat::Wav32Float,
            FormatArg::Flac => BounceFormat::Flac,
            FormatArg::Mp3 => BounceFormat::Mp3,
        }
    }
}

fn parse_preset(s: &str) -> Result<MasteringPreset, String> {
    MasteringPreset::from_name(s).ok_or_else(|| {
        let names: Vec<_> = MasteringPreset::ALL.iter().map(|p| p.name()).collect();
        format!("unknown preset '{}', expected one of {}", s, names.join(", "))
    })
}

fn parse_param(s: &str) -> Result<(EffectArg, String, f32), String> {
    let (target, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected effect.param=value, got '{}'", s))?;
    let (effect, param) = target
        .split_once('.')
        .ok_or_else(|| format!("expected effect.param, got '{}'", target))?;
    let effect = EffectArg::from_str(effect, true)?;
    let value = value
        .parse::<f32>()
        .map_err(|e| format!("invalid value '{}': {}", value, e))?;
    Ok((effect, param.to_string(), value))
}

impl ToneArgs {
    /// Write these settings into the store for `ids`
    fn apply_to(&self, store: &mut ParameterStore, ids: &[TrackId]) -> Result<()> {
        for &id in ids {
            let params = store.track_mut(id);
            params.set_playback_rate(self.rate);
            params.set_pitch(self.pitch);
            params.set_volume(self.volume);
            for preset in &self.preset {
                params.presets.select(*preset);
            }
            for effect in &self.effect {
                params.set_effect_enabled((*effect).into(), true);
            }
            for (effect, name, value) in &self.params {
                let kind: EffectKind = (*effect).into();
                if params.set_effect_param(kind, name, *value).is_none() {
                    let known: Vec<_> = kind.params().iter().map(|p| p.name).collect();
                    bail!(
                        "{} has no parameter '{}' (known: {})",
                        kind.name(),
                        name,
                        known.join(", ")
                    );
                }
            }
        }
        Ok(())
    }

    fn store(&self, ids: &[TrackId]) -> Result<ParameterStore> {
        let mut store = match &self.snapshot {
            Some(path) => ParameterStore::load(path),
            None => ParameterStore::new(),
        };
        self.apply_to(&mut store, ids)?;
        Ok(store)
    }
}

fn track_urls(files: &[PathBuf]) -> Result<Vec<(TrackId, String)>> {
    files
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let url = path
                .to_str()
                .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", path.display()))?;
            Ok((TrackId(i as u64 + 1), url.to_string()))
        })
        .collect()
}

async fn play(
    config: &StemdeckConfig,
    files: &[PathBuf],
    tone: &ToneArgs,
    mute: &[u64],
    solo: &[u64],
    looping: bool,
    seconds: Option<f64>,
) -> Result<()> {
    let tracks = track_urls(files)?;
    let ids: Vec<TrackId> = tracks.iter().map(|(id, _)| *id).collect();

    let mut store = tone.store(&ids)?;
    for &id in &ids {
        store.set_looping(id, looping);
        store.set_muted(id, mute.contains(&id.0));
        store.set_solo(id, solo.contains(&id.0));
    }

    // Starting the command counts as the user gesture
    let mut engine = LazyEngine::new(DeviceLauncher::new(
        config.engine.clone(),
        config.output.clone(),
    ));
    let handle = match engine.ensure_started() {
        Ok(handle) => handle,
        Err(e) => {
            let notice = engine.take_notice().unwrap_or_else(|| e.to_string());
            bail!("{}", notice);
        }
    };

    let mut session = MixSession::new(handle, &config.engine);
    let failures = session
        .load_all(Arc::new(WavFileLoader::new()), tracks)
        .await?;
    for (id, error) in &failures {
        eprintln!("Warning: {} will be silent: {}", id, error);
    }

    session.replace_store(store)?;
    for (id, audible) in session.audibility() {
        log::info!("{}: {}", id, if audible { "audible" } else { "silent" });
    }

    session.play_all()?;
    println!("Playing {} stems ({:.1}s)", session.len(), session.duration());

    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        println!(
            "  {:6.1}s / {:.1}s",
            session.position(),
            session.duration()
        );
        let out_of_time = seconds.is_some_and(|limit| started.elapsed().as_secs_f64() >= limit);
        if out_of_time || !session.is_playing() {
            break;
        }
    }

    session.stop_all()?;
    engine.shutdown();
    Ok(())
}

async fn bounce(
    config: &StemdeckConfig,
    file: &PathBuf,
    tone: &ToneArgs,
    out: Option<PathBuf>,
    formats: &[FormatArg],
) -> Result<()> {
    let tracks = track_urls(std::slice::from_ref(file))?;
    let id = tracks[0].0;
    let store = tone.store(&[id])?;

    let (engine, _driver) = HeadlessEngine::spawn(&config.engine)?;
    let engine: EngineHandle = engine;

    let mut session = MixSession::new(engine.clone(), &config.engine);
    let failures = session
        .load_all(Arc::new(WavFileLoader::new()), tracks)
        .await?;
    if let Some((_, error)) = failures.into_iter().next() {
        return Err(error).context("Cannot bounce a track that failed to load");
    }
    session.replace_store(store)?;

    let voice = session
        .voice_mut(id)
        .ok_or_else(|| anyhow!("{} missing from session", id))?;
    let formats: Vec<BounceFormat> = formats.iter().map(|f| (*f).into()).collect();

    println!(
        "Bouncing {} ({:.1}s at {}x)...",
        file.display(),
        voice.duration(),
        voice.playback_rate()
    );
    let recorder = Recorder::new(engine, config.recorder.clone());
    let blob = recorder.record_chain_output(voice, &formats).await?;

    let sink = DirectorySink::new(out.unwrap_or_else(default_bounce_dir));
    let path = blob.save_to(&sink)?;
    println!("Wrote {} ({:.1}s)", path.display(), blob.duration_secs());
    Ok(())
}

fn write_config(path: &PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    save_config(&StemdeckConfig::default(), path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = output_devices()?;
    for device in devices {
        println!("{} - {} channels", device, device.max_channels);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config: StemdeckConfig = load_config(&config_path);

    match cli.command {
        Commands::Play {
            files,
            tone,
            mute,
            solo,
            looping,
            seconds,
        } => play(&config, &files, &tone, &mute, &solo, looping, seconds).await,
        Commands::Bounce {
            file,
            tone,
            out,
            format,
        } => bounce(&config, &file, &tone, out, &format).await,
        Commands::Config { force } => write_config(&config_path, force),
        Commands::Devices => list_devices(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        let (effect, name, value) = parse_param("reverb.decay=4.5").unwrap();
        assert_eq!(effect, EffectArg::Reverb);
        assert_eq!(name, "decay");
        assert_eq!(value, 4.5);

        assert!(parse_param("reverb=4").is_err());
        assert!(parse_param("flanger.rate=1").is_err());
        assert!(parse_param("delay.time=soon").is_err());
    }

    #[test]
    fn test_tone_args_fill_store() {
        let cli = Cli::parse_from([
            "stemdeck", "bounce", "stem.wav", "--rate", "2", "--pitch", "-3", "--effect", "chorus",
            "--preset", "warm", "--set", "chorus.depth=0.9",
        ]);
        let Commands::Bounce { tone, .. } = cli.command else {
            panic!("expected bounce");
        };

        let store = tone.store(&[TrackId(1)]).unwrap();
        let params = store.params(TrackId(1));
        assert_eq!(params.playback_rate, 2.0);
        assert_eq!(params.pitch, -3.0);
        assert!(params.effect_enabled(EffectKind::Chorus));
        assert_eq!(params.effect_param(EffectKind::Chorus, "depth"), Some(0.9));
        assert!(params.presets.contains(MasteringPreset::Warm));
    }

    #[test]
    fn test_unknown_effect_param_is_an_error() {
        let cli = Cli::parse_from(["stemdeck", "bounce", "stem.wav", "--set", "delay.size=2"]);
        let Commands::Bounce { tone, .. } = cli.command else {
            panic!("expected bounce");
        };
        assert!(tone.store(&[TrackId(1)]).is_err());
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audio::output::spawn_pcm_writer;
use crate::audio::{AudioContext, AudioEngine, SoundKind};
use crate::config::Config;
use crate::logger::Status;
use crate::pairing::PairingCode;
use crate::peer::ice::analyze_candidates;
use crate::peer::types::SessionPackage;
use crate::session::{CameraSession, MonitorSession, SessionDeps, TeardownReport};
use crate::signaling::blob::decode_package;
use crate::signaling::{fetch_record, MemoryStore};

#[derive(Debug, Parser)]
#[command(name = "babymon", version, about = "Peer-to-peer baby monitor")]
pub struct Cli {
    /// TOML config; missing file means defaults.
    #[arg(long, short, env = "BABYMON_CONFIG", default_value = "babymon.toml")]
    pub config: PathBuf,

    /// Overrides `[signaling] base_url`.
    #[arg(long, env = "BABYMON_SIGNALING_URL")]
    pub signaling_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the camera's pairing code (new one if none is saved).
    Code {
        /// Replace the saved code with a freshly generated one.
        #[arg(long)]
        new: bool,
    },
    /// Offer under a code and serve sounds to the monitor.
    Camera {
        #[arg(long)]
        code: Option<String>,
        /// Stream the played sounds as s16le mono PCM (file or FIFO).
        #[arg(long)]
        pcm_out: Option<PathBuf>,
    },
    /// Answer the camera waiting under `code`; then reads commands from stdin.
    Monitor {
        #[arg(long)]
        code: String,
        #[arg(long)]
        play: Option<SoundKind>,
    },
    /// Summarize a pasted offer/answer blob, or the record stored under a code.
    Inspect {
        #[arg(required_unless_present = "code")]
        blob: Option<String>,
        #[arg(long, conflicts_with = "blob")]
        code: Option<String>,
    },
    /// Camera and monitor in one process over the loopback transport.
    Demo {
        #[arg(long, default_value = "lullaby1")]
        sound: SoundKind,
        #[arg(long, default_value_t = 3)]
        seconds: u64,
    },
}

const READY_WAIT: Duration = Duration::from_secs(10);

pub async fn execute(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Code { new } => {
            let code = if new {
                let code = PairingCode::generate();
                if let Some(path) = &config.pairing.code_file {
                    code.save(path);
                }
                code
            } else {
                PairingCode::load_or_generate(config.pairing.code_file.as_deref())
            };
            println!("{code}");
            Ok(())
        }
        Command::Camera { code, pcm_out } => camera(config, code, pcm_out).await,
        Command::Monitor { code, play } => monitor(config, &code, play).await,
        Command::Inspect { blob, code } => match (blob, code) {
            (Some(blob), _) => inspect(&blob),
            (None, Some(code)) => inspect_record(config, &code).await,
            (None, None) => anyhow::bail!("nothing to inspect"),
        },
        Command::Demo { sound, seconds } => demo(config, sound, seconds).await,
    }
}

async fn camera(config: Config, code: Option<String>, pcm_out: Option<PathBuf>) -> anyhow::Result<()> {
    let code = match code {
        Some(code) => {
            let code = PairingCode::parse(&code)?;
            if let Some(path) = &config.pairing.code_file {
                code.save(path);
            }
            code
        }
        None => PairingCode::load_or_generate(config.pairing.code_file.as_deref()),
    };
    let (audio, ctx) = AudioEngine::software(&config.audio);
    let writer = pcm_out.map(|path| spawn_pcm_writer(ctx.clone(), path));
    let deps = SessionDeps::from_config(config).context("camera needs a signaling store")?;

    println!("Pairing code: {code}");
    let mut session = CameraSession::start(deps, code, audio).await?;
    let status = follow_status(session.status());
    let outcome = async {
        session.await_answer().await?;
        tokio::select! {
            state = session.run() => info!("connection ended: {state:?}"),
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
        anyhow::Ok(())
    }
    .await;

    report(session.close().await);
    status.abort();
    if let Some(writer) = writer {
        writer.abort();
    }
    outcome
}

async fn monitor(config: Config, code: &str, play: Option<SoundKind>) -> anyhow::Result<()> {
    let code = PairingCode::parse(code)?;
    let deps = SessionDeps::from_config(config).context("monitor needs a signaling store")?;
    let mut session = MonitorSession::connect(deps, code).await?;
    let status = follow_status(session.status());
    if !session.wait_ready(READY_WAIT).await {
        warn!("camera has not completed the handshake yet");
    }
    if let Some(sound) = play {
        session.play(sound).await?;
    }

    println!("commands: play <whitenoise|rain|lullaby1|lullaby2>, stop, talk, mute, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (Some("play"), Some(kind)) => match kind.parse::<SoundKind>() {
                Ok(sound) => session.play(sound).await.map_err(anyhow::Error::from),
                Err(e) => Err(anyhow::anyhow!(e)),
            },
            (Some("stop"), _) => session.stop_sound().await.map_err(anyhow::Error::from),
            (Some("talk"), _) => talkback(session.start_talking()),
            (Some("mute"), _) => talkback(session.stop_talking()),
            (Some("quit"), _) => break,
            (None, _) => Ok(()),
            (Some(other), _) => Err(anyhow::anyhow!("unknown command {other:?}")),
        };
        if let Err(e) = result {
            eprintln!("{e}");
        }
    }

    report(session.close().await);
    status.abort();
    Ok(())
}

fn inspect(blob: &str) -> anyhow::Result<()> {
    summarize(&decode_package(blob)?);
    Ok(())
}

async fn inspect_record(config: Config, code: &str) -> anyhow::Result<()> {
    let code = PairingCode::parse(code)?;
    let deps = SessionDeps::from_config(config).context("inspect --code needs a signaling store")?;
    let Some(record) = fetch_record(deps.signaling.as_ref(), &code).await? else {
        println!("no record under {code}");
        return Ok(());
    };
    if let Some(ts) = record.ts {
        println!("record {code}, written at {ts}");
    }
    for pkg in [&record.offer, &record.answer].into_iter().flatten() {
        summarize(pkg);
    }
    Ok(())
}

fn summarize(pkg: &SessionPackage) {
    let summary = analyze_candidates(&pkg.candidates);
    println!(
        "{:?}: {} sdp bytes, {} host / {} srflx / {} other candidates",
        pkg.sdp.kind,
        pkg.sdp.sdp.len(),
        summary.host,
        summary.srflx,
        summary.other
    );
}

/// Prints each status change of a role, like the banner under its panel.
fn follow_status(mut rx: watch::Receiver<Status>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().clone();
            match &status {
                Status::Idle => {}
                Status::Error(_) => eprintln!("{}", status.text()),
                _ => println!("{}", status.text()),
            }
        }
    })
}

fn talkback(available: bool) -> anyhow::Result<()> {
    if available {
        Ok(())
    } else {
        Err(anyhow::anyhow!("no microphone, talk-back disabled"))
    }
}

async fn demo(config: Config, sound: SoundKind, seconds: u64) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let (audio, ctx) = AudioEngine::software(&config.audio);
    let deps = SessionDeps::loopback(config, store);
    let code = PairingCode::generate();
    println!("Pairing code: {code}");

    let mut camera = CameraSession::start(deps.clone(), code.clone(), audio).await?;
    let (answered, monitor) = tokio::join!(
        camera.await_answer(),
        MonitorSession::connect(deps, code)
    );
    let mut monitor = match (answered, monitor) {
        (Ok(()), Ok(monitor)) => monitor,
        (Err(e), Ok(mut monitor)) => {
            report(monitor.close().await);
            report(camera.close().await);
            return Err(e.into());
        }
        (_, Err(e)) => {
            report(camera.close().await);
            return Err(e.into());
        }
    };

    let outcome = async {
        if !monitor.wait_ready(READY_WAIT).await {
            anyhow::bail!("camera did not answer the handshake");
        }
        monitor.play(sound).await?;

        // render the mix the way the camera speaker would play it
        let mut block = vec![0.0f32; (ctx.sample_rate() / 50) as usize];
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        let mut peak = 0.0f32;
        for _ in 0..seconds * 50 {
            ticker.tick().await;
            ctx.render(&mut block);
            peak = block.iter().fold(peak, |p, s| p.max(s.abs()));
        }
        println!("camera played {sound}, peak level {peak:.2}");
        monitor.stop_sound().await?;
        anyhow::Ok(())
    }
    .await;

    report(monitor.close().await);
    report(camera.close().await);
    outcome
}

fn report(report: TeardownReport) {
    if !report.is_clean() {
        for (step, error) in &report.failures {
            warn!("cleanup of {step} failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_accepts_new_flag() {
        let cli = Cli::try_parse_from(["babymon", "code", "--new"]).unwrap();
        assert!(matches!(cli.command, Command::Code { new: true }));
        let cli = Cli::try_parse_from(["babymon", "code"]).unwrap();
        assert!(matches!(cli.command, Command::Code { new: false }));
    }

    #[test]
    fn inspect_takes_a_blob_or_a_code() {
        let cli = Cli::try_parse_from(["babymon", "inspect", "H4sI"]).unwrap();
        assert!(matches!(cli.command, Command::Inspect { blob: Some(_), code: None }));
        let cli = Cli::try_parse_from(["babymon", "inspect", "--code", "ABCD1234"]).unwrap();
        assert!(matches!(cli.command, Command::Inspect { blob: None, code: Some(_) }));
        assert!(Cli::try_parse_from(["babymon", "inspect"]).is_err());
        assert!(Cli::try_parse_from(["babymon", "inspect", "H4sI", "--code", "X"]).is_err());
    }
}

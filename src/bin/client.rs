//! Karaoke session client
//!
//! Joins a session, keeps the local view of it up to date and plays the
//! captured input pitch-shifted by the session's pitch setting. Commands are
//! read line by line from stdin.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use yoke_client::{
    audio::{buffer::create_shared_buffer, device::list_devices, AudioCapture, PitchPlayer},
    config::AppConfig,
    constants::RING_BUFFER_CAPACITY,
    network::{endpoint_for_page, ConnectionManager, ConnectionState},
    protocol::{ClientMessage, PlaybackAction, ServerMessage},
    session::SessionStore,
};

const HELP: &str = "\
commands:
  join <name>          join the session
  search <query>       search for songs
  queue <video_id>     queue a song
  remove <item_id>     remove a queued song
  play | pause | stop | skip | restart
  seek <seconds>       jump within the current song
  pitch <semitones>    change the session pitch
  say <text>           put a message on the shared screen
  qr                   show the join QR code
  status               print session and link status
  quit";

/// A parsed stdin line
#[derive(Debug, PartialEq)]
enum Command {
    Send(ClientMessage),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let required = |what: &str| {
        if rest.is_empty() {
            Err(format!("{} needs {}", verb, what))
        } else {
            Ok(rest.to_string())
        }
    };
    let number = |what: &str| -> Result<f64, String> {
        rest.parse::<f64>()
            .map_err(|_| format!("{} needs {}", verb, what))
    };

    let message = match verb {
        "join" => ClientMessage::Join {
            name: required("a name")?,
        },
        "search" => ClientMessage::Search {
            query: required("a query")?,
        },
        "queue" => ClientMessage::QueueSong {
            video_id: required("a video id")?,
        },
        "remove" => ClientMessage::RemoveFromQueue {
            item_id: required("an item id")?,
        },
        "play" => ClientMessage::Playback {
            action: PlaybackAction::Play,
        },
        "pause" => ClientMessage::Playback {
            action: PlaybackAction::Pause,
        },
        "stop" => ClientMessage::Playback {
            action: PlaybackAction::Stop,
        },
        "skip" => ClientMessage::Playback {
            action: PlaybackAction::Skip,
        },
        "restart" => ClientMessage::Playback {
            action: PlaybackAction::Restart,
        },
        "seek" => ClientMessage::Seek {
            position_seconds: number("a position in seconds")?.max(0.0),
        },
        "pitch" => ClientMessage::Pitch {
            semitones: number("a number of semitones")? as f32,
        },
        "say" => ClientMessage::ScreenMessage {
            text: required("some text")?,
        },
        "qr" => ClientMessage::ShowQr,
        "status" => return Ok(Command::Status),
        "help" | "?" => return Ok(Command::Help),
        "quit" | "exit" => return Ok(Command::Quit),
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(Command::Send(message))
}

/// Accept a page URL (`http(s)://host`) as well as a direct `ws(s)://` one
fn resolve_url(arg: &str) -> Result<String> {
    let url = Url::parse(arg)?;
    match url.scheme() {
        "http" | "https" => Ok(endpoint_for_page(arg)?),
        "ws" | "wss" => Ok(url.into()),
        other => bail!("unsupported URL scheme '{}'", other),
    }
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = if device.is_input { "Input" } else { "Output" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--list-devices") {
        print_devices();
        return Ok(());
    }

    let mut config = AppConfig::load()?;
    if let Some(arg) = arg {
        config.connection.url = resolve_url(&arg)?;
    }
    tracing::info!("Starting karaoke client for {}", config.connection.url);

    // Local audio: capture input, play it back pitch-shifted
    let mut player = PitchPlayer::new(&config.audio);
    let mut capture = None;
    if config.audio.enabled {
        let mut input = AudioCapture::new(
            config.audio.input_device.as_deref(),
            config.audio.sample_rate,
            create_shared_buffer(RING_BUFFER_CAPACITY),
        );
        match input.start() {
            Ok(()) => {
                if let Err(e) = player.attach(Box::new(input.source())).await {
                    tracing::warn!("Audio output unavailable: {}", e);
                }
                capture = Some(input);
            }
            Err(e) => tracing::warn!("Audio capture unavailable: {}", e),
        }
    }

    let manager = ConnectionManager::from_config(&config.connection);
    let store = Arc::new(Mutex::new(SessionStore::new()));
    let joined_as: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let pitch = player.control();
    let _messages = manager.on_message({
        let store = store.clone();
        move |message: &ServerMessage| {
            tracing::debug!("<- {}", message.kind());
            let mut store = store.lock();
            for note in store.apply(message) {
                println!("* {}", note.text);
            }
            match message {
                ServerMessage::State(_) | ServerMessage::PlaybackUpdated { .. } => {
                    pitch.set_semitones(store.pitch_shift());
                }
                ServerMessage::ScreenMessage { name, text } => println!("[{}] {}", name, text),
                ServerMessage::SearchResults { songs } => {
                    for song in songs {
                        println!(
                            "  {}  {} ({}s)",
                            song.video_id, song.title, song.duration_seconds
                        );
                    }
                }
                _ => {}
            }
        }
    });

    let _states = manager.on_state_change(|state: &ConnectionState| {
        tracing::info!("Session link: {:?}", state);
    });

    // The server forgets who we are when the link drops
    let _opens = manager.on_open({
        let manager = manager.downgrade();
        let joined_as = joined_as.clone();
        move || {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if let Some(name) = joined_as.lock().clone() {
                let _ = manager.send(ClientMessage::Join { name });
            }
        }
    });

    manager.connect();
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(Command::Send(mut message)) => {
                if let ClientMessage::Join { name } = &message {
                    *joined_as.lock() = Some(name.clone());
                    if manager.connection_state() != ConnectionState::Connected {
                        // Sent by the open handler
                        continue;
                    }
                }
                if let ClientMessage::Pitch { semitones } = &mut message {
                    let applied = player.set_pitch(*semitones);
                    if applied != *semitones {
                        println!("pitch limited to {:+}", applied);
                        *semitones = applied;
                    }
                }
                // The host may refuse to start output before any user input
                if let Err(e) = player.resume_if_suspended().await {
                    tracing::warn!("Could not resume audio: {}", e);
                }
                manager.send(message)?;
            }
            Ok(Command::Status) => {
                let store = store.lock();
                println!("link: {:?}", manager.connection_state());
                println!("singers: {}", store.singers().len());
                println!("queue: {} songs", store.queue().len());
                if let Some(item) = store.current() {
                    println!("now playing: {} ({})", item.song.title, item.singer.name);
                }
                println!(
                    "playback: {:?} at {:.1}s, pitch {:+}",
                    store.playback().status,
                    store.playback().position_seconds,
                    store.pitch_shift()
                );
                println!("link stats: {:?}", manager.stats());
                if player.is_attached() {
                    println!("audio stats: {:?}", player.stats());
                }
            }
            Ok(Command::Help) => println!("{}", HELP),
            Ok(Command::Quit) => break,
            Err(e) => println!("{}", e),
        }
    }

    manager.disconnect();
    player.detach();
    if let Some(mut capture) = capture {
        capture.stop();
    }
    tracing::info!("Client stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("join  Ana Maria "),
            Ok(Command::Send(ClientMessage::Join {
                name: "Ana Maria".into()
            }))
        );
        assert_eq!(
            parse_command("pitch -2.5"),
            Ok(Command::Send(ClientMessage::Pitch { semitones: -2.5 }))
        );
        assert_eq!(
            parse_command("skip"),
            Ok(Command::Send(ClientMessage::Playback {
                action: PlaybackAction::Skip
            }))
        );
        assert_eq!(
            parse_command("seek 30"),
            Ok(Command::Send(ClientMessage::Seek {
                position_seconds: 30.0
            }))
        );
        assert_eq!(parse_command("quit"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("join").is_err());
        assert!(parse_command("pitch up").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://party.local:8443").unwrap(),
            "wss://party.local:8443/ws"
        );
        assert_eq!(
            resolve_url("HTTP://party.local/").unwrap(),
            "ws://party.local/ws"
        );
        assert_eq!(resolve_url("ws://10.0.0.2/ws").unwrap(), "ws://10.0.0.2/ws");
        assert!(resolve_url("ftp://party.local").is_err());
        assert!(resolve_url("party.local").is_err());
    }
}

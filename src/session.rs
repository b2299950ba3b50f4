//! Session state reducer
//!
//! Folds server events into a local picture of the session. Each event may
//! also yield user-facing notifications for the caller to display.

use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::protocol::{
    PlaybackState, QueueItem, QueueItemStatus, ServerMessage, SessionSettings, Singer, Song,
};

/// How long the join QR code stays up after a `show_qr`
pub const QR_DISPLAY_TIME: Duration = Duration::from_secs(10);

/// One-line message for the user
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub text: String,
}

impl Notification {
    fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
        }
    }
}

/// Message a participant put on the shared screen
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenMessage {
    pub id: Uuid,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    singers: Vec<Singer>,
    queue: Vec<QueueItem>,
    current: Option<QueueItem>,
    playback: PlaybackState,
    settings: SessionSettings,
    search_results: Vec<Song>,
    screen_messages: Vec<ScreenMessage>,
    qr_until: Option<Instant>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one server event
    pub fn apply(&mut self, message: &ServerMessage) -> Vec<Notification> {
        self.apply_at(message, Instant::now())
    }

    pub fn apply_at(&mut self, message: &ServerMessage, now: Instant) -> Vec<Notification> {
        let mut notes = Vec::new();

        match message {
            ServerMessage::State(state) => {
                self.singers = state.singers.clone();
                self.queue = state.queue.clone();
                self.current = state.current.clone();
                self.playback = state.playback.clone();
                self.settings = state.settings.clone();
            }
            ServerMessage::SingerJoined { singer } => {
                match self.singers.iter_mut().find(|s| s.id == singer.id) {
                    Some(existing) => *existing = singer.clone(),
                    None => self.singers.push(singer.clone()),
                }
                notes.push(Notification::new(format!("{} joined", singer.name)));
            }
            ServerMessage::SongQueued { item, .. } => {
                notes.push(Notification::new(format!(
                    "{} queued \"{}\"",
                    item.singer.name, item.song.title
                )));
            }
            ServerMessage::QueueUpdated { queue } => {
                self.queue = queue.clone();
            }
            ServerMessage::PlaybackUpdated { playback } => {
                self.playback = playback.clone();
            }
            ServerMessage::SettingsUpdated { settings } => {
                self.settings = settings.clone();
            }
            ServerMessage::PositionUpdate { position } => {
                self.playback.position_seconds = *position;
            }
            ServerMessage::DownloadProgress { video_id, .. } => {
                for item in self.queue.iter_mut().filter(|i| &i.song.video_id == video_id) {
                    item.status = QueueItemStatus::Downloading;
                }
            }
            ServerMessage::DownloadError { video_id, .. } => {
                let title = self
                    .queue
                    .iter()
                    .find(|i| &i.song.video_id == video_id)
                    .map(|i| i.song.title.as_str())
                    .unwrap_or(video_id.as_str());
                notes.push(Notification::new(format!("Download failed: \"{}\"", title)));
            }
            ServerMessage::SearchResults { songs } => {
                self.search_results = songs.clone();
            }
            ServerMessage::ShowQr => {
                self.qr_until = Some(now + QR_DISPLAY_TIME);
            }
            ServerMessage::ScreenMessage { name, text } => {
                self.screen_messages.push(ScreenMessage {
                    id: Uuid::new_v4(),
                    name: name.clone(),
                    text: text.clone(),
                });
            }
            ServerMessage::NowPlaying { item } => {
                self.current = item.clone();
                if let Some(item) = item {
                    notes.push(Notification::new(format!(
                        "Now playing: \"{}\"",
                        item.song.title
                    )));
                }
            }
            ServerMessage::UpNext { singer, song } => {
                notes.push(Notification::new(format!(
                    "Up next: {} - \"{}\"",
                    singer.name, song.title
                )));
            }
            ServerMessage::Error { message } => {
                notes.push(Notification::new(format!("Error: {}", message)));
            }
        }

        notes
    }

    pub fn singers(&self) -> &[Singer] {
        &self.singers
    }

    pub fn queue(&self) -> &[QueueItem] {
        &self.queue
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.current.as_ref()
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    /// Session-wide pitch shift in semitones
    pub fn pitch_shift(&self) -> f32 {
        self.playback.pitch_shift
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn search_results(&self) -> &[Song] {
        &self.search_results
    }

    pub fn screen_messages(&self) -> &[ScreenMessage] {
        &self.screen_messages
    }

    pub fn dismiss_screen_message(&mut self, id: Uuid) {
        self.screen_messages.retain(|m| m.id != id);
    }

    pub fn qr_visible(&self) -> bool {
        self.qr_visible_at(Instant::now())
    }

    pub fn qr_visible_at(&self, now: Instant) -> bool {
        self.qr_until.map(|until| now < until).unwrap_or(false)
    }
}

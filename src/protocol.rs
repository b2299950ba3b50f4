//! Wire protocol for the session link
//!
//! Every frame carries exactly one JSON object tagged by a `type` field.
//! The tag selects the variant and with it the payload shape; the two
//! directions use independent message families.

use serde::{Deserialize, Serialize};

/// A participant in the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Singer {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub connected: bool,
}

/// A playable song as known to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub video_id: String,
    pub title: String,
    pub thumbnail_url: String,
    pub duration_seconds: u32,
    #[serde(default)]
    pub cached: bool,
}

/// Lifecycle of a queued song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    #[default]
    Waiting,
    Downloading,
    Ready,
    Playing,
    Done,
}

/// A song placed in the queue by a singer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub song: Song,
    pub singer: Singer,
    #[serde(default)]
    pub status: QueueItemStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// Shared playback state, including the session-wide pitch shift
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackState {
    #[serde(default)]
    pub status: PlaybackStatus,
    #[serde(default)]
    pub position_seconds: f64,
    /// Semitones
    #[serde(default)]
    pub pitch_shift: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub anyone_can_reorder: bool,
}

/// Full session snapshot sent on join
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub singers: Vec<Singer>,
    #[serde(default)]
    pub queue: Vec<QueueItem>,
    #[serde(default)]
    pub current: Option<QueueItem>,
    #[serde(default)]
    pub playback: PlaybackState,
    #[serde(default)]
    pub settings: SessionSettings,
}

/// Transport control requested by a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackAction {
    Play,
    Pause,
    Stop,
    Skip,
    Restart,
}

/// Client -> server messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join { name: String },
    Search { query: String },
    QueueSong { video_id: String },
    RemoveFromQueue { item_id: String },
    ReorderQueue { item_ids: Vec<String> },
    Playback { action: PlaybackAction },
    Seek { position_seconds: f64 },
    Pitch { semitones: f32 },
    UpdateSetting { key: String, value: serde_json::Value },
    ShowQr,
    ScreenMessage { text: String },
    PositionUpdate { position_seconds: f64 },
}

impl ClientMessage {
    /// Wire tag of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Search { .. } => "search",
            ClientMessage::QueueSong { .. } => "queue_song",
            ClientMessage::RemoveFromQueue { .. } => "remove_from_queue",
            ClientMessage::ReorderQueue { .. } => "reorder_queue",
            ClientMessage::Playback { .. } => "playback",
            ClientMessage::Seek { .. } => "seek",
            ClientMessage::Pitch { .. } => "pitch",
            ClientMessage::UpdateSetting { .. } => "update_setting",
            ClientMessage::ShowQr => "show_qr",
            ClientMessage::ScreenMessage { .. } => "screen_message",
            ClientMessage::PositionUpdate { .. } => "position_update",
        }
    }
}

/// Server -> client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State(SessionState),
    SingerJoined {
        singer: Singer,
    },
    SongQueued {
        item: QueueItem,
        singer: Singer,
    },
    QueueUpdated {
        queue: Vec<QueueItem>,
    },
    PlaybackUpdated {
        playback: PlaybackState,
    },
    SettingsUpdated {
        settings: SessionSettings,
    },
    PositionUpdate {
        #[serde(alias = "position_seconds")]
        position: f64,
    },
    DownloadProgress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        video_id: String,
        #[serde(alias = "progress")]
        percent: f64,
    },
    DownloadError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        video_id: String,
    },
    SearchResults {
        songs: Vec<Song>,
    },
    ShowQr,
    ScreenMessage {
        #[serde(default)]
        name: String,
        text: String,
    },
    NowPlaying {
        item: Option<QueueItem>,
    },
    UpNext {
        singer: Singer,
        song: Song,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Wire tag of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::State(_) => "state",
            ServerMessage::SingerJoined { .. } => "singer_joined",
            ServerMessage::SongQueued { .. } => "song_queued",
            ServerMessage::QueueUpdated { .. } => "queue_updated",
            ServerMessage::PlaybackUpdated { .. } => "playback_updated",
            ServerMessage::SettingsUpdated { .. } => "settings_updated",
            ServerMessage::PositionUpdate { .. } => "position_update",
            ServerMessage::DownloadProgress { .. } => "download_progress",
            ServerMessage::DownloadError { .. } => "download_error",
            ServerMessage::SearchResults { .. } => "search_results",
            ServerMessage::ShowQr => "show_qr",
            ServerMessage::ScreenMessage { .. } => "screen_message",
            ServerMessage::NowPlaying { .. } => "now_playing",
            ServerMessage::UpNext { .. } => "up_next",
            ServerMessage::Error { .. } => "error",
        }
    }
}

fn default_true() -> bool {
    true
}

//! Configuration constants for the showdown game system
//!
//! This module contains all the configuration limits and defaults used
//! throughout the room state machine, the identity manager and the scoring
//! engine, so that every replica agrees on the same boundaries.

/// Room-wide limits
pub mod room {
    /// Maximum number of seats in a room (host included)
    pub const MAX_PLAYERS: usize = 8;
    /// Maximum length of a display name in characters
    pub const MAX_NAME_LENGTH: usize = 24;
    /// Maximum length of a round theme in characters
    pub const MAX_THEME_LENGTH: usize = 200;
}

/// Game settings bounds and defaults
pub mod settings {
    /// Minimum playback duration of a song in seconds
    pub const MIN_PLAYBACK_DURATION: u32 = 15;
    /// Maximum playback duration of a song in seconds
    pub const MAX_PLAYBACK_DURATION: u32 = 60;
    /// Playback duration used by a freshly created room
    pub const DEFAULT_PLAYBACK_DURATION: u32 = 30;
    /// Minimum number of rounds in a game
    pub const MIN_TOTAL_ROUNDS: u32 = 1;
    /// Maximum number of rounds in a game
    pub const MAX_TOTAL_ROUNDS: u32 = 10;
    /// Number of rounds used by a freshly created room
    pub const DEFAULT_TOTAL_ROUNDS: u32 = 3;
}

/// Song selection bounds
pub mod selection {
    /// Latest allowed playback start offset in seconds
    pub const MAX_START_SECONDS: u32 = 3600;
    /// Maximum length of a song title (original or custom)
    pub const MAX_TITLE_LENGTH: usize = 200;
    /// Maximum length of a media identifier
    pub const MAX_VIDEO_ID_LENGTH: usize = 64;
}

/// Scoring constants
pub mod scoring {
    /// Points for any correct guess
    pub const BASE_POINTS: u64 = 100;
    /// Bonus for the first correct guess on a song
    pub const FIRST_BONUS: u64 = 50;
    /// Maximum bonus for guessing instantly, decreasing linearly to zero
    pub const MAX_SPEED_BONUS: u64 = 50;
}

/// Identity persistence constants
pub mod identity {
    /// Prefix of every per-room storage key
    pub const KEY_PREFIX: &str = "showdown.identity";
    /// Global storage key of the last used display name
    pub const PLAYER_NAME_KEY: &str = "showdown.playerName";
    /// Name used when neither the caller nor the store has one
    pub const DEFAULT_PLAYER_NAME: &str = "Player";
    /// Seconds a claimed seat may stay disconnected before it is released
    pub const SEAT_CLAIM_TIMEOUT_SECS: u32 = 4;
}

/// Room code constants
pub mod room_code {
    /// Number of characters in a room code
    pub const LENGTH: usize = 6;
    /// Characters allowed in a room code (no 0/O, 1/I ambiguity)
    pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
}

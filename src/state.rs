//! Canonical game state
//!
//! [`GameState`] is the single serializable aggregate every replica keeps a
//! copy of. Its fields can only be written by the move handlers in
//! [`crate::game`]; everything else gets shared references through the
//! accessors below.

use std::{collections::BTreeMap, fmt::Display};

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    constants::{
        room::MAX_PLAYERS,
        selection::{MAX_START_SECONDS, MAX_TITLE_LENGTH, MAX_VIDEO_ID_LENGTH},
        settings::*,
    },
    seat::SeatId,
};

/// The coarse-grained phase of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Players gather and the host configures the game
    #[default]
    Lobby,
    /// The host picks the theme of the next round
    ThemeSelection,
    /// Every player secretly picks a song matching the theme
    SongPicking,
    /// Songs play one after another while the others guess
    Guessing,
    /// The song that just finished is revealed
    SongReveal,
    /// Scores of the round are shown
    RoundResults,
    /// All rounds have been played
    GameOver,
}

impl Phase {
    /// The wire name of the phase
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::ThemeSelection => "theme_selection",
            Self::SongPicking => "song_picking",
            Self::Guessing => "guessing",
            Self::SongReveal => "song_reveal",
            Self::RoundResults => "round_results",
            Self::GameOver => "game_over",
        }
    }

    /// Whether the state machine has an edge from `self` to `next`
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Self::Lobby, Self::ThemeSelection)
                | (Self::ThemeSelection, Self::SongPicking)
                | (Self::SongPicking, Self::Guessing | Self::RoundResults)
                | (
                    Self::Guessing,
                    Self::SongReveal | Self::RoundResults
                )
                | (Self::SongReveal, Self::Guessing | Self::RoundResults)
                | (Self::RoundResults, Self::ThemeSelection | Self::GameOver)
                | (Self::GameOver, Self::Lobby)
        )
    }

    /// Whether a round must exist while in this phase
    pub fn requires_round(self) -> bool {
        matches!(
            self,
            Self::SongPicking | Self::Guessing | Self::SongReveal | Self::RoundResults
        )
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-controlled game settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Seconds each song plays before guessing closes
    #[garde(range(min = MIN_PLAYBACK_DURATION, max = MAX_PLAYBACK_DURATION))]
    pub playback_duration: u32,
    /// Number of rounds in a game
    #[garde(range(min = MIN_TOTAL_ROUNDS, max = MAX_TOTAL_ROUNDS))]
    pub total_rounds: u32,
    /// Whether each song is revealed before the next one plays
    #[garde(skip)]
    #[serde(default)]
    pub reveal_songs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            playback_duration: DEFAULT_PLAYBACK_DURATION,
            total_rounds: DEFAULT_TOTAL_ROUNDS,
            reveal_songs: false,
        }
    }
}

/// A partial settings update, fields left as `None` keep their value
#[skip_serializing_none]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    /// New playback duration in seconds
    pub playback_duration: Option<u32>,
    /// New number of rounds
    pub total_rounds: Option<u32>,
    /// New reveal behavior
    pub reveal_songs: Option<bool>,
}

impl SettingsPatch {
    /// Returns `settings` with the fields of this patch applied
    pub fn apply_to(&self, settings: Settings) -> Settings {
        Settings {
            playback_duration: self.playback_duration.unwrap_or(settings.playback_duration),
            total_rounds: self.total_rounds.unwrap_or(settings.total_rounds),
            reveal_songs: self.reveal_songs.unwrap_or(settings.reveal_songs),
        }
    }
}

/// A participant holding a seat in the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// The seat of the player
    pub id: SeatId,
    /// Display name
    pub name: String,
    /// Points accumulated over the whole game
    pub score: u64,
    /// Whether this player hosts the room
    pub is_host: bool,
    /// Whether the player is currently taking part
    pub connected: bool,
}

/// A song secretly picked by a player for the current round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SongSelection {
    /// Media reference understood by the media provider
    #[garde(length(min = 1, max = MAX_VIDEO_ID_LENGTH))]
    pub video_id: String,
    /// Title reported by the search provider
    #[garde(length(chars, max = MAX_TITLE_LENGTH))]
    pub original_title: String,
    /// Title the others have to guess
    #[garde(length(chars, max = MAX_TITLE_LENGTH))]
    pub custom_title: String,
    /// Thumbnail URL
    #[garde(skip)]
    pub thumbnail: String,
    /// Playback start offset in seconds
    #[garde(range(max = MAX_START_SECONDS))]
    #[serde(default)]
    pub start_seconds: u32,
}

impl SongSelection {
    /// The title guesses are matched against
    ///
    /// This is the custom title, or the original title when no custom one was set.
    pub fn answer(&self) -> &str {
        if self.custom_title.trim().is_empty() {
            &self.original_title
        } else {
            &self.custom_title
        }
    }
}

/// One guess on the song currently playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessInfo {
    /// The submitted text
    pub guess: String,
    /// Seconds elapsed since the song started
    pub time: u32,
    /// Whether the guess matched the song
    pub is_correct: bool,
}

/// A permanent record of a guess, kept for the whole round
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessLogEntry {
    /// Unique id drawn from the shared random source
    pub id: Uuid,
    /// The guessing seat
    pub player_id: SeatId,
    /// Name of the guesser when the guess was made
    pub player_name: String,
    /// The submitted text
    pub guess: String,
    /// Seconds elapsed since the song started
    pub time: u32,
    /// Whether the guess matched the song
    pub is_correct: bool,
    /// Seat whose song was playing
    pub song_owner_id: Option<SeatId>,
    /// Name of the song owner when the guess was made
    pub song_owner_name: Option<String>,
    /// Position of the song in the play order
    pub song_index: usize,
}

/// Working data of one round
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    /// 1-based number of the round
    pub round_number: u32,
    /// Theme set by the host
    pub theme: String,
    /// Song picked by each seat
    #[serde(default)]
    pub song_selections: BTreeMap<SeatId, SongSelection>,
    /// Position of the current song in `play_order`
    #[serde(default)]
    pub current_song_index: usize,
    /// Seat whose song is playing, `None` once every song was played
    pub current_player_id: Option<SeatId>,
    /// Guesses on the current song, per seat
    #[serde(default)]
    pub guesses: BTreeMap<SeatId, Vec<GuessInfo>>,
    /// Points earned during this round, per seat
    #[serde(default)]
    pub round_scores: BTreeMap<SeatId, u64>,
    /// Seats in the order their songs play, fixed when guessing begins
    #[serde(default)]
    pub play_order: Vec<SeatId>,
    /// Seats that guessed the current song
    #[serde(default)]
    pub correct_guessers: BTreeMap<SeatId, bool>,
    /// Every guess of the round, in submission order
    #[serde(default)]
    pub guess_log: Vec<GuessLogEntry>,
    /// Owner of the song being revealed
    pub reveal_song_owner_id: Option<SeatId>,
    /// Position of the song being revealed
    pub reveal_song_index: Option<usize>,
}

impl RoundState {
    /// Creates an empty round
    pub fn new(round_number: u32, theme: String) -> Self {
        Self {
            round_number,
            theme,
            song_selections: BTreeMap::new(),
            current_song_index: 0,
            current_player_id: None,
            guesses: BTreeMap::new(),
            round_scores: BTreeMap::new(),
            play_order: Vec::new(),
            correct_guessers: BTreeMap::new(),
            guess_log: Vec::new(),
            reveal_song_owner_id: None,
            reveal_song_index: None,
        }
    }

    /// The selection of the song currently playing
    pub fn current_song(&self) -> Option<&SongSelection> {
        self.current_player_id
            .and_then(|owner| self.song_selections.get(&owner))
    }

    /// The selection of the song being revealed
    pub fn revealed_song(&self) -> Option<&SongSelection> {
        self.reveal_song_owner_id
            .and_then(|owner| self.song_selections.get(&owner))
    }

    /// Whether the seat already guessed the current song
    pub fn has_guessed_correctly(&self, seat: SeatId) -> bool {
        self.correct_guessers.get(&seat).copied().unwrap_or_default()
            || self
                .guesses
                .get(&seat)
                .is_some_and(|guesses| guesses.iter().any(|guess| guess.is_correct))
    }

    /// The seat holding `video_id` this round, if any
    pub fn video_owner(&self, video_id: &str) -> Option<SeatId> {
        self.song_selections
            .iter()
            .find(|(_, selection)| selection.video_id == video_id)
            .map(|(seat, _)| *seat)
    }

    fn check(&self) -> Result<(), SnapshotError> {
        if let Some(seat) = self
            .play_order
            .iter()
            .find(|seat| !self.song_selections.contains_key(seat))
        {
            return Err(SnapshotError::UnknownSongOwner(*seat));
        }

        if self.play_order.iter().duplicates().next().is_some() {
            return Err(SnapshotError::DuplicatePlayOrder);
        }

        if let Some(video_id) = self
            .song_selections
            .values()
            .map(|selection| selection.video_id.as_str())
            .duplicates()
            .next()
        {
            return Err(SnapshotError::DuplicateVideo(video_id.to_owned()));
        }

        if self.current_song_index > self.play_order.len()
            || self.current_player_id != self.play_order.get(self.current_song_index).copied()
        {
            return Err(SnapshotError::SongPointer);
        }

        Ok(())
    }

    /// Reveal pointers are set together, only while revealing, and name a played song
    fn check_reveal(&self, revealing: bool) -> Result<(), SnapshotError> {
        let consistent = match (self.reveal_song_index, self.reveal_song_owner_id) {
            (Some(index), Some(owner)) => {
                revealing
                    && index < self.current_song_index
                    && self.play_order.get(index) == Some(&owner)
            }
            (None, None) => !revealing,
            _ => false,
        };

        if consistent {
            Ok(())
        } else {
            Err(SnapshotError::RevealPointer)
        }
    }
}

/// Reasons a snapshot cannot become the canonical state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The settings are out of bounds
    #[error("invalid settings: {0}")]
    Settings(String),
    /// The room capacity is zero or above the supported maximum
    #[error("room capacity {0} is not supported")]
    Capacity(usize),
    /// More players than seats
    #[error("more players than the room capacity")]
    TooManyPlayers,
    /// A player record is stored under another seat
    #[error("player stored under seat {0} has a different id")]
    MismatchedSeat(SeatId),
    /// A seat claims host rights it does not have, or the host seat lost them
    #[error("seat {0} has the wrong host flag")]
    HostMismatch(SeatId),
    /// The lobby order names a seat without a player, or a seat twice
    #[error("lobby order entry {0} is unknown or repeated")]
    LobbyOrder(SeatId),
    /// More rounds completed than configured
    #[error("completed rounds exceed total rounds")]
    RoundsOverrun,
    /// The phase needs a round but none exists
    #[error("phase {0} requires a round")]
    MissingRound(Phase),
    /// A seat in the play order has no selection
    #[error("seat {0} is in the play order without a selection")]
    UnknownSongOwner(SeatId),
    /// A seat appears twice in the play order
    #[error("play order contains duplicates")]
    DuplicatePlayOrder,
    /// Two seats hold the same media
    #[error("video {0} is selected twice")]
    DuplicateVideo(String),
    /// The current song pointers disagree with the play order
    #[error("current song pointers are inconsistent")]
    SongPointer,
    /// The reveal pointers disagree with the phase or the play order
    #[error("reveal pointers are inconsistent")]
    RevealPointer,
    /// The countdown is missing while guessing, out of range, or running in an untimed phase
    #[error("timer does not fit phase {0}")]
    Timer(Phase),
}

/// The canonical state of a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub(crate) phase: Phase,
    pub(crate) players: BTreeMap<SeatId, Player>,
    pub(crate) settings: Settings,
    pub(crate) current_round: Option<RoundState>,
    pub(crate) total_rounds: u32,
    pub(crate) completed_rounds: u32,
    pub(crate) timer: Option<u32>,
    pub(crate) max_players: usize,
    #[serde(default)]
    pub(crate) lobby_order: Vec<SeatId>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    /// Creates the lobby of a new room with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(MAX_PLAYERS)
    }

    /// Creates the lobby of a new room with `max_players` seats
    pub fn with_capacity(max_players: usize) -> Self {
        let settings = Settings::default();
        Self {
            phase: Phase::Lobby,
            players: BTreeMap::new(),
            settings,
            current_round: None,
            total_rounds: settings.total_rounds,
            completed_rounds: 0,
            timer: None,
            max_players: max_players.clamp(1, MAX_PLAYERS),
            lobby_order: Vec::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// All seated players, by seat
    pub fn players(&self) -> &BTreeMap<SeatId, Player> {
        &self.players
    }

    /// The player in the given seat
    pub fn player(&self, seat: SeatId) -> Option<&Player> {
        self.players.get(&seat)
    }

    /// Current settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The round in progress, if any
    pub fn current_round(&self) -> Option<&RoundState> {
        self.current_round.as_ref()
    }

    /// Number of rounds in this game
    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    /// Number of rounds already finished
    pub fn completed_rounds(&self) -> u32 {
        self.completed_rounds
    }

    /// Seconds left in the timed phase
    pub fn timer(&self) -> Option<u32> {
        self.timer
    }

    /// Number of seats in the room
    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Seats in the order they first joined the lobby
    pub fn lobby_order(&self) -> &[SeatId] {
        &self.lobby_order
    }

    /// Whether the seat holds the host role
    pub fn is_host(&self, seat: SeatId) -> bool {
        self.players.get(&seat).is_some_and(|player| player.is_host)
    }

    /// Seats of all connected players, lowest first
    pub fn connected_seats(&self) -> impl Iterator<Item = SeatId> + '_ {
        self.players
            .values()
            .filter(|player| player.connected)
            .map(|player| player.id)
    }

    /// Seats in lobby display order: first-seen order, then any stragglers by seat
    pub fn seats_in_lobby_order(&self) -> Vec<SeatId> {
        self.lobby_order
            .iter()
            .copied()
            .filter(|seat| self.players.contains_key(seat))
            .chain(self.players.keys().copied())
            .unique()
            .collect_vec()
    }

    /// The connected participant who should take over when the host is gone
    ///
    /// This is the first connected non-host seat in lobby order. Deciding when
    /// to promote is up to the caller.
    pub fn migration_candidate(&self) -> Option<SeatId> {
        self.seats_in_lobby_order().into_iter().find(|seat| {
            self.players
                .get(seat)
                .is_some_and(|player| player.connected && !player.is_host)
        })
    }

    /// Checks that a state (typically a restored snapshot) is internally consistent
    ///
    /// # Errors
    ///
    /// Returns the first [`SnapshotError`] found.
    pub fn check(&self) -> Result<(), SnapshotError> {
        self.settings
            .validate()
            .map_err(|report| SnapshotError::Settings(report.to_string()))?;

        if self.max_players == 0 || self.max_players > MAX_PLAYERS {
            return Err(SnapshotError::Capacity(self.max_players));
        }

        if self.players.len() > self.max_players {
            return Err(SnapshotError::TooManyPlayers);
        }

        if let Some((seat, _)) = self.players.iter().find(|(seat, player)| player.id != **seat) {
            return Err(SnapshotError::MismatchedSeat(*seat));
        }

        if let Some(seat) = self
            .players
            .values()
            .find(|player| player.is_host != player.id.is_host())
            .map(|player| player.id)
        {
            return Err(SnapshotError::HostMismatch(seat));
        }

        if let Some(seat) = self
            .lobby_order
            .iter()
            .find(|seat| !self.players.contains_key(seat))
            .or_else(|| self.lobby_order.iter().duplicates().next())
        {
            return Err(SnapshotError::LobbyOrder(*seat));
        }

        if self.completed_rounds > self.total_rounds {
            return Err(SnapshotError::RoundsOverrun);
        }

        match &self.current_round {
            None if self.phase.requires_round() => {
                return Err(SnapshotError::MissingRound(self.phase));
            }
            None => {}
            Some(round) => {
                round.check()?;
                round.check_reveal(self.phase == Phase::SongReveal)?;
            }
        }

        let timer_fits = match (self.phase, self.timer) {
            (Phase::Guessing, Some(remaining)) => remaining <= self.settings.playback_duration,
            (Phase::Guessing, None) | (_, Some(_)) => false,
            (_, None) => true,
        };
        if !timer_fits {
            return Err(SnapshotError::Timer(self.phase));
        }

        Ok(())
    }
}

//! Media search and playback boundaries
//!
//! The game never talks to a video service directly. Search results come in
//! through a [`SearchProvider`] and songs play through a [`MediaProvider`];
//! this module only decides what to play and which controls to expose in
//! each phase.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    constants::selection::MAX_TITLE_LENGTH,
    state::{GameState, Phase, SongSelection},
};

/// A search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    /// Media reference understood by the media provider
    pub id: String,
    /// Title as reported by the provider
    pub title: String,
    /// Thumbnail URL
    pub thumbnail: String,
    /// Name of the publishing channel
    pub channel_name: String,
}

/// A failed search, reported only to the participant who searched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("search failed: {0}")]
pub struct SearchError(pub String);

/// Free-text media search
pub trait SearchProvider {
    /// Returns the candidates for `query`, best match first
    ///
    /// # Errors
    ///
    /// Any failure is reported as a single [`SearchError`], never as partial results.
    fn search(&mut self, query: &str) -> Result<Vec<MediaItem>, SearchError>;
}

/// Playback notifications from a [`MediaProvider`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The media is loaded and playing
    Ready,
    /// Playback stopped on its own
    Ended,
}

/// Controls exposed to the local participant while media plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackControls {
    /// Whether the participant may seek
    pub seek: bool,
    /// Whether the participant may pause
    pub pause: bool,
    /// Whether pausing from outside the game (e.g. the embedded player) is undone
    pub prevent_external_pause: bool,
}

impl PlaybackControls {
    /// Controls for the given phase
    ///
    /// Previewing while picking gets every control. While guessing, nobody may
    /// hold up the shared countdown.
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::SongPicking => Self {
                seek: true,
                pause: true,
                prevent_external_pause: false,
            },
            Phase::Guessing => Self {
                seek: false,
                pause: false,
                prevent_external_pause: true,
            },
            _ => Self::default(),
        }
    }
}

/// What a media provider should play
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    /// Media reference
    pub video_id: String,
    /// Offset to start from, in seconds
    pub start_seconds: u32,
    /// Longest the media may play, in seconds
    pub max_duration: u32,
    /// Controls to expose
    pub controls: PlaybackControls,
}

impl PlaybackRequest {
    /// Preview of a selection while picking
    pub fn preview(selection: &SongSelection, max_duration: u32) -> Self {
        Self {
            video_id: selection.video_id.clone(),
            start_seconds: selection.start_seconds,
            max_duration,
            controls: PlaybackControls::for_phase(Phase::SongPicking),
        }
    }

    /// The song every replica should be playing in `state`
    ///
    /// # Returns
    ///
    /// The current song while guessing, `None` in every other phase.
    pub fn for_state(state: &GameState) -> Option<Self> {
        if state.phase() != Phase::Guessing {
            return None;
        }

        let song = state.current_round()?.current_song()?;
        Some(Self {
            video_id: song.video_id.clone(),
            start_seconds: song.start_seconds,
            max_duration: state.settings().playback_duration,
            controls: PlaybackControls::for_phase(Phase::Guessing),
        })
    }
}

/// Plays media for the local participant
pub trait MediaProvider {
    /// Starts playing, replacing whatever played before
    fn play(&mut self, request: &PlaybackRequest);

    /// Stops playback
    fn stop(&mut self);

    /// Takes the next pending playback notification
    fn poll_event(&mut self) -> Option<PlaybackEvent>;
}

/// Decodes the HTML entities search providers leave in titles
///
/// Handles the named entities `&amp;`, `&lt;`, `&gt;`, `&quot;`, `&apos;` and
/// `&nbsp;`, plus decimal and hexadecimal character references. Anything else
/// is kept as is.
pub fn decode_html_entities(text: &str) -> String {
    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        rest = &rest[start..];

        let replacement = rest
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));

        match replacement {
            Some((c, end)) => {
                decoded.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }

    decoded.push_str(rest);
    decoded
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let number = entity.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn clip_title(title: &str) -> String {
    title.chars().take(MAX_TITLE_LENGTH).collect()
}

impl SongSelection {
    /// Builds a selection from a search result
    ///
    /// The decoded provider title becomes both the original and the initial
    /// custom title.
    pub fn from_media(item: &MediaItem, start_seconds: u32) -> Self {
        let title = clip_title(&decode_html_entities(&item.title));
        Self {
            video_id: item.id.clone(),
            original_title: title.clone(),
            custom_title: title,
            thumbnail: item.thumbnail.clone(),
            start_seconds,
        }
    }
}

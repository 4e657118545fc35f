//! Standings and per-song statistics
//!
//! Everything here is derived from a [`GameState`] on demand; nothing is
//! stored besides what the reducer already keeps. Ties are broken by lobby
//! order and then by seat, so every replica ranks players identically.

use std::cmp::Reverse;

use itertools::Itertools;
use serde::Serialize;

use crate::{
    seat::SeatId,
    state::{GameState, RoundState},
};

/// One line of a leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    /// 0-based rank
    pub position: usize,
    /// Seat of the player
    pub seat: SeatId,
    /// Display name of the player
    pub name: String,
    /// Points counted by this leaderboard
    pub points: u64,
    /// Whether the player is currently taking part
    pub connected: bool,
}

/// Points and rank of a single player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreMessage {
    /// Points counted by the leaderboard
    pub points: u64,
    /// 0-based rank
    pub position: usize,
}

/// Statistics of one played song
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SongStats {
    /// Position of the song in the play order
    pub song_index: usize,
    /// Seat that picked the song
    pub owner: SeatId,
    /// Title guessers had to find
    pub title: String,
    /// Number of guesses submitted on the song
    pub guess_count: usize,
    /// Seats that found the title, fastest first
    pub correct_guessers: Vec<SeatId>,
}

fn ranked<F: Fn(SeatId) -> u64>(state: &GameState, points_of: F) -> Vec<Standing> {
    state
        .seats_in_lobby_order()
        .into_iter()
        .enumerate()
        .filter_map(|(rank, seat)| {
            state
                .player(seat)
                .map(|player| (rank, player, points_of(seat)))
        })
        .sorted_by_key(|(rank, _, points)| (Reverse(*points), *rank))
        .enumerate()
        .map(|(position, (_, player, points))| Standing {
            position,
            seat: player.id,
            name: player.name.clone(),
            points,
            connected: player.connected,
        })
        .collect_vec()
}

/// Total scores of every player, best first
pub fn standings(state: &GameState) -> Vec<Standing> {
    ranked(state, |seat| {
        state.player(seat).map_or(0, |player| player.score)
    })
}

/// Scores earned during the current round, best first
///
/// Players without points this round are listed with zero. Outside a round
/// the list is empty.
pub fn round_standings(state: &GameState) -> Vec<Standing> {
    let Some(round) = state.current_round() else {
        return Vec::new();
    };

    ranked(state, |seat| {
        round.round_scores.get(&seat).copied().unwrap_or_default()
    })
}

/// Total score and rank of one player
///
/// # Returns
///
/// `None` if nobody holds the seat.
pub fn score(state: &GameState, seat: SeatId) -> Option<ScoreMessage> {
    standings(state)
        .into_iter()
        .find(|standing| standing.seat == seat)
        .map(|standing| ScoreMessage {
            points: standing.points,
            position: standing.position,
        })
}

/// Statistics for every song of the round that finished playing
pub fn song_stats(round: &RoundState) -> Vec<SongStats> {
    let guesses_by_song = round
        .guess_log
        .iter()
        .into_group_map_by(|entry| entry.song_index);

    round
        .play_order
        .iter()
        .take(round.current_song_index)
        .enumerate()
        .map(|(song_index, owner)| {
            let guesses = guesses_by_song
                .get(&song_index)
                .map(Vec::as_slice)
                .unwrap_or_default();

            SongStats {
                song_index,
                owner: *owner,
                title: round
                    .song_selections
                    .get(owner)
                    .map(|selection| selection.answer().to_owned())
                    .unwrap_or_default(),
                guess_count: guesses.len(),
                correct_guessers: guesses
                    .iter()
                    .filter(|entry| entry.is_correct)
                    .sorted_by_key(|entry| entry.time)
                    .map(|entry| entry.player_id)
                    .collect_vec(),
            }
        })
        .collect_vec()
}

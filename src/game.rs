//! Room state machine
//!
//! Every change to a [`GameState`] goes through [`apply`], which takes the
//! seat issuing a [`Move`] and the room's shared [`RandomSource`]. Moves that
//! are not legal in the current phase, come from the wrong seat, or would
//! break an invariant are ignored without touching the state. The reason is
//! still reported as [`Outcome::Ignored`] so callers can log or test it.

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    constants::room::MAX_THEME_LENGTH,
    names,
    random::RandomSource,
    scoring,
    seat::SeatId,
    state::{
        GameState, GuessInfo, GuessLogEntry, Phase, Player, RoundState, SettingsPatch,
        SongSelection,
    },
};

/// A named move issued by a seat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "move", content = "args", rename_all = "camelCase")]
pub enum Move {
    /// Host changes the settings while in the lobby
    UpdateSettings(SettingsPatch),
    /// Host removes a seat from the lobby
    KickPlayer(SeatId),
    /// Registers the sender's seat, renames it, or marks it connected again
    SetPlayerName(String),
    /// Host leaves the lobby
    StartGame,
    /// Host sets the theme of the upcoming round
    SetTheme(String),
    /// Host locks in the theme
    ConfirmTheme,
    /// Sender picks a song for this round
    SelectSong(SongSelection),
    /// Sender guesses the title of the song playing
    SubmitGuess(String),
    /// Host clock tick, one per second
    TickTimer,
    /// Host moves on from the song reveal
    ContinueReveal,
    /// Host moves on from the round results
    NextRound,
    /// Host sends everyone back to the lobby after the game
    RestartLobby,
    /// Host ends the session
    EndGame,
    /// Host replaces the whole state with a persisted snapshot
    RestoreState(serde_json::Value),
    /// The given seat stopped taking part
    PlayerLeft(SeatId),
}

impl Move {
    /// The wire name of the move
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateSettings(_) => "updateSettings",
            Self::KickPlayer(_) => "kickPlayer",
            Self::SetPlayerName(_) => "setPlayerName",
            Self::StartGame => "startGame",
            Self::SetTheme(_) => "setTheme",
            Self::ConfirmTheme => "confirmTheme",
            Self::SelectSong(_) => "selectSong",
            Self::SubmitGuess(_) => "submitGuess",
            Self::TickTimer => "tickTimer",
            Self::ContinueReveal => "continueReveal",
            Self::NextRound => "nextRound",
            Self::RestartLobby => "restartLobby",
            Self::EndGame => "endGame",
            Self::RestoreState(_) => "restoreState",
            Self::PlayerLeft(_) => "playerLeft",
        }
    }
}

/// Why a move was ignored
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The sender lacks the role the move needs
    #[error("sender is not allowed to make this move")]
    Unauthorized,
    /// The move is not defined for the current phase
    #[error("move is not legal in the current phase")]
    IllegalForPhase,
    /// The move would break an invariant given what was applied before it
    #[error("move conflicts with the current state")]
    Conflict,
    /// The move arguments are out of bounds
    #[error("move arguments are invalid")]
    Invalid,
    /// No seat is left for a new player
    #[error("room is full")]
    RoomFull,
    /// The move refers to a seat without a player
    #[error("no player holds this seat")]
    UnknownPlayer,
    /// The restore payload is not a consistent game state
    #[error("snapshot is malformed")]
    MalformedSnapshot,
}

/// A change of phase caused by a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Phase before the move
    pub from: Phase,
    /// Phase after the move
    pub to: Phase,
}

/// The result of applying a move
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::From)]
pub enum Outcome {
    /// The move was dropped and the state is untouched
    #[from]
    Ignored(Rejection),
    /// The move was legal but had nothing to change
    Unchanged,
    /// The state changed
    Changed {
        /// Set when the phase changed
        transition: Option<Transition>,
    },
    /// The host ended the session
    Ended,
}

impl Outcome {
    fn changed() -> Self {
        Self::Changed { transition: None }
    }

    /// Whether the state may differ after the move
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }

    /// The phase change caused by the move, if any
    pub fn transition(&self) -> Option<Transition> {
        match self {
            Self::Changed { transition } => *transition,
            _ => None,
        }
    }
}

/// Applies a move to the state
///
/// This is the only way a [`GameState`] changes. Given the same state, the
/// same moves in the same order and identically seeded random sources, every
/// replica ends in the same state.
///
/// # Arguments
///
/// * `state` - The canonical state, changed in place
/// * `sender` - The seat that issued the move
/// * `action` - The move itself
/// * `random` - The room's shared random source
///
/// # Returns
///
/// What happened. An ignored move leaves `state` exactly as it was.
pub fn apply(
    state: &mut GameState,
    sender: SeatId,
    action: Move,
    random: &mut impl RandomSource,
) -> Outcome {
    let from = state.phase;
    let name = action.name();

    match state.handle(sender, action, random) {
        Err(rejection) => {
            debug!(%sender, name, %rejection, "ignored move");
            rejection.into()
        }
        Ok(Outcome::Changed { .. }) => {
            let to = state.phase;
            let transition = (from != to).then_some(Transition { from, to });
            if transition.is_some() {
                info!(%sender, name, %from, %to, "phase transition");
            }
            Outcome::Changed { transition }
        }
        Ok(outcome) => outcome,
    }
}

// Guards
impl GameState {
    fn expect_phase(&self, phase: Phase) -> Result<(), Rejection> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(Rejection::IllegalForPhase)
        }
    }

    fn require_host(&self, sender: SeatId) -> Result<(), Rejection> {
        if self.is_host(sender) {
            Ok(())
        } else {
            Err(Rejection::Unauthorized)
        }
    }

    fn round_mut(&mut self) -> Result<&mut RoundState, Rejection> {
        self.current_round
            .as_mut()
            .ok_or(Rejection::IllegalForPhase)
    }
}

// Move handlers
impl GameState {
    fn handle(
        &mut self,
        sender: SeatId,
        action: Move,
        random: &mut impl RandomSource,
    ) -> Result<Outcome, Rejection> {
        match action {
            Move::SetPlayerName(name) => self.set_player_name(sender, &name),
            Move::PlayerLeft(seat) => self.player_left(sender, seat, random),
            Move::RestoreState(snapshot) => self.restore(sender, snapshot),
            Move::UpdateSettings(patch) => {
                self.expect_phase(Phase::Lobby)?;
                self.require_host(sender)?;
                self.update_settings(patch)
            }
            Move::KickPlayer(seat) => {
                self.expect_phase(Phase::Lobby)?;
                self.require_host(sender)?;
                self.kick_player(sender, seat)
            }
            Move::StartGame => {
                self.expect_phase(Phase::Lobby)?;
                self.require_host(sender)?;
                self.total_rounds = self.settings.total_rounds;
                self.phase = Phase::ThemeSelection;
                Ok(Outcome::changed())
            }
            Move::SetTheme(theme) => {
                self.expect_phase(Phase::ThemeSelection)?;
                self.require_host(sender)?;
                self.set_theme(theme)
            }
            Move::ConfirmTheme => {
                self.expect_phase(Phase::ThemeSelection)?;
                self.require_host(sender)?;
                self.confirm_theme()
            }
            Move::SelectSong(selection) => {
                self.expect_phase(Phase::SongPicking)?;
                self.select_song(sender, selection, random)
            }
            Move::SubmitGuess(guess) => {
                self.expect_phase(Phase::Guessing)?;
                self.submit_guess(sender, guess, random)
            }
            Move::TickTimer => {
                self.expect_phase(Phase::Guessing)?;
                self.require_host(sender)?;
                Ok(self.tick_timer())
            }
            Move::ContinueReveal => {
                self.expect_phase(Phase::SongReveal)?;
                self.require_host(sender)?;
                self.continue_reveal()
            }
            Move::NextRound => {
                self.expect_phase(Phase::RoundResults)?;
                self.require_host(sender)?;
                Ok(self.next_round())
            }
            Move::RestartLobby => {
                self.expect_phase(Phase::GameOver)?;
                self.require_host(sender)?;
                Ok(self.restart_lobby())
            }
            Move::EndGame => {
                self.expect_phase(Phase::GameOver)?;
                self.require_host(sender)?;
                info!(%sender, "session ended by host");
                Ok(Outcome::Ended)
            }
        }
    }

    fn set_player_name(&mut self, sender: SeatId, name: &str) -> Result<Outcome, Rejection> {
        let name = names::normalize_name(name).ok_or(Rejection::Invalid)?;

        if let Some(player) = self.players.get_mut(&sender) {
            if player.connected && player.name == name {
                return Ok(Outcome::Unchanged);
            }
            player.name = name;
            player.connected = true;
        } else {
            self.expect_phase(Phase::Lobby)?;
            if self.players.len() >= self.max_players {
                return Err(Rejection::RoomFull);
            }
            if !sender.fits(self.max_players) {
                return Err(Rejection::Invalid);
            }
            self.players.insert(
                sender,
                Player {
                    id: sender,
                    name,
                    score: 0,
                    is_host: sender.is_host(),
                    connected: true,
                },
            );
        }

        if !self.lobby_order.contains(&sender) {
            self.lobby_order.push(sender);
        }

        Ok(Outcome::changed())
    }

    fn player_left(
        &mut self,
        sender: SeatId,
        seat: SeatId,
        random: &mut impl RandomSource,
    ) -> Result<Outcome, Rejection> {
        if sender != seat {
            self.require_host(sender)?;
        }

        let player = self
            .players
            .get_mut(&seat)
            .ok_or(Rejection::UnknownPlayer)?;
        if !player.connected {
            return Ok(Outcome::Unchanged);
        }
        player.connected = false;

        match self.phase {
            Phase::SongPicking => self.finish_song_picking_if_ready(random),
            Phase::Guessing if self.everyone_guessed() => self.finish_song(),
            _ => {}
        }

        Ok(Outcome::changed())
    }

    fn restore(
        &mut self,
        sender: SeatId,
        snapshot: serde_json::Value,
    ) -> Result<Outcome, Rejection> {
        if !sender.is_host() {
            return Err(Rejection::Unauthorized);
        }

        let mut restored: GameState = serde_json::from_value(snapshot).map_err(|error| {
            warn!(%error, "snapshot does not parse");
            Rejection::MalformedSnapshot
        })?;

        restored.check().map_err(|error| {
            warn!(%error, "snapshot is inconsistent");
            Rejection::MalformedSnapshot
        })?;

        if let Some(host) = restored.players.get_mut(&sender) {
            host.connected = true;
        }

        info!(phase = %restored.phase, players = restored.players.len(), "state restored");
        *self = restored;

        Ok(Outcome::changed())
    }

    fn update_settings(&mut self, patch: SettingsPatch) -> Result<Outcome, Rejection> {
        let settings = patch.apply_to(self.settings);
        settings.validate().map_err(|_| Rejection::Invalid)?;

        if settings == self.settings {
            return Ok(Outcome::Unchanged);
        }

        self.settings = settings;
        self.total_rounds = settings.total_rounds;

        Ok(Outcome::changed())
    }

    fn kick_player(&mut self, sender: SeatId, seat: SeatId) -> Result<Outcome, Rejection> {
        if seat == sender {
            return Err(Rejection::Conflict);
        }

        self.players
            .remove(&seat)
            .ok_or(Rejection::UnknownPlayer)?;
        self.lobby_order.retain(|id| *id != seat);

        Ok(Outcome::changed())
    }

    fn set_theme(&mut self, theme: String) -> Result<Outcome, Rejection> {
        let theme: String = theme.chars().take(MAX_THEME_LENGTH).collect();

        match &mut self.current_round {
            Some(round) if round.theme == theme => return Ok(Outcome::Unchanged),
            Some(round) => round.theme = theme,
            None => {
                self.current_round = Some(RoundState::new(self.completed_rounds + 1, theme));
            }
        }

        Ok(Outcome::changed())
    }

    fn confirm_theme(&mut self) -> Result<Outcome, Rejection> {
        if !self
            .current_round
            .as_ref()
            .is_some_and(|round| !round.theme.trim().is_empty())
        {
            return Err(Rejection::Invalid);
        }

        self.timer = None;
        self.phase = Phase::SongPicking;

        Ok(Outcome::changed())
    }

    fn select_song(
        &mut self,
        sender: SeatId,
        selection: SongSelection,
        random: &mut impl RandomSource,
    ) -> Result<Outcome, Rejection> {
        if !self.players.contains_key(&sender) {
            return Err(Rejection::UnknownPlayer);
        }
        selection.validate().map_err(|_| Rejection::Invalid)?;

        let round = self.round_mut()?;
        match round.video_owner(&selection.video_id) {
            Some(owner) if owner != sender => return Err(Rejection::Conflict),
            _ => {}
        }
        if round.song_selections.get(&sender) == Some(&selection) {
            return Ok(Outcome::Unchanged);
        }
        round.song_selections.insert(sender, selection);

        self.finish_song_picking_if_ready(random);

        Ok(Outcome::changed())
    }

    fn submit_guess(
        &mut self,
        sender: SeatId,
        guess: String,
        random: &mut impl RandomSource,
    ) -> Result<Outcome, Rejection> {
        let player_name = self
            .players
            .get(&sender)
            .map(|player| player.name.clone())
            .ok_or(Rejection::UnknownPlayer)?;
        if guess.trim().is_empty() {
            return Err(Rejection::Invalid);
        }

        let max_time = self.settings.playback_duration;
        let time = max_time.saturating_sub(self.timer.unwrap_or(0));

        let round = self
            .current_round
            .as_mut()
            .ok_or(Rejection::IllegalForPhase)?;
        let owner = round.current_player_id.ok_or(Rejection::IllegalForPhase)?;
        if owner == sender || round.has_guessed_correctly(sender) {
            return Err(Rejection::Conflict);
        }

        let is_correct = round
            .current_song()
            .is_some_and(|song| scoring::is_guess_correct(&guess, song.answer()));

        // Ties go to the guess applied first
        let is_first_correct = is_correct
            && !round
                .guesses
                .iter()
                .filter(|(seat, _)| **seat != sender)
                .flat_map(|(_, guesses)| guesses)
                .any(|other| other.is_correct && other.time <= time);

        round.guesses.entry(sender).or_default().push(GuessInfo {
            guess: guess.clone(),
            time,
            is_correct,
        });
        round.guess_log.push(GuessLogEntry {
            id: random.uuid(),
            player_id: sender,
            player_name,
            guess,
            time,
            is_correct,
            song_owner_id: Some(owner),
            song_owner_name: self.players.get(&owner).map(|player| player.name.clone()),
            song_index: round.current_song_index,
        });

        if is_correct {
            round.correct_guessers.insert(sender, true);
            let points = scoring::calculate_points(true, time, max_time, is_first_correct);
            *round.round_scores.entry(sender).or_default() += points;
            if let Some(player) = self.players.get_mut(&sender) {
                player.score += points;
            }
        }

        if self.everyone_guessed() {
            self.finish_song();
        }

        Ok(Outcome::changed())
    }

    fn tick_timer(&mut self) -> Outcome {
        let Some(timer) = self.timer else {
            return Outcome::Unchanged;
        };

        let remaining = timer.saturating_sub(1);
        self.timer = Some(remaining);
        if remaining == 0 {
            self.finish_song();
        }

        Outcome::changed()
    }

    fn continue_reveal(&mut self) -> Result<Outcome, Rejection> {
        let playback_duration = self.settings.playback_duration;
        let round = self.round_mut()?;
        round.reveal_song_owner_id = None;
        round.reveal_song_index = None;

        if round.current_player_id.is_some() {
            self.timer = Some(playback_duration);
            self.phase = Phase::Guessing;
        } else {
            self.timer = None;
            self.phase = Phase::RoundResults;
        }

        Ok(Outcome::changed())
    }

    fn next_round(&mut self) -> Outcome {
        self.completed_rounds += 1;
        self.timer = None;

        if self.completed_rounds < self.total_rounds {
            self.current_round = None;
            self.phase = Phase::ThemeSelection;
        } else {
            self.phase = Phase::GameOver;
        }

        info!(
            completed = self.completed_rounds,
            total = self.total_rounds,
            "round completed"
        );

        Outcome::changed()
    }

    fn restart_lobby(&mut self) -> Outcome {
        for player in self.players.values_mut() {
            player.score = 0;
        }

        self.current_round = None;
        self.completed_rounds = 0;
        self.timer = None;
        self.total_rounds = self.settings.total_rounds;
        self.phase = Phase::Lobby;

        Outcome::changed()
    }
}

// Automatic transitions
impl GameState {
    /// Starts guessing once every connected player picked a song
    fn finish_song_picking_if_ready(&mut self, random: &mut impl RandomSource) {
        let Some(round) = self.current_round.as_mut() else {
            return;
        };

        if !self
            .players
            .values()
            .filter(|player| player.connected)
            .all(|player| round.song_selections.contains_key(&player.id))
        {
            return;
        }

        let mut play_order = round.song_selections.keys().copied().collect_vec();
        random.shuffle(&mut play_order);

        round.current_song_index = 0;
        round.current_player_id = play_order.first().copied();
        round.play_order = play_order;
        round.guesses.clear();
        round.correct_guessers.clear();

        if round.current_player_id.is_some() {
            self.timer = Some(self.settings.playback_duration);
            self.phase = Phase::Guessing;
        } else {
            self.timer = None;
            self.phase = Phase::RoundResults;
        }
    }

    /// Whether every connected seat other than the song owner guessed correctly
    fn everyone_guessed(&self) -> bool {
        let Some(round) = &self.current_round else {
            return false;
        };
        let Some(owner) = round.current_player_id else {
            return false;
        };

        self.connected_seats()
            .filter(|seat| *seat != owner)
            .all(|seat| round.has_guessed_correctly(seat))
    }

    /// Moves past the song playing, to the next one, the reveal or the results
    fn finish_song(&mut self) {
        let playback_duration = self.settings.playback_duration;
        let reveal_songs = self.settings.reveal_songs;
        let Some(round) = self.current_round.as_mut() else {
            return;
        };

        let finished_index = round.current_song_index;
        let finished_owner = round.current_player_id;

        round.current_song_index = (finished_index + 1).min(round.play_order.len());
        round.current_player_id = round.play_order.get(round.current_song_index).copied();
        round.guesses.clear();
        round.correct_guessers.clear();

        if reveal_songs {
            round.reveal_song_owner_id = finished_owner;
            round.reveal_song_index = Some(finished_index);
            self.timer = None;
            self.phase = Phase::SongReveal;
        } else if round.current_player_id.is_some() {
            self.timer = Some(playback_duration);
        } else {
            self.timer = None;
            self.phase = Phase::RoundResults;
        }
    }
}

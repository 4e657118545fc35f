//! Replicated game session
//!
//! Every participant runs a [`Replica`]: its own copy of the [`GameState`]
//! plus the room's shared random source. Local moves are wrapped in an
//! [`Envelope`] and handed to a [`MoveChannel`], which delivers them to every
//! replica, the sender included. Replicas only ever change by receiving
//! envelopes, so identical delivery orders yield identical states.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    game::{self, Move, Outcome, Rejection},
    random::RandomSource,
    seat::{PlayerSlot, SeatId},
    state::GameState,
};

/// A move on its way to every replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifies the envelope so redeliveries can be dropped
    pub id: Uuid,
    /// The seat that issued the move
    pub sender: SeatId,
    /// The move itself
    pub action: Move,
}

impl Envelope {
    /// Wraps a move issued by `sender`
    pub fn new(sender: SeatId, action: Move) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            action,
        }
    }
}

/// Transport replicating envelopes between participants
///
/// Implementations deliver every envelope to every replica at least once,
/// keeping each sender's own order.
pub trait MoveChannel {
    /// Sends an envelope to every replica, the local one included
    fn broadcast(&mut self, envelope: Envelope);
}

/// Errors reported to the local participant only
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The local participant does not hold the seat the action needs
    #[error("only the host may do this")]
    NotHost,
    /// The snapshot could not be used, the state is untouched
    #[error("snapshot rejected: {0}")]
    Snapshot(Rejection),
}

/// One participant's copy of a room
///
/// The replica keeps every applied envelope in its log and every envelope id
/// it has seen, for as long as it lives. Both grow with the number of moves
/// in the session and are never trimmed, not even after a restore: a late
/// copy of an envelope from before the restore must still be dropped.
#[derive(Debug, Clone)]
pub struct Replica<R: RandomSource> {
    state: GameState,
    random: R,
    slot: PlayerSlot,
    log: Vec<Envelope>,
    seen: HashSet<Uuid>,
    ended: bool,
}

impl<R: RandomSource> Replica<R> {
    /// Creates a replica of a fresh room
    ///
    /// # Arguments
    ///
    /// * `slot` - The local participant's seat, or spectator
    /// * `random` - The room's shared random source, seeded identically on every replica
    pub fn new(slot: PlayerSlot, random: R) -> Self {
        Self::with_state(slot, GameState::new(), random)
    }

    /// Creates a replica starting from a known state
    pub fn with_state(slot: PlayerSlot, state: GameState, random: R) -> Self {
        Self {
            state,
            random,
            slot,
            log: Vec::new(),
            seen: HashSet::new(),
            ended: false,
        }
    }

    /// The current state
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// The local participant's seat, or spectator
    pub fn slot(&self) -> PlayerSlot {
        self.slot
    }

    /// Envelopes applied so far, in application order
    pub fn log(&self) -> &[Envelope] {
        &self.log
    }

    /// Whether the host ended the session
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Switches the local participant to another seat after an identity change
    pub fn adopt_seat(&mut self, slot: PlayerSlot) {
        debug!(from = %self.slot, to = %slot, "adopting seat");
        self.slot = slot;
    }

    /// Sends a local move to every replica
    ///
    /// Spectators have no seat to send from, and nothing is sent once the
    /// session ended. The move takes effect when the channel delivers it back
    /// through [`Replica::receive`].
    ///
    /// # Returns
    ///
    /// Whether the move was sent.
    pub fn dispatch<C: MoveChannel>(&self, channel: &mut C, action: Move) -> bool {
        let PlayerSlot::Seat(sender) = self.slot else {
            debug!(name = action.name(), "spectators cannot dispatch moves");
            return false;
        };
        if self.ended {
            return false;
        }

        channel.broadcast(Envelope::new(sender, action));
        true
    }

    /// Applies a delivered envelope
    ///
    /// An envelope delivered a second time is ignored as
    /// [`Rejection::Conflict`] without touching the state.
    pub fn receive(&mut self, envelope: Envelope) -> Outcome {
        if !self.seen.insert(envelope.id) {
            debug!(id = %envelope.id, "dropping redelivered envelope");
            return Rejection::Conflict.into();
        }

        let outcome = game::apply(
            &mut self.state,
            envelope.sender,
            envelope.action.clone(),
            &mut self.random,
        );
        if outcome == Outcome::Ended {
            info!("session ended");
            self.ended = true;
        }

        self.log.push(envelope);
        outcome
    }

    /// Rebuilds a replica by applying a log from the start
    ///
    /// `random` must be freshly seeded, the same way the original replica's was.
    pub fn replay<I: IntoIterator<Item = Envelope>>(slot: PlayerSlot, random: R, log: I) -> Self {
        let mut replica = Self::new(slot, random);
        for envelope in log {
            replica.receive(envelope);
        }
        replica
    }

    /// Seeds the room with a snapshot persisted before a restart
    ///
    /// The snapshot is checked locally first so a bad one is reported here
    /// instead of being broadcast.
    ///
    /// # Errors
    ///
    /// [`Error::NotHost`] unless the local participant holds the host seat,
    /// [`Error::Snapshot`] if the snapshot is not a consistent state.
    pub fn restore_state<C: MoveChannel>(
        &self,
        channel: &mut C,
        snapshot: serde_json::Value,
    ) -> Result<(), Error> {
        if self.slot != PlayerSlot::Seat(SeatId::HOST) {
            return Err(Error::NotHost);
        }

        let parsed: GameState = serde_json::from_value(snapshot.clone())
            .map_err(|_| Error::Snapshot(Rejection::MalformedSnapshot))?;
        parsed
            .check()
            .map_err(|_| Error::Snapshot(Rejection::MalformedSnapshot))?;

        channel.broadcast(Envelope::new(SeatId::HOST, Move::RestoreState(snapshot)));
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::{
        random::SeededRandom,
        room_code::RoomCode,
        state::{Phase, SongSelection},
    };

    const HOST: SeatId = SeatId::HOST;
    const ANN: SeatId = SeatId::new(1);

    #[derive(Default)]
    struct Queue(VecDeque<Envelope>);

    impl MoveChannel for Queue {
        fn broadcast(&mut self, envelope: Envelope) {
            self.0.push_back(envelope);
        }
    }

    fn replica(slot: PlayerSlot) -> Replica<SeededRandom> {
        let code: RoomCode = "QWERTY".parse().unwrap();
        Replica::new(slot, SeededRandom::new(code.seed()))
    }

    /// Delivers every queued envelope to every replica, twice
    fn deliver(queue: &mut Queue, replicas: &mut [&mut Replica<SeededRandom>]) {
        while let Some(envelope) = queue.0.pop_front() {
            for replica in replicas.iter_mut() {
                replica.receive(envelope.clone());
                replica.receive(envelope.clone());
            }
        }
    }

    fn song(video_id: &str, title: &str) -> SongSelection {
        SongSelection {
            video_id: video_id.to_string(),
            original_title: title.to_string(),
            custom_title: title.to_string(),
            thumbnail: String::new(),
            start_seconds: 0,
        }
    }

    #[test]
    fn test_replicas_converge() {
        let mut queue = Queue::default();
        let mut host = replica(HOST.into());
        let mut ann = replica(ANN.into());
        let mut watcher = replica(PlayerSlot::Spectator);

        host.dispatch(&mut queue, Move::SetPlayerName("Host".to_string()));
        ann.dispatch(&mut queue, Move::SetPlayerName("Ann".to_string()));
        host.dispatch(&mut queue, Move::StartGame);
        host.dispatch(&mut queue, Move::SetTheme("Test".to_string()));
        host.dispatch(&mut queue, Move::ConfirmTheme);
        deliver(&mut queue, &mut [&mut host, &mut ann, &mut watcher]);
        assert_eq!(host.state().phase(), Phase::SongPicking);

        ann.dispatch(&mut queue, Move::SelectSong(song("vid-ann", "Ann Song")));
        host.dispatch(&mut queue, Move::SelectSong(song("vid-host", "Host Song")));
        deliver(&mut queue, &mut [&mut host, &mut ann, &mut watcher]);
        assert_eq!(host.state().phase(), Phase::Guessing);

        let round = host.state().current_round().unwrap();
        let owner = round.current_player_id.unwrap();
        let title = round.current_song().unwrap().custom_title.clone();
        let guesser = if owner == HOST { &ann } else { &host };
        guesser.dispatch(&mut queue, Move::SubmitGuess(title));
        host.dispatch(&mut queue, Move::TickTimer);
        deliver(&mut queue, &mut [&mut host, &mut ann, &mut watcher]);

        assert_eq!(host.state(), ann.state());
        assert_eq!(host.state(), watcher.state());
        assert_eq!(host.log(), ann.log());

        let entry = &host.state().current_round().unwrap().guess_log[0];
        assert!(entry.is_correct);
        assert_eq!(
            ann.state().current_round().unwrap().guess_log[0].id,
            entry.id
        );
        assert_eq!(host.state().current_round().unwrap().current_song_index, 1);
    }

    #[test]
    fn test_duplicate_delivery_is_ignored() {
        let mut host = replica(HOST.into());
        let envelope = Envelope::new(HOST, Move::SetPlayerName("Host".to_string()));

        assert!(host.receive(envelope.clone()).is_changed());
        assert_eq!(
            host.receive(envelope),
            Outcome::Ignored(Rejection::Conflict)
        );
        assert_eq!(host.log().len(), 1);
    }

    #[test]
    fn test_spectators_cannot_dispatch() {
        let mut queue = Queue::default();
        let mut watcher = replica(PlayerSlot::Spectator);

        assert!(!watcher.dispatch(&mut queue, Move::StartGame));
        assert!(queue.0.is_empty());

        watcher.adopt_seat(ANN.into());
        assert!(watcher.dispatch(&mut queue, Move::SetPlayerName("Ann".to_string())));
        assert_eq!(queue.0[0].sender, ANN);
    }

    #[test]
    fn test_end_game_stops_dispatch() {
        let mut queue = Queue::default();
        let mut host = replica(HOST.into());
        host.dispatch(&mut queue, Move::SetPlayerName("Host".to_string()));
        deliver(&mut queue, &mut [&mut host]);

        let mut state = host.state().clone();
        state.phase = Phase::GameOver;
        let mut host = Replica::with_state(HOST.into(), state, SeededRandom::new(1));

        host.dispatch(&mut queue, Move::EndGame);
        deliver(&mut queue, &mut [&mut host]);

        assert!(host.ended());
        assert!(!host.dispatch(&mut queue, Move::RestartLobby));
    }

    #[test]
    fn test_replay_rebuilds_state() {
        let mut queue = Queue::default();
        let mut host = replica(HOST.into());
        host.dispatch(&mut queue, Move::SetPlayerName("Host".to_string()));
        host.dispatch(&mut queue, Move::StartGame);
        host.dispatch(&mut queue, Move::SetTheme("Replay".to_string()));
        deliver(&mut queue, &mut [&mut host]);

        let code: RoomCode = "QWERTY".parse().unwrap();
        let rebuilt = Replica::replay(
            ANN.into(),
            SeededRandom::new(code.seed()),
            host.log().to_vec(),
        );

        assert_eq!(rebuilt.state(), host.state());
        assert_eq!(rebuilt.log().len(), 3);
    }

    #[test]
    fn test_restore_state() {
        let mut queue = Queue::default();
        let mut source = replica(HOST.into());
        source.dispatch(&mut queue, Move::SetPlayerName("Host".to_string()));
        source.dispatch(&mut queue, Move::StartGame);
        deliver(&mut queue, &mut [&mut source]);
        let snapshot = serde_json::to_value(source.state()).unwrap();

        let mut host = replica(HOST.into());
        let mut ann = replica(ANN.into());

        assert_eq!(
            ann.restore_state(&mut queue, snapshot.clone()),
            Err(Error::NotHost)
        );
        assert_eq!(
            host.restore_state(&mut queue, serde_json::json!({ "phase": "nowhere" })),
            Err(Error::Snapshot(Rejection::MalformedSnapshot))
        );
        assert!(queue.0.is_empty());

        host.restore_state(&mut queue, snapshot).unwrap();
        deliver(&mut queue, &mut [&mut host, &mut ann]);

        assert_eq!(host.state().phase(), Phase::ThemeSelection);
        assert_eq!(host.state(), ann.state());
        assert_eq!(host.state(), source.state());
    }

    #[test]
    fn test_envelopes_from_before_a_restore_stay_dropped() {
        let mut queue = Queue::default();
        let mut host = replica(HOST.into());
        host.dispatch(&mut queue, Move::SetPlayerName("Host".to_string()));
        let early = queue.0.front().cloned().unwrap();
        deliver(&mut queue, &mut [&mut host]);

        let mut snapshot = serde_json::to_value(host.state()).unwrap();
        snapshot["players"]["0"]["name"] = serde_json::Value::from("Restored");
        host.restore_state(&mut queue, snapshot).unwrap();
        deliver(&mut queue, &mut [&mut host]);
        assert_eq!(host.log().len(), 2);

        assert_eq!(host.receive(early), Outcome::Ignored(Rejection::Conflict));
        assert_eq!(host.state().player(HOST).unwrap().name, "Restored");
        assert_eq!(host.log().len(), 2);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_move() -> impl Strategy<Value = Move> {
            prop_oneof![
                prop::sample::select(vec!["Host", "Ann", "Ben"])
                    .prop_map(|name| Move::SetPlayerName(name.to_string())),
                Just(Move::StartGame),
                Just(Move::SetTheme("Theme".to_string())),
                Just(Move::ConfirmTheme),
                (0..3usize).prop_map(|n| Move::SelectSong(song(&format!("v{n}"), &format!("t{n}")))),
                (0..3usize).prop_map(|n| Move::SubmitGuess(format!("t{n}"))),
                Just(Move::TickTimer),
                Just(Move::NextRound),
            ]
        }

        proptest! {
            #[test]
            fn test_same_order_same_state(
                moves in prop::collection::vec((0u16..3, arb_move()), 0..150),
                seed in any::<u64>(),
            ) {
                let envelopes: Vec<Envelope> = moves
                    .into_iter()
                    .map(|(sender, action)| Envelope::new(SeatId::new(sender), action))
                    .collect();

                let first = Replica::replay(HOST.into(), SeededRandom::new(seed), envelopes.clone());
                let second = Replica::replay(ANN.into(), SeededRandom::new(seed), envelopes);

                prop_assert_eq!(first.state(), second.state());
            }
        }
    }
}

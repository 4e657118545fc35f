//! Local participant identities
//!
//! Every participant keeps a [`PlayerIdentity`] per room in some local
//! key-value storage: which seat it holds, the credentials proving it, its
//! role and its display name. Peers additionally keep the set of peer seats
//! they believe to be in use, so new identities go to the lowest free seat.
//!
//! Identities are local. They are not part of the replicated [`GameState`];
//! a seat only appears there once its holder registers a name.

use std::{
    collections::{BTreeSet, HashMap},
    fmt::Display,
    str::FromStr,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_with::{DeserializeFromStr, SerializeDisplay, skip_serializing_none};
use tracing::warn;
use uuid::Uuid;

use crate::{
    constants::identity::{
        DEFAULT_PLAYER_NAME, KEY_PREFIX, PLAYER_NAME_KEY, SEAT_CLAIM_TIMEOUT_SECS,
    },
    names,
    room_code::RoomCode,
    seat::{PlayerSlot, SeatId},
    state::GameState,
};

/// String key-value storage that survives restarts
pub trait IdentityStore {
    /// Reads the value stored under `key`
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value
    fn set(&mut self, key: &str, value: String);

    /// Deletes the value stored under `key`
    fn remove(&mut self, key: &str);
}

/// An [`IdentityStore`] kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(HashMap<String, String>);

impl IdentityStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_owned(), value);
    }

    fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }
}

/// Secret proving ownership of a seat
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Credentials(Uuid);

impl Credentials {
    /// Creates new random credentials
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Credentials {
    /// Creates new random credentials (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0.simple(), f)
    }
}

impl FromStr for Credentials {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The part a participant plays in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Holds seat `0` and drives the game
    Host,
    /// Holds one of the numbered peer seats
    Peer,
    /// Watches without a seat
    Spectator,
}

/// The identity of the local participant in one room
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerIdentity {
    /// Seat held, or the spectator sentinel
    #[serde(rename = "playerID")]
    pub player_id: PlayerSlot,
    /// Proof of seat ownership, absent for spectators
    pub credentials: Option<Credentials>,
    /// Role in the room
    pub role: Role,
    /// Display name
    pub player_name: String,
}

impl PlayerIdentity {
    /// The seat held by this identity, if any
    pub fn seat(&self) -> Option<SeatId> {
        self.player_id.seat()
    }
}

/// Creates the identity of a participant watching without a seat
pub fn spectator_identity(player_name: &str) -> PlayerIdentity {
    PlayerIdentity {
        player_id: PlayerSlot::Spectator,
        credentials: None,
        role: Role::Spectator,
        player_name: player_name.to_owned(),
    }
}

fn identity_key(room: &RoomCode) -> String {
    format!("{KEY_PREFIX}.{room}")
}

fn used_key(room: &RoomCode) -> String {
    format!("{KEY_PREFIX}.{room}.used")
}

/// Identity manager for the local participant
///
/// Wraps an [`IdentityStore`] and the capacity of the rooms it manages,
/// which bounds the valid peer seats.
#[derive(Debug, Clone)]
pub struct Identities<S: IdentityStore> {
    store: S,
    max_players: usize,
}

impl<S: IdentityStore> Identities<S> {
    /// Creates a manager over `store` for rooms of `max_players` seats
    pub fn new(store: S, max_players: usize) -> Self {
        Self { store, max_players }
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Gives the underlying store back
    pub fn into_store(self) -> S {
        self.store
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let stored = self.store.get(key)?;
        match serde_json::from_str(&stored) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key, %error, "ignoring corrupt stored value");
                None
            }
        }
    }

    fn write<T: Serialize>(&mut self, key: &str, value: &T) {
        self.store.set(
            key,
            serde_json::to_string(value).expect("default serializer cannot fail"),
        );
    }

    fn used_seats(&self, room: &RoomCode) -> BTreeSet<SeatId> {
        self.read(&used_key(room)).unwrap_or_default()
    }

    fn save_used_seats(&mut self, room: &RoomCode, used: &BTreeSet<SeatId>) {
        self.write(&used_key(room), used);
    }

    fn save(&mut self, room: &RoomCode, identity: &PlayerIdentity) {
        self.write(&identity_key(room), identity);
    }

    fn is_valid(&self, role: Role, slot: PlayerSlot) -> bool {
        match (role, slot) {
            (Role::Host, PlayerSlot::Seat(seat)) => seat.is_host(),
            (Role::Peer, PlayerSlot::Seat(seat)) => {
                (SeatId::FIRST_PEER..=SeatId::last_peer(self.max_players)).contains(&seat)
            }
            (Role::Spectator, PlayerSlot::Spectator) => true,
            _ => false,
        }
    }

    /// Takes the lowest free peer seat and records it as used
    ///
    /// When every peer seat is taken, a seat derived from the number of used
    /// seats is handed out again. Two participants may then share a seat.
    fn allocate_peer(&mut self, room: &RoomCode, used: &mut BTreeSet<SeatId>) -> SeatId {
        let last = SeatId::last_peer(self.max_players);
        let seat = SeatId::peers(self.max_players)
            .find(|seat| !used.contains(seat))
            .unwrap_or_else(|| {
                let fallback = u16::try_from(used.len() + 1).unwrap_or(u16::MAX);
                SeatId::new(fallback.clamp(SeatId::FIRST_PEER.number(), last.number()))
            });

        used.insert(seat);
        self.save_used_seats(room, used);
        seat
    }

    /// The stored identity for the room
    ///
    /// A stored value that does not parse is treated as absent.
    pub fn identity(&self, room: &RoomCode) -> Option<PlayerIdentity> {
        self.read(&identity_key(room))
    }

    /// Returns the stored identity, creating or repairing it as needed
    ///
    /// A stored host stays host. A spectator `role` is treated as a peer. A
    /// stored seat outside the valid range for its role is released and
    /// replaced, together with its credentials. An empty `player_name` keeps
    /// the stored name; a new identity without one falls back to the last
    /// remembered name, then to a generated one.
    pub fn upsert_identity(
        &mut self,
        room: &RoomCode,
        role: Role,
        player_name: &str,
    ) -> PlayerIdentity {
        let role = match role {
            Role::Spectator => Role::Peer,
            role => role,
        };
        let mut used = self.used_seats(room);

        let identity = if let Some(existing) = self.identity(room) {
            let role = match existing.role {
                Role::Host => Role::Host,
                _ => role,
            };
            let mut updated = PlayerIdentity {
                role,
                player_name: if player_name.is_empty() {
                    existing.player_name.clone()
                } else {
                    player_name.to_owned()
                },
                ..existing
            };

            if !self.is_valid(updated.role, updated.player_id) {
                if let Some(seat) = updated.seat() {
                    used.remove(&seat);
                }
                updated.player_id = match updated.role {
                    Role::Host => SeatId::HOST,
                    _ => self.allocate_peer(room, &mut used),
                }
                .into();
                updated.credentials = Some(Credentials::new());
            }

            updated
        } else {
            let seat = match role {
                Role::Host => SeatId::HOST,
                _ => self.allocate_peer(room, &mut used),
            };
            let last_name = self.last_player_name().unwrap_or_default();
            PlayerIdentity {
                player_id: seat.into(),
                credentials: Some(Credentials::new()),
                role,
                player_name: names::pick_name([player_name, last_name.as_str()]),
            }
        };

        self.save(room, &identity);
        identity
    }

    /// Makes the local participant the host of the room
    ///
    /// Any peer seat held before is released. Deciding who gets promoted is
    /// left to the caller, see [`GameState::migration_candidate`].
    pub fn promote_identity_to_host(&mut self, room: &RoomCode, player_name: &str) -> PlayerIdentity {
        let existing = self.identity(room);

        if let Some(seat) = existing
            .as_ref()
            .and_then(PlayerIdentity::seat)
            .filter(|seat| !seat.is_host())
        {
            self.release_peer_id(room, seat);
        }

        let identity = PlayerIdentity {
            player_id: SeatId::HOST.into(),
            credentials: Some(Credentials::new()),
            role: Role::Host,
            player_name: names::normalize_name(player_name)
                .or_else(|| existing.map(|identity| identity.player_name))
                .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_owned()),
        };

        self.save(room, &identity);
        identity
    }

    /// Claims a peer seat for the local participant
    ///
    /// `preferred` is taken when it is a free peer seat; otherwise the lowest
    /// free seat is allocated.
    pub fn claim_peer_identity(
        &mut self,
        room: &RoomCode,
        player_name: &str,
        preferred: Option<SeatId>,
    ) -> PlayerIdentity {
        let mut used = self.used_seats(room);

        let seat = match preferred {
            Some(seat) if !used.contains(&seat) && self.is_valid(Role::Peer, seat.into()) => {
                used.insert(seat);
                self.save_used_seats(room, &used);
                seat
            }
            _ => self.allocate_peer(room, &mut used),
        };

        let identity = PlayerIdentity {
            player_id: seat.into(),
            credentials: Some(Credentials::new()),
            role: Role::Peer,
            player_name: player_name.to_owned(),
        };

        self.save(room, &identity);
        identity
    }

    /// Allocates a peer seat to hand to another participant
    ///
    /// The seat is recorded as used, but the local identity is untouched.
    pub fn assign_peer(&mut self, room: &RoomCode, player_name: &str) -> PlayerIdentity {
        let mut used = self.used_seats(room);
        let seat = self.allocate_peer(room, &mut used);

        PlayerIdentity {
            player_id: seat.into(),
            credentials: Some(Credentials::new()),
            role: Role::Peer,
            player_name: player_name.to_owned(),
        }
    }

    /// Adopts an identity handed over by [`Identities::assign_peer`]
    pub fn apply_assigned_identity(
        &mut self,
        room: &RoomCode,
        identity: PlayerIdentity,
    ) -> PlayerIdentity {
        let identity = PlayerIdentity {
            role: Role::Peer,
            player_name: names::normalize_name(&identity.player_name)
                .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_owned()),
            ..identity
        };

        if let Some(seat) = identity.seat() {
            let mut used = self.used_seats(room);
            used.insert(seat);
            self.save_used_seats(room, &used);
        }

        self.save(room, &identity);
        identity
    }

    /// Returns a peer seat to the free pool
    ///
    /// The host seat is never released.
    pub fn release_peer_id(&mut self, room: &RoomCode, seat: SeatId) {
        if seat.is_host() {
            return;
        }

        let mut used = self.used_seats(room);
        if used.remove(&seat) {
            self.save_used_seats(room, &used);
        }
    }

    /// Gives up a seat claim that was never confirmed
    ///
    /// Releases the seat and stores a spectator identity instead.
    pub fn abandon_claim(&mut self, room: &RoomCode, claim: &SeatClaim) -> PlayerIdentity {
        self.release_peer_id(room, claim.seat());

        let player_name = self
            .identity(room)
            .map_or_else(|| DEFAULT_PLAYER_NAME.to_owned(), |identity| identity.player_name);
        let identity = spectator_identity(&player_name);

        self.save(room, &identity);
        identity
    }

    /// Forgets everything stored for the room
    pub fn clear_identity(&mut self, room: &RoomCode) {
        self.store.remove(&identity_key(room));
        self.store.remove(&used_key(room));
    }

    /// The display name used last, in any room
    pub fn last_player_name(&self) -> Option<String> {
        self.store
            .get(PLAYER_NAME_KEY)
            .and_then(|name| names::normalize_name(&name))
    }

    /// Remembers a display name for the next room
    pub fn remember_player_name(&mut self, player_name: &str) {
        if let Some(name) = names::normalize_name(player_name) {
            self.store.set(PLAYER_NAME_KEY, name);
        }
    }
}

/// Search for a seat a spectator may claim
///
/// Seats that were already tried are skipped until every free seat has been
/// tried once, then the search starts over.
#[derive(Debug, Clone, Default)]
pub struct SeatSearch {
    attempted: BTreeSet<SeatId>,
}

impl SeatSearch {
    /// The next peer seat without a connected player
    ///
    /// # Returns
    ///
    /// `None` if every peer seat is occupied.
    pub fn next_free_seat(&mut self, state: &GameState) -> Option<SeatId> {
        let occupied: BTreeSet<SeatId> = state.connected_seats().collect();
        let find = |attempted: &BTreeSet<SeatId>| {
            SeatId::peers(state.max_players())
                .find(|seat| !occupied.contains(seat) && !attempted.contains(seat))
        };

        let mut candidate = find(&self.attempted);
        if candidate.is_none() && !self.attempted.is_empty() {
            self.attempted.clear();
            candidate = find(&self.attempted);
        }

        if let Some(seat) = candidate {
            self.attempted.insert(seat);
        }
        candidate
    }

    /// Makes a seat eligible again
    pub fn forget(&mut self, seat: SeatId) {
        self.attempted.remove(&seat);
    }

    /// Starts over
    pub fn reset(&mut self) {
        self.attempted.clear();
    }
}

/// State of a pending seat claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    /// Still waiting for the seat to show up connected
    Pending,
    /// The seat is connected in the game state
    Confirmed,
    /// The wait ran out
    Expired,
}

/// A bounded wait for a claimed seat to show up connected
///
/// The caller ticks the claim once per second with the latest state. Once it
/// expires, the seat should be handed back through [`Identities::abandon_claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatClaim {
    seat: SeatId,
    remaining: u32,
}

impl SeatClaim {
    /// Starts waiting on `seat` with the default timeout
    pub fn new(seat: SeatId) -> Self {
        Self::with_timeout(seat, SEAT_CLAIM_TIMEOUT_SECS)
    }

    /// Starts waiting on `seat` for `seconds` ticks
    pub fn with_timeout(seat: SeatId, seconds: u32) -> Self {
        Self {
            seat,
            remaining: seconds,
        }
    }

    /// The claimed seat
    pub fn seat(&self) -> SeatId {
        self.seat
    }

    /// Status of the claim against `state`, without using up time
    pub fn status(&self, state: &GameState) -> ClaimStatus {
        if state.player(self.seat).is_some_and(|player| player.connected) {
            ClaimStatus::Confirmed
        } else if self.remaining == 0 {
            ClaimStatus::Expired
        } else {
            ClaimStatus::Pending
        }
    }

    /// Lets one second pass and returns the new status
    pub fn tick(&mut self, state: &GameState) -> ClaimStatus {
        if self.status(state) == ClaimStatus::Pending {
            self.remaining -= 1;
        }
        self.status(state)
    }
}

//! Seat identifiers
//!
//! A seat is the stable per-room slot of a participant. Seat `0` always
//! belongs to the host, peers occupy seats `1..MAX_PLAYERS`. Spectators hold
//! no seat; they are represented by [`PlayerSlot::Spectator`].

use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::constants::room::MAX_PLAYERS;

/// A stable seat identifier, serialized as its decimal string
///
/// Seat ids order numerically, which keeps every map keyed by seat iterating
/// in the same order on every replica.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct SeatId(u16);

impl SeatId {
    /// The seat reserved for the host
    pub const HOST: SeatId = SeatId(0);
    /// The lowest seat a peer can hold
    pub const FIRST_PEER: SeatId = SeatId(1);

    /// Creates a seat id from its number
    pub const fn new(number: u16) -> Self {
        Self(number)
    }

    /// Returns the seat number
    pub fn number(self) -> u16 {
        self.0
    }

    /// Whether this is the host seat
    pub fn is_host(self) -> bool {
        self == Self::HOST
    }

    /// Whether this seat fits in a room of `max_players` seats
    pub fn fits(self, max_players: usize) -> bool {
        usize::from(self.0) < max_players
    }

    /// The highest peer seat of a room of `max_players` seats
    pub fn last_peer(max_players: usize) -> Self {
        let last = max_players.clamp(2, MAX_PLAYERS.max(2)) - 1;
        Self(u16::try_from(last).unwrap_or(u16::MAX))
    }

    /// All peer seats of a room of `max_players` seats, lowest first
    pub fn peers(max_players: usize) -> impl Iterator<Item = SeatId> {
        (Self::FIRST_PEER.0..=Self::last_peer(max_players).0).map(SeatId)
    }
}

impl Display for SeatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SeatId {
    type Err = ParseIntError;

    /// Parses a seat id from its decimal representation
    ///
    /// # Errors
    ///
    /// Returns a `ParseIntError` if the string is not a small non-negative integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The local participant's position in a room: a seat or the spectator gallery
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay, Default,
)]
pub enum PlayerSlot {
    /// Holds a seat
    Seat(SeatId),
    /// Watches without a seat
    #[default]
    Spectator,
}

impl PlayerSlot {
    /// Sentinel used when serializing [`PlayerSlot::Spectator`]
    pub const SPECTATOR: &'static str = "spectator";

    /// The held seat, if any
    pub fn seat(self) -> Option<SeatId> {
        match self {
            Self::Seat(seat) => Some(seat),
            Self::Spectator => None,
        }
    }
}

impl From<SeatId> for PlayerSlot {
    fn from(seat: SeatId) -> Self {
        Self::Seat(seat)
    }
}

impl Display for PlayerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seat(seat) => seat.fmt(f),
            Self::Spectator => f.write_str(Self::SPECTATOR),
        }
    }
}

impl FromStr for PlayerSlot {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::SPECTATOR {
            Ok(Self::Spectator)
        } else {
            Ok(Self::Seat(s.parse()?))
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_seat_id_display_and_parse() {
        assert_eq!(SeatId::HOST.to_string(), "0");
        assert_eq!(SeatId::from_str("7").unwrap(), SeatId::new(7));
        assert!(SeatId::from_str("spectator").is_err());
        assert!(SeatId::from_str("-1").is_err());
    }

    #[test]
    fn test_seat_id_orders_numerically() {
        assert!(SeatId::new(2) < SeatId::new(10));
    }

    #[test]
    fn test_seat_id_as_json_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(SeatId::new(3), 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"3":1}"#);

        let back: std::collections::BTreeMap<SeatId, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_peer_range() {
        let peers: Vec<_> = SeatId::peers(8).collect();
        assert_eq!(peers.first(), Some(&SeatId::new(1)));
        assert_eq!(peers.last(), Some(&SeatId::new(7)));
        assert_eq!(peers.len(), 7);

        assert!(SeatId::new(7).fits(8));
        assert!(!SeatId::new(8).fits(8));
    }

    #[test]
    fn test_player_slot_round_trip() {
        assert_eq!(PlayerSlot::Spectator.to_string(), "spectator");
        assert_eq!(
            PlayerSlot::from_str("spectator").unwrap(),
            PlayerSlot::Spectator
        );
        assert_eq!(
            PlayerSlot::from_str("4").unwrap(),
            PlayerSlot::Seat(SeatId::new(4))
        );
        assert_eq!(PlayerSlot::Seat(SeatId::HOST).seat(), Some(SeatId::HOST));
        assert_eq!(PlayerSlot::Spectator.seat(), None);
    }
}

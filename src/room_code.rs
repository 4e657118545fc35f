//! Room code generation and parsing
//!
//! Rooms are identified by short codes drawn from an alphabet without
//! look-alike characters, which makes them easy to read out loud. Codes are
//! entered case-insensitively and always displayed in upper case.

use std::{fmt::Display, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::constants::room_code::{ALPHABET, LENGTH};

/// A room identifier such as `K7QZ2M`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct RoomCode([u8; LENGTH]);

/// Errors that can occur when parsing a room code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The code does not have exactly [`LENGTH`] characters
    #[error("room code must have {} characters", LENGTH)]
    Length,
    /// The code contains a character outside the room code alphabet
    #[error("room code contains invalid character {0:?}")]
    Character(char),
}

impl RoomCode {
    /// Creates a new random room code
    pub fn new() -> Self {
        Self::with_rng(&mut fastrand::Rng::new())
    }

    /// Creates a room code from the given generator
    pub fn with_rng(rng: &mut fastrand::Rng) -> Self {
        Self(std::array::from_fn(|_| ALPHABET[rng.usize(..ALPHABET.len())]))
    }

    /// Derives the seed of the shared random source of this room
    ///
    /// Every replica of the room derives the same seed from the same code.
    pub fn seed(&self) -> u64 {
        self.0.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
        })
    }

    /// Returns the code as a string slice
    pub fn as_str(&self) -> &str {
        // The alphabet is ASCII, so any code is valid UTF-8
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl Default for RoomCode {
    /// Creates a new random room code (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomCode {
    type Err = Error;

    /// Parses a room code, ignoring case and surrounding whitespace
    ///
    /// # Errors
    ///
    /// Returns [`Error::Length`] for codes of the wrong length and
    /// [`Error::Character`] for characters outside the alphabet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.chars().count() != LENGTH {
            return Err(Error::Length);
        }

        let mut code = [0; LENGTH];
        for (slot, c) in code.iter_mut().zip(s.chars()) {
            let upper = c.to_ascii_uppercase();
            match u8::try_from(upper) {
                Ok(byte) if ALPHABET.contains(&byte) => *slot = byte,
                _ => return Err(Error::Character(c)),
            }
        }

        Ok(Self(code))
    }
}

//! # Showdown Game Library
//!
//! This library provides the core game logic for a peer-synchronized music
//! party game: players pick a theme, secretly choose songs, then race to
//! guess each other's songs. It holds the room state machine, the scoring and
//! title matching rules, the local identity manager and the replication shell
//! that keeps every participant's copy of the room in step.
//!
//! There is no server. Every participant applies the same moves in the same
//! order with an identically seeded random source, so every copy of the
//! [`GameState`] converges.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]

pub mod constants;

pub mod game;
pub mod identity;
pub mod leaderboard;
pub mod media;
pub mod names;
pub mod random;
pub mod room_code;
pub mod scoring;
pub mod seat;
pub mod session;
pub mod state;

pub use game::{Move, Outcome, Rejection, Transition, apply};
pub use state::{GameState, Phase};

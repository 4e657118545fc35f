//! Guess matching and point calculation
//!
//! Pure functions shared by every replica. Both are total: they never panic
//! and never consult any state beyond their arguments, so the same guess is
//! judged and scored identically everywhere.

use itertools::Itertools;
use unicode_normalization::UnicodeNormalization;

use crate::constants::scoring::{BASE_POINTS, FIRST_BONUS, MAX_SPEED_BONUS};

/// Combining diacritical marks left behind by canonical decomposition
const COMBINING_MARKS: std::ops::RangeInclusive<char> = '\u{0300}'..='\u{036f}';

/// Normalizes a title for comparison
///
/// Decomposes accented characters, drops the combining marks, lowercases and
/// trims, so that `"Café "` and `"cafe"` compare equal.
fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|c| !COMBINING_MARKS.contains(c))
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_owned()
}

/// Drops punctuation and collapses runs of whitespace from a normalized title
fn strip_punctuation(normalized: &str) -> String {
    normalized
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .join(" ")
}

/// Checks whether a guess names the given song title
///
/// The comparison ignores case, accents and surrounding whitespace. If the
/// normalized strings differ, punctuation is removed and whitespace collapsed
/// before comparing again. Titles made only of punctuation never match through
/// that second comparison.
///
/// # Examples
///
/// ```rust
/// use showdown::scoring::is_guess_correct;
///
/// assert!(is_guess_correct("Don't Stop Believin'", "dont stop believin"));
/// assert!(is_guess_correct("Café", "cafe"));
/// assert!(!is_guess_correct("Hello", "World"));
/// ```
pub fn is_guess_correct(guess: &str, answer: &str) -> bool {
    let guess = normalize(guess);
    let answer = normalize(answer);

    if guess == answer {
        return true;
    }

    let guess = strip_punctuation(&guess);
    !guess.is_empty() && guess == strip_punctuation(&answer)
}

/// Calculates the points earned by a guess
///
/// A correct guess earns [`BASE_POINTS`], plus [`FIRST_BONUS`] when it is the
/// first correct guess on the song, plus a speed bonus falling linearly from
/// [`MAX_SPEED_BONUS`] at `guess_time = 0` to nothing at `guess_time = max_time`.
///
/// Callers clamp `guess_time` to `[0, max_time]`. A time past `max_time`, or a
/// zero `max_time`, earns no speed bonus.
///
/// # Arguments
///
/// * `is_correct` - Whether the guess matched the song
/// * `guess_time` - Seconds elapsed between song start and the guess
/// * `max_time` - Playback duration of the song in seconds
/// * `is_first_correct` - Whether no other correct guess came earlier
pub fn calculate_points(
    is_correct: bool,
    guess_time: u32,
    max_time: u32,
    is_first_correct: bool,
) -> u64 {
    if !is_correct {
        return 0;
    }

    let first_bonus = if is_first_correct { FIRST_BONUS } else { 0 };

    let speed_bonus = if max_time == 0 {
        0
    } else {
        let ratio = 1. - f64::from(guess_time) / f64::from(max_time);
        (ratio * MAX_SPEED_BONUS as f64).floor().max(0.) as u64
    };

    BASE_POINTS + first_bonus + speed_bonus
}

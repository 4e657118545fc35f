//! Display name handling
//!
//! Names are free text chosen by participants. They are trimmed, capped at
//! [`MAX_NAME_LENGTH`] characters and never empty. When nobody supplied a
//! name a pet-style one is generated instead.

use heck::ToTitleCase;

use crate::constants::{identity::DEFAULT_PLAYER_NAME, room::MAX_NAME_LENGTH};

/// Cleans a requested display name
///
/// Strips surrounding (including invisible) whitespace and truncates the
/// result to [`MAX_NAME_LENGTH`] characters.
///
/// # Returns
///
/// The cleaned name, or `None` if nothing remains after trimming.
pub fn normalize_name(name: &str) -> Option<String> {
    let trimmed = rustrict::trim_whitespace(name);
    let truncated: String = trimmed.chars().take(MAX_NAME_LENGTH).collect();
    let truncated = truncated.trim_end();
    if truncated.is_empty() {
        None
    } else {
        Some(truncated.to_owned())
    }
}

/// Generates a random title-cased pet name such as "Brave Otter"
///
/// Falls back to [`DEFAULT_PLAYER_NAME`] if no pet name can be generated.
pub fn generated_name() -> String {
    petname::petname(2, " ")
        .map_or_else(|| DEFAULT_PLAYER_NAME.to_owned(), |name| name.to_title_case())
}

/// Picks the first usable name among the candidates, generating one otherwise
pub fn pick_name<'a, I: IntoIterator<Item = &'a str>>(candidates: I) -> String {
    candidates
        .into_iter()
        .find_map(normalize_name)
        .unwrap_or_else(generated_name)
}

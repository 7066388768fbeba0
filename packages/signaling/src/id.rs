//! Short random identifiers for rooms and peers.
//!
//! Identifiers are drawn uniformly from a 36 symbol lowercase alphanumeric
//! alphabet using the thread-local CSPRNG from `rand`. No collision check is
//! performed here; the id space is large relative to a room's lifetime.

use rand::Rng as _;

/// Symbols an identifier may contain.
pub const ID_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a room identifier.
pub const ROOM_ID_LENGTH: usize = 6;

/// Length of a peer identifier.
pub const PEER_ID_LENGTH: usize = 8;

/// Generate a random identifier of `len` characters.
#[must_use]
pub fn generate_id(len: usize) -> String {
    let mut rng = rand::rng();

    (0..len)
        .map(|_| char::from(ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())]))
        .collect()
}

#[must_use]
pub fn generate_room_id() -> String {
    generate_id(ROOM_ID_LENGTH)
}

#[must_use]
pub fn generate_peer_id() -> String {
    generate_id(PEER_ID_LENGTH)
}

/// Whether `value` could have been produced by [`generate_id`].
#[must_use]
pub fn is_valid_id(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| ID_ALPHABET.contains(&b))
}

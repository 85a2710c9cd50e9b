//! Registry identifier and authorization code generators

use chrono::Utc;
use rand::Rng;
use rand::seq::SliceRandom;

/// Length of generated contact ids
pub const EPP_ID_LENGTH: usize = 16;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";

/// Generate a fresh contact id for the given email
///
/// The id is 16 characters of `[a-z0-9]`: five characters taken from the
/// email (padded with `x`), five digits of the current time and six random
/// characters.
pub fn make_epp_id(email: &str) -> String {
    make_epp_id_with_rng(email, &mut rand::thread_rng())
}

/// [`make_epp_id`] with an explicit random source
pub fn make_epp_id_with_rng<R: Rng + ?Sized>(email: &str, rng: &mut R) -> String {
    let mut id: String = email
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(5)
        .collect();
    while id.len() < 5 {
        id.push('x');
    }

    let clock = Utc::now().timestamp_millis().rem_euclid(100_000);
    id.push_str(&format!("{:05}", clock));

    id.extend((0..6).map(|_| pick(ID_ALPHABET, rng)));
    id
}

/// Generate a transfer authorization code
///
/// Four uppercase letters, four lowercase letters and four digits in
/// random order.
pub fn generate_auth_info() -> String {
    generate_auth_info_with_rng(&mut rand::thread_rng())
}

/// [`generate_auth_info`] with an explicit random source
pub fn generate_auth_info_with_rng<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut chars: Vec<char> = Vec::with_capacity(12);
    for set in [UPPER, LOWER, DIGITS] {
        chars.extend((0..4).map(|_| pick(set, rng)));
    }
    chars.shuffle(rng);
    chars.into_iter().collect()
}

fn pick<R: Rng + ?Sized>(set: &[u8], rng: &mut R) -> char {
    char::from(set[rng.gen_range(0..set.len())])
}

//! Synthetic data provider backed by the `fake` crate.
//!
//! The teacher depends on `rand` but never generates synthetic fixtures
//! with it; `fake` builds directly on `rand`, so this keeps the crate's
//! existing randomness source rather than adding a second one.

use fake::faker::address::en::{CityName, StreetName};
use fake::faker::internet::en::{FreeEmail, Username};
use fake::faker::lorem::en::{Paragraph, Sentence, Word};
use fake::faker::name::en::Name;
use fake::Fake;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Mutex;

/// Per-process faker state. Real determinism is per-VU (see
/// `seeded_rng_for_vu`); this global only guards the default, unseeded
/// generator used outside a VU context (e.g. scenario `setup`).
static DEFAULT_RNG: Mutex<Option<StdRng>> = Mutex::new(None);

fn with_default_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    let mut guard = DEFAULT_RNG.lock().unwrap();
    let rng = guard.get_or_insert_with(|| StdRng::from_entropy());
    f(rng)
}

/// Deterministic per-VU seed: the configured seed XOR the VU id, so two
/// VUs in the same run never draw the same sequence but a fixed
/// `faker.seed` reproduces a whole run byte-for-byte.
pub fn seeded_rng_for_vu(configured_seed: Option<u64>, vu_id: u32) -> StdRng {
    let base = configured_seed.unwrap_or(0x5EED);
    StdRng::seed_from_u64(base ^ vu_id as u64)
}

/// Resolve a dotted faker category name (`person.name`, `internet.email`,
/// ...) to a generated string. Returns `None` for unknown categories so the
/// caller (the template engine) can surface an "unresolved reference"
/// error consistently with every other template source.
pub fn resolve(category: &str) -> Option<String> {
    with_default_rng(|rng| resolve_with(rng, category))
}

pub fn resolve_with(rng: &mut StdRng, category: &str) -> Option<String> {
    Some(match category {
        "person.name" => Name().fake_with_rng(rng),
        "internet.email" => FreeEmail().fake_with_rng(rng),
        "internet.username" => Username().fake_with_rng(rng),
        "address.city" => CityName().fake_with_rng(rng),
        "address.street" => StreetName().fake_with_rng(rng),
        "lorem.word" => Word().fake_with_rng(rng),
        "lorem.sentence" => Sentence(3..8).fake_with_rng(rng),
        "lorem.paragraph" => Paragraph(2..5).fake_with_rng(rng),
        "number.u32" => (rng.next_u32()).to_string(),
        "uuid.v4" => uuid::Uuid::new_v4().to_string(),
        "date.iso8601" => chrono::Utc::now().to_rfc3339(),
        _ => return None,
    })
}

use rand::RngCore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_categories() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(resolve_with(&mut rng, "person.name").is_some());
        assert!(resolve_with(&mut rng, "internet.email").is_some());
        assert!(resolve_with(&mut rng, "uuid.v4").is_some());
    }

    #[test]
    fn unknown_category_is_none() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(resolve_with(&mut rng, "nope.nope").is_none());
    }

    #[test]
    fn same_seed_same_vu_is_deterministic() {
        let mut a = seeded_rng_for_vu(Some(42), 3);
        let mut b = seeded_rng_for_vu(Some(42), 3);
        let va: String = Word().fake_with_rng(&mut a);
        let vb: String = Word().fake_with_rng(&mut b);
        assert_eq!(va, vb);
    }

    #[test]
    fn different_vu_same_seed_diverges() {
        let mut a = seeded_rng_for_vu(Some(42), 1);
        let mut b = seeded_rng_for_vu(Some(42), 2);
        let va: String = Sentence(3..8).fake_with_rng(&mut a);
        let vb: String = Sentence(3..8).fake_with_rng(&mut b);
        assert_ne!(va, vb);
    }
}

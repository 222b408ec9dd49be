//! Human-readable session name generation

use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::debug;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brisk", "calm", "clever", "crimson", "dusky", "eager", "fabled", "gentle", "gilded", "hidden",
    "hollow", "humble", "ivory", "jolly", "keen", "lively", "lucid", "mellow", "misty", "nimble", "noble", "olive",
    "patient", "quiet", "rapid", "restless", "rustic", "silent", "silver", "steady", "swift", "tidy", "urban", "vivid",
    "wandering", "wise", "young", "zesty",
];

const NOUNS: &[&str] = &[
    "anchor", "badger", "beacon", "birch", "canyon", "comet", "delta", "ember", "falcon", "fjord", "glacier", "grove",
    "harbor", "heron", "island", "jasper", "kestrel", "lantern", "meadow", "mesa", "nebula", "orchard", "otter",
    "pebble", "pine", "quarry", "raven", "reef", "river", "sparrow", "summit", "thicket", "tundra", "valley", "willow",
    "wren", "yarrow", "zephyr",
];

/// Generate a random adjective-noun pair such as `amber-falcon`
pub fn generate_name() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("harbor");
    let name = format!("{}-{}", adjective, noun);
    debug!(%name, "generate_name: generated");
    name
}

/// Fallback name used after repeated collisions: `adjective-noun-<unix seconds>`
pub fn timestamped_name() -> String {
    let secs = chrono::Utc::now().timestamp();
    let suffix: u16 = rand::rng().random_range(0..1000);
    // The random suffix keeps two fallbacks in the same second apart
    format!("{}-{}{:03}", generate_name(), secs, suffix)
}

/// Check that a name is safe to use as a file stem
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('-')
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

//! Join codes and the drawing topic catalog.

use rand::Rng;
use rand::seq::IndexedRandom;

/// Words join codes are built from.
pub const CODE_WORDS: [&str; 10] = [
    "SUNSET", "OCEAN", "FOREST", "MOUNTAIN", "RIVER", "DESERT", "MEADOW", "VALLEY", "CANYON",
    "ISLAND",
];

/// Topic used when the picker never chose and no shortlist exists.
pub const FREE_DRAW: &str = "Free Draw";

/// Topics the shortlist is sampled from.
pub const TOPICS: [&str; 24] = [
    "A cat astronaut",
    "Underwater city",
    "Haunted lighthouse",
    "Dragon having breakfast",
    "Robot gardener",
    "Cherry blossom festival",
    "A rainy day in Tokyo",
    "Castle in the clouds",
    "Desert caravan at night",
    "Snowman on vacation",
    "Treehouse village",
    "Pirate ship in a bottle",
    "Enchanted forest",
    "Cozy bookshop",
    "Volcano island",
    "Space diner",
    "Giant mushroom house",
    "Hot air balloon race",
    "Sleepy fox",
    "Carnival at dusk",
    "Time-traveling bicycle",
    "Frog orchestra",
    "Lost umbrella",
    "Moonlit picnic",
];

/// A join code like `SUNSET47`.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let word = CODE_WORDS.choose(rng).copied().unwrap_or(CODE_WORDS[0]);
    let number: u8 = rng.random_range(0..100);
    format!("{}{:02}", word, number)
}

/// Canonical form of a user-typed join code.
pub fn normalize_code(input: &str) -> String {
    input.trim().to_uppercase()
}

/// Sample `n` distinct topics from the catalog.
pub fn sample_topics<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<String> {
    TOPICS
        .choose_multiple(rng, n)
        .map(|topic| topic.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_format() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let code = generate_code(&mut rng);
            let (word, digits) = code.split_at(code.len() - 2);
            assert!(CODE_WORDS.contains(&word), "unexpected word in {}", code);
            assert!(digits.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  sunset07 "), "SUNSET07");
    }

    #[test]
    fn test_sample_topics_are_distinct() {
        let mut rng = rand::rng();
        let topics = sample_topics(&mut rng, 3);
        assert_eq!(topics.len(), 3);
        assert_ne!(topics[0], topics[1]);
        assert_ne!(topics[1], topics[2]);
        assert_ne!(topics[0], topics[2]);
    }
}

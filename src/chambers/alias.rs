//! Anonymous aliases handed to chamber members.

use rand::{seq::IndexedRandom, Rng};

const ADJECTIVES: [&str; 25] = [
    "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
    "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
    "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
];

const NOUNS: [&str; 24] = [
    "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
    "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
    "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
];

const COLORS: [&str; 12] = [
    "#ef4444", "#f97316", "#f59e0b", "#84cc16", "#10b981", "#14b8a6",
    "#06b6d4", "#3b82f6", "#6366f1", "#8b5cf6", "#d946ef", "#ec4899",
];

const RANDOM_TRIES: usize = 20;

pub fn random_alias<R: Rng + ?Sized>(rng: &mut R) -> String {
    // both lists are non-empty constants
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Quiet");
    let noun = NOUNS.choose(rng).copied().unwrap_or("Echo");
    format!("{adjective} {noun}")
}

pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> String {
    COLORS.choose(rng).copied().unwrap_or("#6366f1").to_owned()
}

/// An alias (and color) not yet in `taken`. After a few random misses a
/// numeric suffix guarantees uniqueness.
pub fn fresh_alias(taken: &[String]) -> (String, String) {
    let mut rng = rand::rng();
    let color = random_color(&mut rng);

    for _ in 0..RANDOM_TRIES {
        let alias = random_alias(&mut rng);
        if !taken.contains(&alias) {
            return (alias, color);
        }
    }

    let base = random_alias(&mut rng);
    let alias = (2..)
        .map(|n| format!("{base} {n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(base);
    (alias, color)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_two_words() {
        let alias = random_alias(&mut rand::rng());
        assert_eq!(alias.split(' ').count(), 2);
    }

    #[test]
    fn fresh_alias_avoids_every_taken_name() {
        let taken: Vec<String> = ADJECTIVES
            .iter()
            .flat_map(|a| NOUNS.iter().map(move |n| format!("{a} {n}")))
            .collect();
        let (alias, color) = fresh_alias(&taken);
        assert!(!taken.contains(&alias));
        assert!(color.starts_with('#'));
    }
}

//! Proposal payload generator: a hyphen-joined string of random words.
//! Payloads carry no meaning; they only make each proposal distinct.

use rand::seq::SliceRandom;
use rand::Rng;

const WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliett",
    "kilo", "lima", "mike", "november", "oscar", "papa", "quebec", "romeo", "sierra", "tango",
    "uniform", "victor", "whiskey", "xray", "yankee", "zulu", "trust", "mesh",
];

/// `count` words drawn with replacement, joined by `-`.
pub fn generate_payload<R: Rng>(rng: &mut R, count: usize) -> String {
    (0..count)
        .filter_map(|_| WORDS.choose(rng).copied())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_and_vocabulary() {
        let payload = generate_payload(&mut rand::thread_rng(), 32);
        let words: Vec<&str> = payload.split('-').collect();
        assert_eq!(words.len(), 32);
        assert!(words.iter().all(|w| WORDS.contains(w)));
    }

    #[test]
    fn test_zero_words_is_empty() {
        assert_eq!(generate_payload(&mut rand::thread_rng(), 0), "");
    }
}

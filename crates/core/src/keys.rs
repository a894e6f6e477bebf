use std::collections::VecDeque;
use std::sync::Mutex;

use rand::Rng;

use crate::domain::ticket::TicketKey;

pub const DEFAULT_KEY_PREFIX: &str = "MOCK-OPS";

pub trait TicketKeyGenerator: Send + Sync {
    fn next_key(&self) -> TicketKey;
}

/// `<PREFIX>-<n>` with `n` drawn uniformly from `100000..=999999`. The prefix is
/// upper-cased so keys match the upper-cased lookups of `/ticket show`.
#[derive(Clone, Debug)]
pub struct RandomKeyGenerator {
    prefix: String,
}

impl RandomKeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into().trim().to_ascii_uppercase() }
    }
}

impl Default for RandomKeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl TicketKeyGenerator for RandomKeyGenerator {
    fn next_key(&self) -> TicketKey {
        let number: u32 = rand::thread_rng().gen_range(100_000..=999_999);
        TicketKey(format!("{}-{number}", self.prefix))
    }
}

/// Hands out a fixed list of keys, then repeats the last one.
#[derive(Debug, Default)]
pub struct SequenceKeyGenerator {
    keys: Mutex<VecDeque<String>>,
}

impl SequenceKeyGenerator {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { keys: Mutex::new(keys.into_iter().map(Into::into).collect()) }
    }
}

impl TicketKeyGenerator for SequenceKeyGenerator {
    fn next_key(&self) -> TicketKey {
        let mut keys = match self.keys.lock() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = if keys.len() > 1 { keys.pop_front() } else { keys.front().cloned() };
        TicketKey(key.unwrap_or_else(|| format!("{DEFAULT_KEY_PREFIX}-100000")))
    }
}

#[cfg(test)]
mod tests {
    use super::{RandomKeyGenerator, SequenceKeyGenerator, TicketKeyGenerator};

    #[test]
    fn random_keys_use_prefix_and_six_digits() {
        let generator = RandomKeyGenerator::new("OPS");
        for _ in 0..50 {
            let key = generator.next_key().0;
            let number = key.strip_prefix("OPS-").expect("prefix");
            assert_eq!(number.len(), 6);
            let value: u32 = number.parse().expect("numeric");
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[test]
    fn lowercase_prefix_is_upper_cased() {
        let key = RandomKeyGenerator::new("ops").next_key().0;
        assert!(key.starts_with("OPS-"), "unexpected key {key}");
    }

    #[test]
    fn default_prefix_is_mock_ops() {
        assert!(RandomKeyGenerator::default().next_key().0.starts_with("MOCK-OPS-"));
    }

    #[test]
    fn sequence_repeats_last_key() {
        let generator = SequenceKeyGenerator::new(["K-1", "K-2"]);
        assert_eq!(generator.next_key().0, "K-1");
        assert_eq!(generator.next_key().0, "K-2");
        assert_eq!(generator.next_key().0, "K-2");
    }
}

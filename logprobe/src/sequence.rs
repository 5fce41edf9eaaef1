//! Random alphanumeric payloads for loopback rounds.

use rand::{Rng, SeedableRng, distributions::Alphanumeric, rngs::StdRng};

/// The 62 symbols a payload is drawn from.
pub const ALPHABET: &[u8; 62] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Produces fixed-length random payloads.
///
/// Each generator owns its random source; nothing is shared process-wide.
#[derive(Debug, Clone)]
pub struct SequenceGenerator<R = StdRng> {
    rng: R,
}

impl SequenceGenerator<StdRng> {
    /// Create a generator seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a reproducible generator.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SequenceGenerator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> SequenceGenerator<R> {
    /// Wrap an existing random source.
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Generate `length` symbols drawn uniformly from [`ALPHABET`].
    ///
    /// A length of zero yields an empty string.
    pub fn generate(&mut self, length: usize) -> String {
        (&mut self.rng)
            .sample_iter(Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_exact_length() {
        let mut generator = SequenceGenerator::seeded(1);
        for length in [1, 10, 100, 1024] {
            assert_eq!(generator.generate(length).chars().count(), length);
        }
    }

    #[test]
    fn test_generate_zero_length_is_empty() {
        let mut generator = SequenceGenerator::seeded(1);
        assert!(generator.generate(0).is_empty());
    }

    #[test]
    fn test_generate_uses_alphanumeric_alphabet() {
        let mut generator = SequenceGenerator::new();
        let payload = generator.generate(4096);
        assert!(payload.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn test_generate_covers_all_classes() {
        let mut generator = SequenceGenerator::seeded(42);
        let payload = generator.generate(4096);
        assert!(payload.bytes().any(|b| b.is_ascii_lowercase()));
        assert!(payload.bytes().any(|b| b.is_ascii_uppercase()));
        assert!(payload.bytes().any(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_seeded_generators_are_reproducible() {
        let mut a = SequenceGenerator::seeded(7);
        let mut b = SequenceGenerator::seeded(7);
        assert_eq!(a.generate(32), b.generate(32));
    }

    #[test]
    fn test_consecutive_payloads_differ() {
        let mut generator = SequenceGenerator::seeded(7);
        let first = generator.generate(32);
        let second = generator.generate(32);
        assert_ne!(first, second);
    }

    #[test]
    fn test_alphabet_has_62_distinct_symbols() {
        let mut symbols = ALPHABET.to_vec();
        symbols.sort_unstable();
        symbols.dedup();
        assert_eq!(symbols.len(), 62);
    }
}

//! Linear-time exact substring search (Knuth-Morris-Pratt).
//!
//! The loopback verdict is decided here: a round passes iff the transmitted
//! payload occurs as a contiguous run inside the echoed text. The logger
//! firmware wraps echoed data in a timestamp prefix and a trailing newline, so
//! containment, not equality, is the check.
//!
//! ```rust
//! use logprobe::matcher::{build_failure_table, search_str};
//!
//! assert_eq!(build_failure_table(b"abcdabca").as_slice(), &[0, 0, 0, 0, 1, 2, 0, 1]);
//! assert_eq!(search_str("ab", "xxxabxx"), Some(3));
//! assert_eq!(search_str("ab", "xxxxxx"), None);
//! ```

use std::borrow::Borrow;

/// Partial-match table of a pattern.
///
/// Entry `i` is the length of the longest proper prefix of `pattern[..=i]`
/// that is also a suffix of it. Always as long as the pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FailureTable(Vec<usize>);

impl FailureTable {
    /// Table entries.
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Number of entries (equals the pattern length).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table belongs to an empty pattern.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Build the failure table of `pattern` in O(n).
pub fn build_failure_table<T: PartialEq>(pattern: &[T]) -> FailureTable {
    let mut table = vec![0; pattern.len()];
    let mut j = 0;

    for i in 1..pattern.len() {
        while j > 0 && pattern[i] != pattern[j] {
            j = table[j - 1];
        }
        if pattern[i] == pattern[j] {
            j += 1;
        }
        table[i] = j;
    }

    FailureTable(table)
}

/// A pattern paired with its precomputed failure table.
#[derive(Debug, Clone)]
pub struct Matcher<'p, T> {
    pattern: &'p [T],
    table: FailureTable,
}

impl<'p, T: PartialEq> Matcher<'p, T> {
    /// Precompute the failure table for `pattern`.
    pub fn new(pattern: &'p [T]) -> Self {
        Self {
            pattern,
            table: build_failure_table(pattern),
        }
    }

    /// The pattern being searched for.
    pub fn pattern(&self) -> &[T] {
        self.pattern
    }

    /// The precomputed failure table.
    pub fn table(&self) -> &FailureTable {
        &self.table
    }

    /// Index of the leftmost occurrence of the pattern in `text`.
    ///
    /// The text is consumed once and never revisited, so any iterator works
    /// (a `&[T]`, a `str::chars()`, a byte stream). Stops at the first match.
    /// An empty pattern matches at index 0.
    pub fn find<I>(&self, text: I) -> Option<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let pattern = self.pattern;
        if pattern.is_empty() {
            return Some(0);
        }

        let table = self.table.as_slice();
        let mut j = 0;

        for (i, item) in text.into_iter().enumerate() {
            let item = item.borrow();
            while j > 0 && *item != pattern[j] {
                j = table[j - 1];
            }
            if *item == pattern[j] {
                j += 1;
            }
            if j == pattern.len() {
                return Some(i + 1 - j);
            }
        }

        None
    }
}

/// Leftmost index of `pattern` in `text`, or `None`.
pub fn search<T: PartialEq>(pattern: &[T], text: &[T]) -> Option<usize> {
    Matcher::new(pattern).find(text)
}

/// Leftmost char index of `pattern` in `text`, or `None`.
///
/// Indices count Unicode scalar values, not bytes.
pub fn search_str(pattern: &str, text: &str) -> Option<usize> {
    let pattern: Vec<char> = pattern.chars().collect();
    Matcher::new(&pattern).find(text.chars())
}

/// Case-insensitive containment check used for advertised BLE names.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    search_str(&needle.to_lowercase(), &haystack.to_lowercase()).is_some()
}

//! String similarity measures used to build the similarity relations that duplicate detection
//! and schema matching consume.
//!
//! Every measure returns a value between 0 (nothing in common) and 1 (identical), and works
//! either on whole strings or on sequences of tokens.

use std::collections::{HashMap, HashSet};
use strsim::{damerau_levenshtein, generic_damerau_levenshtein, generic_levenshtein, levenshtein};

/// A symmetric similarity between strings.
pub trait SimilarityMeasure: Send + Sync {
    /// Similarity of two strings.
    fn similarity(&self, left: &str, right: &str) -> f64;

    /// Similarity of two token sequences.
    fn token_similarity(&self, left: &[String], right: &[String]) -> f64;
}

/// Splits strings into tokens for the token-based measures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tokenizer {
    /// Whitespace-separated words.
    Words,
    /// Overlapping runs of this many characters. Strings shorter than that become one token.
    QGrams(usize),
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::QGrams(2)
    }
}

impl Tokenizer {
    /// Splits `s` into tokens.
    ///
    /// ```
    /// use uccprofile::Tokenizer;
    ///
    /// assert_eq!(Tokenizer::Words.tokenize(" new  york "), ["new", "york"]);
    /// assert_eq!(Tokenizer::QGrams(2).tokenize("abcd"), ["ab", "bc", "cd"]);
    /// assert_eq!(Tokenizer::QGrams(3).tokenize("ab"), ["ab"]);
    /// assert!(Tokenizer::QGrams(2).tokenize("").is_empty());
    /// ```
    pub fn tokenize(&self, s: &str) -> Vec<String> {
        match *self {
            Tokenizer::Words => s.split_whitespace().map(str::to_owned).collect(),
            Tokenizer::QGrams(q) => {
                let chars: Vec<char> = s.chars().collect();
                if chars.is_empty() {
                    Vec::new()
                } else if chars.len() <= q.max(1) {
                    vec![s.to_owned()]
                } else {
                    chars.windows(q.max(1)).map(|w| w.iter().collect()).collect()
                }
            }
        }
    }
}

/// Edit distance similarity: one minus the edit distance divided by the longer length.
///
/// With `damerau` set, swapping two adjacent characters (or tokens) counts as a single edit.
/// If either side is empty the similarity is 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct Levenshtein {
    /// Count adjacent transpositions as one edit.
    pub damerau: bool,
}

fn normalize(distance: usize, left: usize, right: usize) -> f64 {
    if left == 0 || right == 0 {
        return 0.0;
    }
    1.0 - distance as f64 / left.max(right) as f64
}

impl SimilarityMeasure for Levenshtein {
    /// ```
    /// use uccprofile::{Levenshtein, SimilarityMeasure};
    ///
    /// let plain = Levenshtein { damerau: false };
    /// let swaps = Levenshtein { damerau: true };
    /// assert_eq!(plain.similarity("kitten", "sitting"), 1.0 - 3.0 / 7.0);
    /// assert_eq!(plain.similarity("abcd", "abdc"), 0.5);
    /// assert_eq!(swaps.similarity("abcd", "abdc"), 0.75);
    /// assert_eq!(plain.similarity("", "abc"), 0.0);
    /// ```
    fn similarity(&self, left: &str, right: &str) -> f64 {
        let distance = if self.damerau {
            damerau_levenshtein(left, right)
        } else {
            levenshtein(left, right)
        };
        normalize(distance, left.chars().count(), right.chars().count())
    }

    fn token_similarity(&self, left: &[String], right: &[String]) -> f64 {
        let distance = if self.damerau {
            generic_damerau_levenshtein(left, right)
        } else {
            let left: Vec<&String> = left.iter().collect();
            let right: Vec<&String> = right.iter().collect();
            generic_levenshtein(&left, &right)
        };
        normalize(distance, left.len(), right.len())
    }
}

/// Jaccard similarity of the tokens of two strings.
///
/// With set semantics repeated tokens count once, and identical token sets score 1. With bag
/// semantics every occurrence counts: the shared occurrences are divided by all occurrences on
/// both sides, so identical bags score 1/2. Two empty inputs score 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct Jaccard {
    /// How strings are split before comparing.
    pub tokenizer: Tokenizer,
    /// Count repeated tokens.
    pub bag: bool,
}

fn counts(tokens: &[String]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }
    counts
}

impl SimilarityMeasure for Jaccard {
    fn similarity(&self, left: &str, right: &str) -> f64 {
        self.token_similarity(&self.tokenizer.tokenize(left), &self.tokenizer.tokenize(right))
    }

    /// ```
    /// use uccprofile::{Jaccard, SimilarityMeasure, Tokenizer};
    ///
    /// let words = |s: &str| Tokenizer::Words.tokenize(s);
    /// let set = Jaccard { tokenizer: Tokenizer::Words, bag: false };
    /// let bag = Jaccard { tokenizer: Tokenizer::Words, bag: true };
    ///
    /// assert_eq!(set.token_similarity(&words("a b c"), &words("b c d")), 0.5);
    /// assert_eq!(set.token_similarity(&words("a a b"), &words("a b")), 1.0);
    /// assert_eq!(bag.token_similarity(&words("a a b"), &words("a b")), 0.4);
    /// assert_eq!(bag.token_similarity(&words("a b"), &words("b a")), 0.5);
    /// ```
    fn token_similarity(&self, left: &[String], right: &[String]) -> f64 {
        if self.bag {
            let total = left.len() + right.len();
            if total == 0 {
                return 0.0;
            }
            let right = counts(right);
            let shared: usize = counts(left)
                .into_iter()
                .map(|(token, n)| n.min(right.get(token).copied().unwrap_or(0)))
                .sum();
            shared as f64 / total as f64
        } else {
            let left: HashSet<&String> = left.iter().collect();
            let right: HashSet<&String> = right.iter().collect();
            let union = left.union(&right).count();
            if union == 0 {
                return 0.0;
            }
            left.intersection(&right).count() as f64 / union as f64
        }
    }
}

/// Estimates the set Jaccard similarity from MinHash signatures.
///
/// Each of the `hashes` seeded hash functions keeps the smallest hash of any token; the estimate
/// is the fraction of functions on which both signatures agree. More functions give a tighter
/// estimate.
#[derive(Clone, Copy, Debug)]
pub struct MinHash {
    tokenizer: Tokenizer,
    hashes: usize,
}

impl MinHash {
    /// Uses `hashes` hash functions, at least one.
    pub fn new(tokenizer: Tokenizer, hashes: usize) -> Self {
        MinHash {
            tokenizer,
            hashes: hashes.max(1),
        }
    }

    /// The MinHash signature of `tokens`, or `None` if there are no tokens.
    pub fn signature(&self, tokens: &[String]) -> Option<Vec<u64>> {
        if tokens.is_empty() {
            return None;
        }
        let signature = (0..self.hashes as u64)
            .map(|seed| {
                tokens
                    .iter()
                    .map(|token| {
                        seahash::hash_seeded(token.as_bytes(), seed, !seed, seed ^ 0x9e37, 0x5bd1)
                    })
                    .min()
                    .unwrap_or(u64::MAX)
            })
            .collect();
        Some(signature)
    }
}

impl Default for MinHash {
    fn default() -> Self {
        MinHash::new(Tokenizer::default(), 64)
    }
}

impl SimilarityMeasure for MinHash {
    fn similarity(&self, left: &str, right: &str) -> f64 {
        self.token_similarity(&self.tokenizer.tokenize(left), &self.tokenizer.tokenize(right))
    }

    fn token_similarity(&self, left: &[String], right: &[String]) -> f64 {
        match (self.signature(left), self.signature(right)) {
            (Some(left), Some(right)) => {
                let agree = left.iter().zip(right.iter()).filter(|(a, b)| a == b).count();
                agree as f64 / self.hashes as f64
            }
            _ => 0.0,
        }
    }
}

/// The measures selectable by name, e.g. from the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Measure {
    /// [`Levenshtein`] without transpositions.
    Levenshtein,
    /// [`Levenshtein`] with transpositions.
    Damerau,
    /// [`Jaccard`] over character bigrams, set semantics.
    Jaccard,
    /// [`Jaccard`] over character bigrams, bag semantics.
    BagJaccard,
    /// [`MinHash`] over character bigrams.
    MinHash,
}

impl Measure {
    /// Builds the measure with its default settings.
    pub fn build(self) -> Box<dyn SimilarityMeasure> {
        match self {
            Measure::Levenshtein => Box::new(Levenshtein { damerau: false }),
            Measure::Damerau => Box::new(Levenshtein { damerau: true }),
            Measure::Jaccard => Box::new(Jaccard::default()),
            Measure::BagJaccard => Box::new(Jaccard {
                bag: true,
                ..Jaccard::default()
            }),
            Measure::MinHash => Box::new(MinHash::default()),
        }
    }
}

//! Dictionary-assisted estimate of how long a brute-force attack on a
//! password would take.
//!
//! The longest dictionary word found in the password is treated as a single
//! symbol drawn from the dictionary, the remaining characters as symbols
//! drawn from the union of the character classes they use.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use tracing::info;

use crate::error::Result;

/// Guesses per second assumed for the attacker.
pub const CRACKS_PER_SECOND: f64 = 500_000.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

const DIGITS: u32 = 11;
const LOWERCASE: u32 = 26;
const UPPERCASE: u32 = 26;
const EXTENDED_LATIN: u32 = 13;
const PUNCTUATION: u32 = 30;
const OTHER: u32 = 118;
/// Space assumed for any text containing a NUL character.
const MAXIMAL: u32 = 255;

const PUNCTUATION_CHARS: &str = "!\"#$%&'()*+,-./:;<=>?@[]^_{|}~";

static CACHE: LazyLock<Mutex<HashMap<PathBuf, Arc<Dictionary>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

/// Word list sorted by descending length.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    words: Vec<Vec<char>>,
    /// word length -> position of the first word of that length
    first_of_length: BTreeMap<usize, usize>,
}

impl Dictionary {
    /// Builds a dictionary from words. Blank entries are skipped and words
    /// are compared case-insensitively.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut words: Vec<Vec<char>> = words
            .into_iter()
            .map(|w| w.as_ref().trim().chars().map(fold).collect::<Vec<_>>())
            .filter(|w| !w.is_empty())
            .collect();
        words.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut first_of_length = BTreeMap::new();
        for (position, word) in words.iter().enumerate() {
            first_of_length.entry(word.len()).or_insert(position);
        }

        Self {
            words,
            first_of_length,
        }
    }

    /// Reads a word list with one word per line.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let dictionary = Self::from_words(text.lines());
        info!(
            path = %path.display(),
            words = dictionary.len(),
            "loaded password dictionary"
        );
        Ok(dictionary)
    }

    /// Returns the dictionary for `path`, loading it on first use.
    ///
    /// Entries are keyed by path and never refreshed. Concurrent first loads
    /// of the same path are serialized.
    pub fn cached(path: &Path) -> Result<Arc<Self>> {
        let mut cache = CACHE.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dictionary) = cache.get(path) {
            return Ok(Arc::clone(dictionary));
        }
        let dictionary = Arc::new(Self::load(path)?);
        cache.insert(path.to_path_buf(), Arc::clone(&dictionary));
        Ok(dictionary)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The longest word contained in `password`, lowercased.
    pub fn find_longest_word(&self, password: &str) -> Option<String> {
        let folded: Vec<char> = password.chars().map(fold).collect();
        let (_, &start) = self.first_of_length.range(..=folded.len()).next_back()?;

        self.words[start..]
            .iter()
            .find(|word| position_of(&folded, word).is_some())
            .map(|word| word.iter().collect())
    }

    fn words_with_length_at_most(&self, length: usize) -> usize {
        match self.first_of_length.range(..=length).next_back() {
            Some((_, &start)) => self.words.len() - start,
            None => 0,
        }
    }

    /// Estimated days an attacker needs to guess `password`.
    pub fn days_to_crack(&self, password: &str) -> f64 {
        let chars: Vec<char> = password.chars().collect();
        let longest: Vec<char> = self
            .find_longest_word(password)
            .map(|w| w.chars().collect())
            .unwrap_or_default();

        let rest = remove_first(&chars, &longest);
        let space = f64::from(char_class_space(&rest));
        let length = i32::try_from(rest.len()).unwrap_or(i32::MAX);
        let words = self.words_with_length_at_most(longest.len()).max(1) as f64;
        let positions = if longest.is_empty() {
            chars.len()
        } else {
            chars.len() - longest.len() + 1
        };

        space.powi(length) * words * positions as f64 / CRACKS_PER_SECOND / SECONDS_PER_DAY
    }
}

/// Position of the first case-insensitive occurrence of `word`.
fn position_of(folded: &[char], word: &[char]) -> Option<usize> {
    if word.is_empty() || word.len() > folded.len() {
        return None;
    }
    folded.windows(word.len()).position(|window| window == word)
}

fn remove_first(chars: &[char], word: &[char]) -> Vec<char> {
    let folded: Vec<char> = chars.iter().copied().map(fold).collect();
    match position_of(&folded, word) {
        Some(at) => chars[..at]
            .iter()
            .chain(&chars[at + word.len()..])
            .copied()
            .collect(),
        None => chars.to_vec(),
    }
}

#[derive(Default)]
struct Classes {
    digit: bool,
    lower: bool,
    upper: bool,
    extended: bool,
    punctuation: bool,
    other: bool,
}

/// Sum of the sizes of the character classes used in `chars`.
pub fn char_class_space(chars: &[char]) -> u32 {
    let mut classes = Classes::default();
    for &c in chars {
        match c {
            '\0' => return MAXIMAL,
            '0'..='9' => classes.digit = true,
            'a'..='z' => classes.lower = true,
            'A'..='Z' => classes.upper = true,
            '\u{00C0}'..='\u{024F}' if c.is_alphabetic() => classes.extended = true,
            c if PUNCTUATION_CHARS.contains(c) => classes.punctuation = true,
            _ => classes.other = true,
        }
    }

    [
        (classes.digit, DIGITS),
        (classes.lower, LOWERCASE),
        (classes.upper, UPPERCASE),
        (classes.extended, EXTENDED_LATIN),
        (classes.punctuation, PUNCTUATION),
        (classes.other, OTHER),
    ]
    .iter()
    .filter(|(present, _)| *present)
    .map(|(_, size)| size)
    .sum()
}

/// Drops every cached dictionary.
pub fn clear_cache() {
    CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

/// Coarse rating of a days-to-crack estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    VeryWeak,
    Weak,
    Fair,
    Strong,
    VeryStrong,
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strength::VeryWeak => "very weak",
            Strength::Weak => "weak",
            Strength::Fair => "fair",
            Strength::Strong => "strong",
            Strength::VeryStrong => "very strong",
        })
    }
}

pub fn rating(days: f64) -> Strength {
    match days {
        d if d < 1.0 => Strength::VeryWeak,
        d if d < 30.0 => Strength::Weak,
        d if d < 365.0 => Strength::Fair,
        d if d < 36_500.0 => Strength::Strong,
        _ => Strength::VeryStrong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    fn dictionary() -> Dictionary {
        Dictionary::from_words(["pass", "word", "password", "dragon", "abc", "  ", ""])
    }

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn dictionary_word_ranks_below_random_password() {
        let dict = dictionary();
        assert!(dict.days_to_crack("password") < dict.days_to_crack("Xk9#mQ2!vL"));
        assert_eq!(rating(dict.days_to_crack("password")), Strength::VeryWeak);
    }

    #[test]
    fn longest_contained_word_wins_case_insensitively() {
        let dict = dictionary();
        assert_eq!(dict.len(), 5);
        assert_eq!(dict.find_longest_word("MyPassWord1").as_deref(), Some("password"));
        assert_eq!(dict.find_longest_word("xxwordxx").as_deref(), Some("word"));
        assert_eq!(dict.find_longest_word("pas"), None);
        assert_eq!(dict.find_longest_word(""), None);
    }

    #[test]
    fn estimate_follows_formula() {
        let dict = dictionary();
        // rest "1": Z = 11, L = 1; W = words of length <= 3 = 1; P = 4 - 3 + 1
        let expected = 11.0 * 1.0 * 2.0 / CRACKS_PER_SECOND / SECONDS_PER_DAY;
        assert!((dict.days_to_crack("abc1") - expected).abs() < 1e-15);

        // no word: Z = 26, L = 3, W = 1, P = 3
        let expected = 26f64.powi(3) * 3.0 / CRACKS_PER_SECOND / SECONDS_PER_DAY;
        assert!((dict.days_to_crack("xyz") - expected).abs() < 1e-12);
    }

    #[test]
    fn empty_dictionary_is_pure_brute_force() {
        let dict = Dictionary::default();
        assert!(dict.is_empty());
        let expected = 26f64.powi(2) * 2.0 / CRACKS_PER_SECOND / SECONDS_PER_DAY;
        assert!((dict.days_to_crack("ab") - expected).abs() < 1e-12);
    }

    #[test]
    fn character_classes() {
        assert_eq!(char_class_space(&chars("")), 0);
        assert_eq!(char_class_space(&chars("0")), 11);
        assert_eq!(char_class_space(&chars("aZ")), 52);
        assert_eq!(char_class_space(&chars("ä")), 13);
        assert_eq!(char_class_space(&chars("~")), 30);
        assert_eq!(char_class_space(&chars("€")), 118);
        assert_eq!(char_class_space(&chars("\\")), 118);
        assert_eq!(char_class_space(&chars("a\0")), 255);
        assert_eq!(char_class_space(&chars("Xk9#mQ2!vL")), 93);
        assert_eq!(PUNCTUATION_CHARS.chars().count(), 30);
    }

    #[test]
    fn only_first_occurrence_is_removed() {
        assert_eq!(remove_first(&chars("abXabc"), &chars("ab")), chars("Xabc"));
        assert_eq!(remove_first(&chars("ABab"), &chars("ab")), chars("ab"));
        assert_eq!(remove_first(&chars("xyz"), &chars("ab")), chars("xyz"));
    }

    #[test]
    fn ratings() {
        assert_eq!(rating(0.5), Strength::VeryWeak);
        assert_eq!(rating(1.0), Strength::Weak);
        assert_eq!(rating(100.0), Strength::Fair);
        assert_eq!(rating(1_000.0), Strength::Strong);
        assert_eq!(rating(f64::INFINITY), Strength::VeryStrong);
        assert!(Strength::Weak < Strength::Strong);
    }

    #[test]
    fn load_trims_and_lowercases() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words.txt");
        fs::write(&path, "Dragon\r\n\n  Secret \nsun\n").unwrap();

        let loaded = Dictionary::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.find_longest_word("MYSECRET").as_deref(), Some("secret"));
    }

    // One test owns the process-wide cache so clearing it cannot race.
    #[test]
    fn cache_is_keyed_by_path_until_cleared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words.txt");
        fs::write(&path, "alpha\nbeta\ngamma\n").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                thread::spawn(move || Dictionary::cached(&path).unwrap())
            })
            .collect();
        let loaded: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(loaded.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));

        fs::write(&path, "changed\n").unwrap();
        let again = Dictionary::cached(&path).unwrap();
        assert!(Arc::ptr_eq(&loaded[0], &again));
        assert_eq!(again.len(), 3);

        clear_cache();
        assert_eq!(Dictionary::cached(&path).unwrap().len(), 1);
    }

    #[test]
    fn missing_dictionary_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(Dictionary::cached(&dir.path().join("none.txt")).is_err());
    }
}

//! Text canonicalization and blocking keys.
//!
//! `normalize` maps surface variants of a name onto one canonical form:
//! compatibility-normalized (NFKC), lowercased, stripped of diacritics and
//! punctuation, with whitespace collapsed. `grams` cuts a canonical form into
//! padded character n-grams that feed the blocking index. Both functions are
//! pure and locale-independent.

use std::collections::BTreeSet;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Default blocking gram size.
pub const DEFAULT_GRAM_SIZE: usize = 3;

const PAD_START: char = '^';
const PAD_END: char = '$';

/// Apostrophe-like characters are dropped without splitting the word, so
/// `O'Brien` and `OBrien` meet.
fn is_elided(c: char) -> bool {
    matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{02BC}' | '`')
}

/// Canonicalizes a label or alias.
///
/// Empty or whitespace-only input, and input made only of punctuation,
/// yields an empty string. The result is a fixed point:
/// `normalize(&normalize(x)) == normalize(x)`.
///
/// # Examples
///
/// ```
/// use kyroql_resolve::resolution::normalize;
///
/// assert_eq!(normalize("Sidney  Gottlieb."), "sidney gottlieb");
/// assert_eq!(normalize("  Café Müller "), "cafe muller");
/// assert_eq!(normalize(" \t "), "");
/// ```
#[must_use]
pub fn normalize(text: &str) -> String {
    let folded: String = text.nfkc().flat_map(char::to_lowercase).collect();

    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for c in folded.nfd().filter(|c| !is_combining_mark(*c)) {
        if is_elided(c) {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }

    out.nfc().collect()
}

/// Raw comparison form for names that normalize to nothing.
///
/// Keeps punctuation and symbols so that, for example, two nodes labelled
/// `"???"` can still be paired by the unblockable fallback.
#[must_use]
pub fn fallback_form(text: &str) -> String {
    text.nfkc()
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Padded character n-grams of a canonical form.
///
/// The form is wrapped in start/end markers that `normalize` never emits,
/// then every window of `k` characters becomes a key. A padded form shorter
/// than `k` is used whole. Empty input yields no grams. `k == 0` is treated
/// as 1.
///
/// # Examples
///
/// ```
/// use kyroql_resolve::resolution::grams;
///
/// let keys: Vec<String> = grams("abc", 3).into_iter().collect();
/// assert_eq!(keys, vec!["^ab", "abc", "bc$"]);
/// assert!(grams("", 3).is_empty());
/// ```
#[must_use]
pub fn grams(canonical: &str, k: usize) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if canonical.is_empty() {
        return out;
    }

    let k = k.max(1);
    let padded: Vec<char> = std::iter::once(PAD_START)
        .chain(canonical.chars())
        .chain(std::iter::once(PAD_END))
        .collect();

    if padded.len() <= k {
        out.insert(padded.iter().collect());
        return out;
    }

    for window in padded.windows(k) {
        out.insert(window.iter().collect());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "Sidney Gottlieb",
        "Sidney  Gottlieb.",
        "Dr. Gottlieb",
        "  CAFÉ  Müller ",
        "O'Brien",
        "O\u{2019}Brien",
        "Ｓｉｄｎｅｙ",
        "ﬁnance",
        "İstanbul",
        "Straße",
        "São Paulo — Brazil",
        "Ⅻ century",
        "한국어",
        "C.I.A.",
        "???",
        "",
        " \t\n ",
    ];

    #[test]
    fn normalization_is_idempotent() {
        for sample in SAMPLES {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not a fixed point for {sample:?}");
        }
    }

    #[test]
    fn collapses_case_punctuation_and_whitespace() {
        assert_eq!(normalize("Sidney Gottlieb"), "sidney gottlieb");
        assert_eq!(normalize("Sidney  Gottlieb."), "sidney gottlieb");
        assert_eq!(normalize("Dr. Gottlieb"), "dr gottlieb");
        assert_eq!(normalize("C.I.A."), "c i a");
        assert_eq!(normalize("São Paulo — Brazil"), "sao paulo brazil");
    }

    #[test]
    fn strips_diacritics_and_compatibility_forms() {
        assert_eq!(normalize("  CAFÉ  Müller "), "cafe muller");
        assert_eq!(normalize("Ｓｉｄｎｅｙ"), "sidney");
        assert_eq!(normalize("ﬁnance"), "finance");
        assert_eq!(normalize("İstanbul"), "istanbul");
    }

    #[test]
    fn apostrophes_do_not_split_words() {
        assert_eq!(normalize("O'Brien"), "obrien");
        assert_eq!(normalize("O\u{2019}Brien"), "obrien");
    }

    #[test]
    fn empty_and_punctuation_only_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \t\n "), "");
        assert_eq!(normalize("???"), "");
        assert_eq!(fallback_form("  ??? "), "???");
        assert_eq!(fallback_form("A  b"), "a b");
    }

    #[test]
    fn grams_are_padded_windows() {
        let g = grams("ab", 3);
        assert_eq!(g.into_iter().collect::<Vec<_>>(), vec!["^ab", "ab$"]);

        let short = grams("a", 5);
        assert_eq!(short.into_iter().collect::<Vec<_>>(), vec!["^a$"]);

        assert!(grams("", 3).is_empty());
    }

    #[test]
    fn shared_substring_implies_shared_gram() {
        let a = grams(&normalize("Sidney Gottlieb"), 3);
        let b = grams(&normalize("Gottlieb Institute"), 3);
        assert!(a.contains("ott"));
        assert!(!a.is_disjoint(&b));
    }

    #[test]
    fn grams_count_characters_not_bytes() {
        let g = grams("ñu", 3);
        assert_eq!(g.into_iter().collect::<Vec<_>>(), vec!["^ñu", "ñu$"]);
    }
}

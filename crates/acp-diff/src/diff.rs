//! Word- and character-level alignment
//!
//! [`diff_words`] aligns two versions of a passage token by token (words
//! and whitespace runs are both tokens) with a longest-common-subsequence
//! table. [`diff_chars`] aligns two words positionally.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+|\S+").expect("valid regex"));

/// Classification of one aligned slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Unchanged,
    Changed,
    Added,
    Removed,
}

/// One aligned token
///
/// | kind | `old_word` | `new_word` |
/// |---|---|---|
/// | `Unchanged` | token | same token |
/// | `Changed` | old token | new token |
/// | `Added` | `None` | new token |
/// | `Removed` | old token | `None` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordDiff {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub old_word: Option<String>,
    pub new_word: Option<String>,
    /// Visible slot index after merging
    pub position: usize,
}

impl WordDiff {
    /// Whether this slot is pure whitespace on both sides
    #[must_use]
    pub fn is_whitespace(&self) -> bool {
        let blank = |w: &Option<String>| w.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.old_word) && blank(&self.new_word)
    }
}

/// One aligned character within a word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharDiff {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub old_char: Option<char>,
    pub new_char: Option<char>,
    pub position: usize,
}

/// Split text into alternating word and whitespace tokens
///
/// Concatenating the tokens reproduces the input exactly.
#[must_use]
pub fn tokenize(text: &str) -> Vec<&str> {
    TOKEN_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Align two passages word by word
///
/// Equal tokens are always matched first while backtracking from the end.
/// When the table scores tie, see [`insertion_wins_tie`]. A `Removed`
/// immediately followed by an `Added` is merged into one `Changed` slot and
/// positions are renumbered.
#[must_use]
pub fn diff_words(old_text: &str, new_text: &str) -> Vec<WordDiff> {
    let old = tokenize(old_text);
    let new = tokenize(new_text);
    let table = LcsTable::build(&old, &new);
    merge_replacements(table.backtrack(&old, &new))
}

/// Tie-break rule for LCS backtracking
///
/// `skip_new` is the table score after consuming a token from the new text
/// (an insertion), `skip_old` after consuming one from the old text (a
/// deletion). Insertion wins ties, which fixes the output for ambiguous
/// alignments so identical inputs always animate identically.
#[inline]
#[must_use]
pub const fn insertion_wins_tie(skip_new: u32, skip_old: u32) -> bool {
    skip_new >= skip_old
}

/// Align two words character by character, by index
///
/// No LCS: the shorter word is padded with absent characters.
#[must_use]
pub fn diff_chars(old_word: &str, new_word: &str) -> Vec<CharDiff> {
    let old: Vec<char> = old_word.chars().collect();
    let new: Vec<char> = new_word.chars().collect();
    let len = old.len().max(new.len());

    (0..len)
        .map(|position| {
            let old_char = old.get(position).copied();
            let new_char = new.get(position).copied();
            let kind = match (old_char, new_char) {
                (Some(a), Some(b)) if a == b => ChangeKind::Unchanged,
                (Some(_), Some(_)) => ChangeKind::Changed,
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (None, None) => unreachable!("position is below the longer length"),
            };
            CharDiff {
                kind,
                old_char,
                new_char,
                position,
            }
        })
        .collect()
}

/// Rebuild the new text (`new_word ?? old_word`, skipping removals)
#[must_use]
pub fn reconstruct_new(diff: &[WordDiff]) -> String {
    diff.iter()
        .filter(|d| d.kind != ChangeKind::Removed)
        .filter_map(|d| d.new_word.as_deref().or(d.old_word.as_deref()))
        .collect()
}

/// Rebuild the old text (`old_word ?? new_word`, skipping additions)
#[must_use]
pub fn reconstruct_old(diff: &[WordDiff]) -> String {
    diff.iter()
        .filter(|d| d.kind != ChangeKind::Added)
        .filter_map(|d| d.old_word.as_deref().or(d.new_word.as_deref()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit<'a> {
    Keep(&'a str),
    Insert(&'a str),
    Delete(&'a str),
}

/// Row-major `(old.len() + 1) x (new.len() + 1)` LCS length table
struct LcsTable {
    cols: usize,
    cells: Vec<u32>,
}

impl LcsTable {
    fn build(old: &[&str], new: &[&str]) -> Self {
        let cols = new.len() + 1;
        let mut cells = vec![0u32; (old.len() + 1) * cols];

        for i in 1..=old.len() {
            for j in 1..=new.len() {
                cells[i * cols + j] = if old[i - 1] == new[j - 1] {
                    cells[(i - 1) * cols + (j - 1)] + 1
                } else {
                    cells[(i - 1) * cols + j].max(cells[i * cols + (j - 1)])
                };
            }
        }

        Self { cols, cells }
    }

    #[inline]
    fn at(&self, i: usize, j: usize) -> u32 {
        self.cells[i * self.cols + j]
    }

    /// Walk from the bottom-right corner; returns edits in forward order
    fn backtrack<'a>(&self, old: &[&'a str], new: &[&'a str]) -> Vec<Edit<'a>> {
        let (mut i, mut j) = (old.len(), new.len());
        let mut edits = Vec::with_capacity(i.max(j));

        while i > 0 || j > 0 {
            if i > 0 && j > 0 && old[i - 1] == new[j - 1] {
                edits.push(Edit::Keep(old[i - 1]));
                i -= 1;
                j -= 1;
            } else if j > 0 && (i == 0 || insertion_wins_tie(self.at(i, j - 1), self.at(i - 1, j))) {
                edits.push(Edit::Insert(new[j - 1]));
                j -= 1;
            } else {
                edits.push(Edit::Delete(old[i - 1]));
                i -= 1;
            }
        }

        edits.reverse();
        edits
    }
}

fn merge_replacements(edits: Vec<Edit<'_>>) -> Vec<WordDiff> {
    let mut out = Vec::with_capacity(edits.len());
    let mut iter = edits.into_iter().peekable();

    while let Some(edit) = iter.next() {
        let (kind, old_word, new_word) = match edit {
            Edit::Keep(w) => (ChangeKind::Unchanged, Some(w), Some(w)),
            Edit::Insert(w) => (ChangeKind::Added, None, Some(w)),
            Edit::Delete(old) => match iter.peek() {
                Some(Edit::Insert(new)) => {
                    let new = *new;
                    iter.next();
                    (ChangeKind::Changed, Some(old), Some(new))
                }
                _ => (ChangeKind::Removed, Some(old), None),
            },
        };
        out.push(WordDiff {
            kind,
            old_word: old_word.map(str::to_owned),
            new_word: new_word.map(str::to_owned),
            position: out.len(),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn kinds(diff: &[WordDiff]) -> Vec<ChangeKind> {
        diff.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn tokenize_keeps_whitespace_tokens() {
        assert_eq!(tokenize("a  b\nc"), vec!["a", "  ", "b", "\n", "c"]);
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn single_substitution_is_changed() {
        let diff = diff_words("the quick fox", "the slow fox");
        use ChangeKind::*;
        assert_eq!(kinds(&diff), vec![Unchanged, Unchanged, Changed, Unchanged, Unchanged]);
        assert_eq!(diff[2].old_word.as_deref(), Some("quick"));
        assert_eq!(diff[2].new_word.as_deref(), Some("slow"));
    }

    #[test]
    fn spacing_changes_are_diffable() {
        let diff = diff_words("a b", "a   b");
        assert_eq!(diff[1].kind, ChangeKind::Changed);
        assert!(diff[1].is_whitespace());
    }

    #[test]
    fn pure_addition_and_removal() {
        use ChangeKind::*;
        assert_eq!(kinds(&diff_words("", "hi")), vec![Added]);
        assert_eq!(kinds(&diff_words("hi", "")), vec![Removed]);
        assert!(diff_words("", "").is_empty());
    }

    #[test]
    fn insertion_wins_ties() {
        assert!(insertion_wins_tie(1, 1));
        assert!(insertion_wins_tie(2, 1));
        assert!(!insertion_wins_tie(1, 2));

        // Ambiguous swap: the fixed rule keeps the old "b" and re-adds "a" after it
        use ChangeKind::*;
        let diff = diff_words("a b", "b a");
        assert_eq!(kinds(&diff), vec![Removed, Removed, Unchanged, Added, Added]);
        assert_eq!(diff[2].old_word.as_deref(), Some("b"));
    }

    #[test]
    fn positions_are_sequential_after_merge() {
        let diff = diff_words("one two three", "one 2 three four");
        for (i, d) in diff.iter().enumerate() {
            assert_eq!(d.position, i);
        }
    }

    #[test]
    fn char_diff_pads_shorter_word() {
        use ChangeKind::*;
        let diff = diff_chars("cat", "cart");
        assert_eq!(kinds_c(&diff), vec![Unchanged, Unchanged, Changed, Added]);
        assert_eq!(diff[3].old_char, None);
        assert_eq!(diff[3].new_char, Some('t'));

        let diff = diff_chars("hello", "he");
        assert_eq!(kinds_c(&diff), vec![Unchanged, Unchanged, Removed, Removed, Removed]);
    }

    #[test]
    fn char_diff_handles_multibyte() {
        let diff = diff_chars("café", "cafe");
        assert_eq!(diff.len(), 4);
        assert_eq!(diff[3].kind, ChangeKind::Changed);
    }

    fn kinds_c(diff: &[CharDiff]) -> Vec<ChangeKind> {
        diff.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn serializes_with_type_tag() {
        let diff = diff_words("a", "b");
        let json = serde_json::to_value(&diff[0]).unwrap();
        assert_eq!(json["type"], "changed");
        assert_eq!(json["oldWord"], "a");
        assert_eq!(json["newWord"], "b");
    }

    fn passage() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                "[a-e]{1,4}".prop_map(|s| s),
                Just(" ".to_string()),
                Just("  ".to_string()),
                Just("\n".to_string()),
            ],
            0..24,
        )
        .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn prop_identity_is_all_unchanged(text in passage()) {
            let diff = diff_words(&text, &text);
            prop_assert_eq!(diff.len(), tokenize(&text).len());
            prop_assert!(diff.iter().all(|d| d.kind == ChangeKind::Unchanged));
            prop_assert_eq!(reconstruct_new(&diff), text);
        }

        #[test]
        fn prop_reconstructs_both_sides(old in passage(), new in passage()) {
            let diff = diff_words(&old, &new);
            prop_assert_eq!(reconstruct_new(&diff), new);
            prop_assert_eq!(reconstruct_old(&diff), old);
        }

        #[test]
        fn prop_deterministic(old in passage(), new in passage()) {
            prop_assert_eq!(diff_words(&old, &new), diff_words(&old, &new));
        }

        #[test]
        fn prop_no_unmerged_replacements(old in passage(), new in passage()) {
            let diff = diff_words(&old, &new);
            for pair in diff.windows(2) {
                prop_assert!(!(pair[0].kind == ChangeKind::Removed && pair[1].kind == ChangeKind::Added));
            }
        }

        #[test]
        fn prop_char_diff_covers_longer_word(a in "[a-z]{0,10}", b in "[a-z]{0,10}") {
            let diff = diff_chars(&a, &b);
            prop_assert_eq!(diff.len(), a.chars().count().max(b.chars().count()));
            let rebuilt: String = diff.iter().filter_map(|d| d.new_char).collect();
            prop_assert_eq!(rebuilt, b);
        }
    }
}

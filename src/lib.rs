//! Fuzzy, context-aware search-and-replace for approximately specified text.
//!
//! `mreplace` takes an "old" text fragment and a "new" text fragment and edits
//! a document snapshot with them. Unlike a plain `str::replace`, the old text
//! does not have to match byte-for-byte: indentation may have drifted, and for
//! longer blocks only the first and last lines need to line up. The engine
//! refuses to guess, though. If the region it finds occurs more than once, the
//! edit is rejected as ambiguous and the caller is asked for more context.
//!
//! This makes it a good fit for applying edits written by people (or models)
//! who quoted the document from memory rather than copying it exactly.
//!
//! ## Getting Started
//!
//! ```rust
//! use mreplace::{replace, MatchStrategy, ReplaceError};
//!
//! let content = "fn main() {\n    println!(\"Hello, world!\");\n}\n";
//!
//! // The quoted region is indented differently from the document.
//! let old = "fn main() {\nprintln!(\"Hello, world!\");\n}";
//! let new = "fn main() {\n    println!(\"Hello, mreplace!\");\n}";
//!
//! let replacement = replace(content, old, new, false).unwrap();
//! assert_eq!(replacement.strategy, MatchStrategy::LineTrimmed);
//! assert_eq!(
//!     replacement.new_content,
//!     "fn main() {\n    println!(\"Hello, mreplace!\");\n}\n"
//! );
//!
//! // Regions that occur more than once are never edited blindly.
//! let content = "Hello, World!\nHello, again!\n";
//! assert_eq!(
//!     replace(content, "Hello", "Hi", false),
//!     Err(ReplaceError::AmbiguousMatch)
//! );
//! ```
//!
//! ## Key Concepts
//!
//! ### The Matching Cascade
//!
//! Four [`Matcher`]s run in a fixed order. Each proposes *candidates*: exact
//! substrings of the content, always sliced out by byte offset so that the
//! text that gets replaced is exactly the text that was found.
//!
//! 1.  [`ExactMatcher`]: the old text occurs literally.
//! 2.  [`LineTrimmedMatcher`]: every line matches once leading and trailing
//!     whitespace is ignored.
//! 3.  [`BlockAnchorMatcher`]: the first and last lines match (trimmed) and the
//!     interior is scored with a normalized edit distance.
//! 4.  [`MultiOccurrenceMatcher`]: lists every literal occurrence, so that a
//!     pattern which is present but ambiguous is reported as such.
//!
//! The [`StrategyCoordinator`] counts how often each candidate's text occurs.
//! The first candidate that occurs exactly once is replaced (or, with
//! `replace_all`, the first candidate that occurs at all is replaced
//! everywhere). If candidates were found but all were ambiguous, the result is
//! [`ReplaceError::AmbiguousMatch`]; if nothing was found it is
//! [`ReplaceError::NotFound`].
//!
//! ### Documents on Disk
//!
//! The engine itself is a pure function over strings. [`DocumentStore`] is the
//! thin layer that reads a snapshot from a directory, runs the engine and writes
//! the result back, serializing edits per document so that concurrent callers
//! cannot overwrite each other.
//!
//! ```rust
//! use mreplace::{DocumentStore, EditRequest};
//! use std::fs;
//! use tempfile::tempdir;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempdir()?;
//! fs::write(dir.path().join("greeting.txt"), "Hello, World!\nGoodbye!\n")?;
//!
//! let store = DocumentStore::new(dir.path());
//! let request = EditRequest::new("Hello, World!", "Hi there!");
//! let outcome = store.replace_text("greeting.txt", &request, false)?;
//!
//! assert!(outcome.diff.is_none());
//! assert_eq!(store.fetch_content("greeting.txt")?, "Hi there!\nGoodbye!\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! ### `parallel`
//!
//! - **Enabled by default.**
//! - Scores competing block-anchor candidates in parallel using
//!   [`rayon`](https://crates.io/crates/rayon). The chosen candidate is the same
//!   as with sequential scoring.
//! - Disable it with `default-features = false` for targets without threads.
use log::{debug, info, trace, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use similar::udiff::unified_diff;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use walkdir::WalkDir;

// --- Error Types ---

/// The reason an edit could not be applied to a snapshot.
///
/// All variants are terminal for the call: the content is never partially
/// modified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplaceError {
    /// The old and new text are identical, so the edit would be a no-op.
    #[error("old_string and new_string must be different")]
    InvalidInput,
    /// No matcher found the old text anywhere in the content.
    #[error("old_string not found in content")]
    NotFound,
    /// The old text was found, but every candidate occurs more than once.
    #[error(
        "Found multiple matches for old_string. Provide more surrounding lines in old_string to identify the correct match."
    )]
    AmbiguousMatch,
}

/// Errors raised by [`DocumentStore`] operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The document identifier resolves to a location outside the store root.
    #[error("Path '{0}' resolves outside the document root. Aborting for security.")]
    PathTraversal(PathBuf),
    /// No document exists under the given identifier.
    #[error("Document not found: {0}")]
    DocumentNotFound(PathBuf),
    #[error("Permission denied for path: {path:?}")]
    PermissionDenied { path: PathBuf },
    /// The identifier resolves to a directory or another non-file entry.
    #[error("Document path is not a regular file: {path:?}")]
    NotAFile { path: PathBuf },
    #[error("I/O error while processing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The engine rejected the edit. The document was left untouched.
    #[error("Edit rejected for {path:?}: {source}")]
    Edit {
        path: PathBuf,
        #[source]
        source: ReplaceError,
    },
}

// --- Options ---

/// Options controlling how an edit is resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplaceOptions {
    /// Replace every occurrence of the matched text instead of requiring a
    /// single unambiguous occurrence.
    pub replace_all: bool,
    /// Minimum interior similarity for a block-anchor match when exactly one
    /// anchor pair exists. The default of `0.0` accepts any such block.
    pub single_candidate_threshold: f64,
    /// Minimum interior similarity for the best block-anchor match when
    /// several anchor pairs compete.
    pub multiple_candidates_threshold: f64,
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self {
            replace_all: false,
            single_candidate_threshold: 0.0,
            multiple_candidates_threshold: 0.3,
        }
    }
}

impl ReplaceOptions {
    /// Creates a new builder for `ReplaceOptions`.
    ///
    /// # Example
    ///
    /// ```
    /// # use mreplace::ReplaceOptions;
    /// let options = ReplaceOptions::builder()
    ///     .replace_all(true)
    ///     .multiple_candidates_threshold(0.5)
    ///     .build();
    ///
    /// assert!(options.replace_all);
    /// assert_eq!(options.single_candidate_threshold, 0.0);
    /// assert_eq!(options.multiple_candidates_threshold, 0.5);
    /// ```
    pub fn builder() -> ReplaceOptionsBuilder {
        ReplaceOptionsBuilder::default()
    }
}

/// A builder for creating `ReplaceOptions`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceOptionsBuilder {
    replace_all: Option<bool>,
    single_candidate_threshold: Option<f64>,
    multiple_candidates_threshold: Option<f64>,
}

impl ReplaceOptionsBuilder {
    pub fn replace_all(mut self, replace_all: bool) -> Self {
        self.replace_all = Some(replace_all);
        self
    }

    /// Sets the similarity required when a single anchor pair is found.
    pub fn single_candidate_threshold(mut self, threshold: f64) -> Self {
        self.single_candidate_threshold = Some(threshold);
        self
    }

    /// Sets the similarity required of the best of several anchor pairs.
    pub fn multiple_candidates_threshold(mut self, threshold: f64) -> Self {
        self.multiple_candidates_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> ReplaceOptions {
        let default = ReplaceOptions::default();
        ReplaceOptions {
            replace_all: self.replace_all.unwrap_or(default.replace_all),
            single_candidate_threshold: self
                .single_candidate_threshold
                .unwrap_or(default.single_candidate_threshold),
            multiple_candidates_threshold: self
                .multiple_candidates_threshold
                .unwrap_or(default.multiple_candidates_threshold),
        }
    }
}

// --- Data Structures ---

/// Identifies the matcher that produced the text that was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStrategy {
    /// The old text occurs literally in the content.
    Exact,
    /// Lines match once leading and trailing whitespace is ignored.
    LineTrimmed,
    /// First and last lines match; the interior was scored for similarity.
    BlockAnchor,
    /// One of several literal occurrences.
    MultiOccurrence,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::LineTrimmed => "line-trimmed",
            MatchStrategy::BlockAnchor => "block-anchor",
            MatchStrategy::MultiOccurrence => "multi-occurrence",
        };
        f.write_str(name)
    }
}

/// A region of the content proposed by a [`Matcher`].
///
/// `text` always borrows from the content it was found in, so splicing it
/// back at `offset` reproduces the content byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCandidate<'a> {
    /// The 1-based line on which the candidate starts.
    pub start_line: usize,
    /// The 1-based line on which the candidate ends.
    pub end_line: usize,
    /// The byte offset of `text` within the content.
    pub offset: usize,
    /// The exact text of the region.
    pub text: &'a str,
}

impl<'a> MatchCandidate<'a> {
    /// Builds a candidate for the `len` bytes of `content` starting at `offset`.
    fn located(content: &'a str, offset: usize, len: usize) -> Self {
        let start_line = content[..offset].matches('\n').count() + 1;
        Self::starting_on(content, offset, len, start_line)
    }

    /// Like [`MatchCandidate::located`], for callers that already know the
    /// line on which `offset` falls.
    fn starting_on(content: &'a str, offset: usize, len: usize, start_line: usize) -> Self {
        let text = &content[offset..offset + len];
        let spanned = text.strip_suffix('\n').unwrap_or(text);
        Self {
            start_line,
            end_line: start_line + spanned.matches('\n').count(),
            offset,
            text,
        }
    }

    /// The byte range of the candidate within the content.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.text.len()
    }
}

/// The outcome of resolving a pattern against a snapshot without editing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult<'a> {
    /// Exactly one region matched.
    Unique(MatchCandidate<'a>),
    /// Candidates were found, but none of them occurs only once.
    Ambiguous,
    /// Nothing matched.
    NotFound,
}

/// Describes what a successful edit changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementKind {
    /// A single region was replaced.
    Single {
        /// Byte offset of the replaced region in the original content.
        offset: usize,
        /// Length in bytes of the replaced region.
        replaced_len: usize,
        /// 1-based line on which the replaced region started.
        start_line: usize,
    },
    /// Every occurrence of the matched text was replaced.
    All { occurrences: usize },
}

/// The result of a successful edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// The full content after the edit.
    pub new_content: String,
    pub kind: ReplacementKind,
    /// The matcher whose candidate was used.
    pub strategy: MatchStrategy,
}

impl Replacement {
    /// A human-readable summary of the edit.
    ///
    /// # Example
    ///
    /// ```
    /// # use mreplace::replace;
    /// let single = replace("a\nb\n", "b", "c", false).unwrap();
    /// assert_eq!(single.message(), "Replaced 1 occurrence at line 2.");
    ///
    /// let all = replace("a b a", "a", "c", true).unwrap();
    /// assert_eq!(all.message(), "Replaced all 2 occurrences.");
    /// ```
    pub fn message(&self) -> String {
        match self.kind {
            ReplacementKind::Single { start_line, .. } => {
                format!("Replaced 1 occurrence at line {}.", start_line)
            }
            ReplacementKind::All { occurrences: 1 } => "Replaced all 1 occurrence.".to_string(),
            ReplacementKind::All { occurrences } => {
                format!("Replaced all {} occurrences.", occurrences)
            }
        }
    }
}

// --- Similarity Scoring ---

/// Returns the Levenshtein distance between two strings.
///
/// Distances are counted in characters, so multi-byte characters cost one
/// edit each.
///
/// # Example
///
/// ```
/// # use mreplace::edit_distance;
/// assert_eq!(edit_distance("kitten", "sitting"), 3);
/// assert_eq!(edit_distance("", "abc"), 3);
/// assert_eq!(edit_distance("café", "cafe"), 1);
/// ```
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            let deletion = previous[j + 1] + 1;
            let insertion = current[j] + 1;
            current[j + 1] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Similarity of two lines in `[0, 1]`, derived from their edit distance.
///
/// Returns `None` when both lines are empty, since there is nothing to compare.
///
/// # Example
///
/// ```
/// # use mreplace::line_similarity;
/// assert_eq!(line_similarity("abcd", "abce"), Some(0.75));
/// assert_eq!(line_similarity("same", "same"), Some(1.0));
/// assert_eq!(line_similarity("", ""), None);
/// ```
pub fn line_similarity(a: &str, b: &str) -> Option<f64> {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return None;
    }
    Some(1.0 - edit_distance(a, b) as f64 / longest as f64)
}

// --- Line Normalization ---

/// A single line of a snapshot, without its terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub text: &'a str,
    /// Byte offset of the first character of the line.
    pub start: usize,
}

impl<'a> Line<'a> {
    /// The line with leading and trailing whitespace removed. Only used for
    /// comparison; extracted text is never trimmed.
    pub fn trimmed(&self) -> &'a str {
        self.text.trim()
    }
}

/// The lines of a snapshot, with the byte offsets needed to slice regions
/// back out of it.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    content: &'a str,
    lines: Vec<Line<'a>>,
}

impl<'a> LineIndex<'a> {
    /// Splits `content` on `\n`. A content ending in `\n` has an empty last line.
    pub fn new(content: &'a str) -> Self {
        let mut start = 0;
        let lines = content
            .split('\n')
            .map(|text| {
                let line = Line { text, start };
                start += text.len() + 1;
                line
            })
            .collect();
        Self { content, lines }
    }

    pub fn lines(&self) -> &[Line<'a>] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Byte range covering lines `start..=end` (0-based), including the
    /// terminators between them but not the one after `end`.
    ///
    /// # Example
    ///
    /// ```
    /// # use mreplace::LineIndex;
    /// let content = "one\ntwo\nthree\n";
    /// let index = LineIndex::new(content);
    /// assert_eq!(&content[index.span(0, 1)], "one\ntwo");
    /// assert_eq!(&content[index.span(2, 2)], "three");
    /// ```
    pub fn span(&self, start: usize, end: usize) -> Range<usize> {
        let last = &self.lines[end];
        self.lines[start].start..last.start + last.text.len()
    }

    /// The candidate spanning lines `start..=end` (0-based).
    pub fn candidate(&self, start: usize, end: usize) -> MatchCandidate<'a> {
        let range = self.span(start, end);
        MatchCandidate {
            start_line: start + 1,
            end_line: end + 1,
            offset: range.start,
            text: &self.content[range],
        }
    }
}

/// Splits a pattern into lines, dropping the empty line left by a trailing
/// terminator.
///
/// # Example
///
/// ```
/// # use mreplace::pattern_lines;
/// assert_eq!(pattern_lines("a\nb\n"), vec!["a", "b"]);
/// assert_eq!(pattern_lines("a\nb"), vec!["a", "b"]);
/// assert!(pattern_lines("").is_empty());
/// ```
pub fn pattern_lines(pattern: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = pattern.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

// --- Matchers ---

/// A strategy that proposes regions of the content matching a pattern.
///
/// Implementations only locate text; deciding whether a candidate is safe to
/// edit is left to the [`StrategyCoordinator`].
pub trait Matcher {
    /// Which strategy this matcher implements.
    fn strategy(&self) -> MatchStrategy;

    /// Returns the candidates for `pattern` in `content`, in document order.
    fn find_candidates<'a>(&self, content: &'a str, pattern: &str) -> Vec<MatchCandidate<'a>>;
}

/// Proposes the pattern itself when it occurs literally.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl Matcher for ExactMatcher {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::Exact
    }

    fn find_candidates<'a>(&self, content: &'a str, pattern: &str) -> Vec<MatchCandidate<'a>> {
        if pattern.is_empty() {
            return Vec::new();
        }
        content
            .find(pattern)
            .map(|offset| MatchCandidate::located(content, offset, pattern.len()))
            .into_iter()
            .collect()
    }
}

/// Matches multi-line windows whose lines are equal once trimmed.
///
/// # Example
///
/// ```
/// # use mreplace::{LineTrimmedMatcher, Matcher};
/// let content = "a\n    x = 1;\n    y = 2;\nb";
/// let candidates = LineTrimmedMatcher.find_candidates(content, "x = 1;\ny = 2;\n");
///
/// assert_eq!(candidates.len(), 1);
/// assert_eq!(candidates[0].text, "    x = 1;\n    y = 2;");
/// assert_eq!((candidates[0].start_line, candidates[0].end_line), (2, 3));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LineTrimmedMatcher;

impl Matcher for LineTrimmedMatcher {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::LineTrimmed
    }

    fn find_candidates<'a>(&self, content: &'a str, pattern: &str) -> Vec<MatchCandidate<'a>> {
        let wanted: Vec<&str> = pattern_lines(pattern).into_iter().map(str::trim).collect();
        let index = LineIndex::new(content);
        if wanted.is_empty() || wanted.len() > index.len() {
            return Vec::new();
        }

        index
            .lines()
            .windows(wanted.len())
            .enumerate()
            .filter(|(_, window)| {
                window
                    .iter()
                    .map(Line::trimmed)
                    .eq(wanted.iter().copied())
            })
            .map(|(i, _)| index.candidate(i, i + wanted.len() - 1))
            .collect()
    }
}

/// Matches blocks by their first and last lines, scoring the lines between.
///
/// Only patterns of three or more lines qualify. For each content line equal
/// (trimmed) to the pattern's first line, the nearest later line equal to the
/// pattern's last line closes the block, provided at least one line lies in
/// between.
#[derive(Debug, Clone, Copy)]
pub struct BlockAnchorMatcher {
    pub single_candidate_threshold: f64,
    pub multiple_candidates_threshold: f64,
}

impl Default for BlockAnchorMatcher {
    fn default() -> Self {
        Self::from_options(&ReplaceOptions::default())
    }
}

impl BlockAnchorMatcher {
    pub fn from_options(options: &ReplaceOptions) -> Self {
        Self {
            single_candidate_threshold: options.single_candidate_threshold,
            multiple_candidates_threshold: options.multiple_candidates_threshold,
        }
    }

    /// Finds `(start, end)` line pairs (0-based) bounded by the anchors.
    fn anchor_pairs(lines: &[Line<'_>], first: &str, last: &str) -> Vec<(usize, usize)> {
        lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.trimmed() == first)
            .filter_map(|(i, _)| {
                (i + 2..lines.len())
                    .find(|&j| lines[j].trimmed() == last)
                    .map(|j| (i, j))
            })
            .collect()
    }
}

/// Average similarity of the interior lines of `block` against those of
/// `wanted`. Blocks without interior lines score a perfect 1.0.
fn interior_similarity(wanted: &[&str], block: &[Line<'_>]) -> f64 {
    let interior = wanted.len().min(block.len()).saturating_sub(2);
    if interior == 0 {
        return 1.0;
    }
    let total: f64 = (1..=interior)
        .filter_map(|j| line_similarity(wanted[j].trim(), block[j].trimmed()))
        .sum();
    total / interior as f64
}

impl Matcher for BlockAnchorMatcher {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::BlockAnchor
    }

    fn find_candidates<'a>(&self, content: &'a str, pattern: &str) -> Vec<MatchCandidate<'a>> {
        let wanted = pattern_lines(pattern);
        if wanted.len() < 3 {
            trace!("      Block-anchor skipped: pattern has fewer than 3 lines.");
            return Vec::new();
        }

        let index = LineIndex::new(content);
        let lines = index.lines();
        let first = wanted[0].trim();
        let last = wanted[wanted.len() - 1].trim();
        let pairs = Self::anchor_pairs(lines, first, last);
        trace!("      Block-anchor pairs (0-based lines): {:?}", pairs);

        let (start, end) = match pairs.as_slice() {
            [] => return Vec::new(),
            [(start, end)] => {
                let similarity = interior_similarity(&wanted, &lines[*start..=*end]);
                if similarity < self.single_candidate_threshold {
                    debug!(
                        "    Single anchor block at line {} (similarity {:.3}) is below threshold {:.3}.",
                        start + 1,
                        similarity,
                        self.single_candidate_threshold
                    );
                    return Vec::new();
                }
                debug!(
                    "    Single anchor block at lines {}-{} (similarity {:.3}).",
                    start + 1,
                    end + 1,
                    similarity
                );
                (*start, *end)
            }
            _ => {
                #[cfg(feature = "parallel")]
                let scores: Vec<f64> = pairs
                    .par_iter()
                    .map(|&(start, end)| interior_similarity(&wanted, &lines[start..=end]))
                    .collect();
                #[cfg(not(feature = "parallel"))]
                let scores: Vec<f64> = pairs
                    .iter()
                    .map(|&(start, end)| interior_similarity(&wanted, &lines[start..=end]))
                    .collect();

                // Strict comparison keeps the earliest block on ties.
                let mut best = 0;
                for (i, &score) in scores.iter().enumerate() {
                    trace!(
                        "        Anchor block at lines {}-{} scored {:.3}",
                        pairs[i].0 + 1,
                        pairs[i].1 + 1,
                        score
                    );
                    if score > scores[best] {
                        best = i;
                    }
                }

                if scores[best] < self.multiple_candidates_threshold {
                    debug!(
                        "    Best of {} anchor blocks scored {:.3}, below threshold {:.3}.",
                        pairs.len(),
                        scores[best],
                        self.multiple_candidates_threshold
                    );
                    return Vec::new();
                }
                debug!(
                    "    Best of {} anchor blocks is at lines {}-{} (similarity {:.3}).",
                    pairs.len(),
                    pairs[best].0 + 1,
                    pairs[best].1 + 1,
                    scores[best]
                );
                pairs[best]
            }
        };

        vec![index.candidate(start, end)]
    }
}

/// Proposes every literal, non-overlapping occurrence of the pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiOccurrenceMatcher;

impl Matcher for MultiOccurrenceMatcher {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::MultiOccurrence
    }

    fn find_candidates<'a>(&self, content: &'a str, pattern: &str) -> Vec<MatchCandidate<'a>> {
        if pattern.is_empty() {
            return Vec::new();
        }
        // Line numbers advance from the previous occurrence.
        let mut line = 1;
        let mut scanned = 0;
        content
            .match_indices(pattern)
            .map(|(offset, found)| {
                line += content[scanned..offset].matches('\n').count();
                scanned = offset;
                MatchCandidate::starting_on(content, offset, found.len(), line)
            })
            .collect()
    }
}

// --- Coordination ---

/// How a pattern resolved against a snapshot.
#[derive(Debug)]
enum Resolution<'a> {
    Single {
        candidate: MatchCandidate<'a>,
        offset: usize,
        strategy: MatchStrategy,
    },
    All {
        target: &'a str,
        occurrences: usize,
        strategy: MatchStrategy,
    },
    Ambiguous,
    NotFound,
}

/// Runs the matchers in priority order and decides which candidate, if any,
/// can be edited safely.
#[derive(Debug)]
pub struct StrategyCoordinator<'a> {
    options: &'a ReplaceOptions,
}

impl<'a> StrategyCoordinator<'a> {
    pub fn new(options: &'a ReplaceOptions) -> Self {
        Self { options }
    }

    fn resolve<'c>(&self, content: &'c str, pattern: &str, replace_all: bool) -> Resolution<'c> {
        let block_anchor = BlockAnchorMatcher::from_options(self.options);
        let matchers: [&dyn Matcher; 4] = [
            &ExactMatcher,
            &LineTrimmedMatcher,
            &block_anchor,
            &MultiOccurrenceMatcher,
        ];

        let mut found_any = false;
        for matcher in matchers {
            let strategy = matcher.strategy();
            trace!("    Attempting {} match...", strategy);
            let candidates = matcher.find_candidates(content, pattern);
            trace!("      {} {} candidate(s).", candidates.len(), strategy);

            for candidate in candidates {
                if candidate.text.is_empty() {
                    continue;
                }
                let mut occurrences = content.match_indices(candidate.text).map(|(i, _)| i);
                let Some(first) = occurrences.next() else {
                    continue;
                };
                found_any = true;

                if replace_all {
                    let count = 1 + occurrences.count();
                    debug!(
                        "    Replacing all {} occurrence(s) of the {} candidate.",
                        count, strategy
                    );
                    return Resolution::All {
                        target: candidate.text,
                        occurrences: count,
                        strategy,
                    };
                }
                if occurrences.next().is_none() {
                    debug!(
                        "    Found unique {} match at line {}.",
                        strategy, candidate.start_line
                    );
                    return Resolution::Single {
                        candidate,
                        offset: first,
                        strategy,
                    };
                }
                trace!(
                    "      {} candidate at line {} occurs more than once. Skipping.",
                    strategy,
                    candidate.start_line
                );
            }
        }

        if found_any {
            warn!("    Every candidate for the pattern is ambiguous.");
            Resolution::Ambiguous
        } else {
            debug!("    No matcher found the pattern.");
            Resolution::NotFound
        }
    }

    /// Resolves `pattern` to a single region without editing anything.
    pub fn find_match<'c>(&self, content: &'c str, pattern: &str) -> MatchResult<'c> {
        match self.resolve(content, pattern, false) {
            Resolution::Single { candidate, .. } => MatchResult::Unique(candidate),
            Resolution::Ambiguous => MatchResult::Ambiguous,
            Resolution::NotFound | Resolution::All { .. } => MatchResult::NotFound,
        }
    }

    /// Replaces the region matched by `old` with `new`.
    pub fn replace(&self, content: &str, old: &str, new: &str) -> Result<Replacement, ReplaceError> {
        if old == new {
            return Err(ReplaceError::InvalidInput);
        }
        trace!(
            "  replace called with a {}-byte pattern against {} bytes of content.",
            old.len(),
            content.len()
        );

        match self.resolve(content, old, self.options.replace_all) {
            Resolution::Single {
                candidate,
                offset,
                strategy,
            } => Ok(Replacement {
                new_content: splice(content, offset, candidate.text.len(), new),
                kind: ReplacementKind::Single {
                    offset,
                    replaced_len: candidate.text.len(),
                    start_line: candidate.start_line,
                },
                strategy,
            }),
            Resolution::All {
                target,
                occurrences,
                strategy,
            } => Ok(Replacement {
                new_content: substitute_all(content, target, new),
                kind: ReplacementKind::All { occurrences },
                strategy,
            }),
            Resolution::Ambiguous => Err(ReplaceError::AmbiguousMatch),
            Resolution::NotFound => Err(ReplaceError::NotFound),
        }
    }
}

/// Resolves `pattern` against `content` without modifying it.
///
/// # Example
///
/// ```
/// # use mreplace::{find_match, MatchResult, ReplaceOptions};
/// let content = "Hello, World!\nHello, again!\nGoodbye!";
/// let options = ReplaceOptions::default();
///
/// match find_match(content, "Goodbye!", &options) {
///     MatchResult::Unique(candidate) => {
///         assert_eq!(candidate.start_line, 3);
///         assert_eq!(&content[candidate.range()], "Goodbye!");
///     }
///     other => panic!("unexpected result: {:?}", other),
/// }
/// assert_eq!(find_match(content, "Hello", &options), MatchResult::Ambiguous);
/// assert_eq!(find_match(content, "Missing", &options), MatchResult::NotFound);
/// ```
pub fn find_match<'a>(content: &'a str, pattern: &str, options: &ReplaceOptions) -> MatchResult<'a> {
    StrategyCoordinator::new(options).find_match(content, pattern)
}

/// Replaces `old` with `new` in `content` using the default thresholds.
///
/// With `replace_all`, every occurrence of the matched text is replaced;
/// otherwise the matched text must occur exactly once.
///
/// # Errors
///
/// - [`ReplaceError::InvalidInput`] if `old == new`.
/// - [`ReplaceError::NotFound`] if nothing matches.
/// - [`ReplaceError::AmbiguousMatch`] if every match occurs more than once.
///
/// # Example
///
/// ```
/// # use mreplace::{replace, ReplacementKind};
/// let content = "Hello, World!\nHello, again!\nGoodbye!";
///
/// let result = replace(content, "Hello, World!", "Hi there!", false).unwrap();
/// assert_eq!(result.new_content, "Hi there!\nHello, again!\nGoodbye!");
///
/// let result = replace(content, "Hello", "Hey", true).unwrap();
/// assert_eq!(result.new_content, "Hey, World!\nHey, again!\nGoodbye!");
/// assert_eq!(result.kind, ReplacementKind::All { occurrences: 2 });
/// ```
pub fn replace(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<Replacement, ReplaceError> {
    let options = ReplaceOptions {
        replace_all,
        ..ReplaceOptions::default()
    };
    replace_with_options(content, old, new, &options)
}

/// Replaces `old` with `new` in `content` as configured by `options`.
pub fn replace_with_options(
    content: &str,
    old: &str,
    new: &str,
    options: &ReplaceOptions,
) -> Result<Replacement, ReplaceError> {
    StrategyCoordinator::new(options).replace(content, old, new)
}

// --- Applying ---

/// Returns `content` with the `len` bytes at `offset` replaced by `replacement`.
///
/// # Panics
///
/// Panics if the range is out of bounds or not on character boundaries.
///
/// # Example
///
/// ```
/// # use mreplace::splice;
/// assert_eq!(splice("one two three", 4, 3, "2"), "one 2 three");
/// ```
pub fn splice(content: &str, offset: usize, len: usize, replacement: &str) -> String {
    let mut result = String::with_capacity(content.len() - len + replacement.len());
    result.push_str(&content[..offset]);
    result.push_str(replacement);
    result.push_str(&content[offset + len..]);
    result
}

/// Returns `content` with every non-overlapping occurrence of `target`
/// replaced by `replacement`.
pub fn substitute_all(content: &str, target: &str, replacement: &str) -> String {
    content.replace(target, replacement)
}

// --- Document Store ---

/// An edit request as delivered by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub old_string: String,
    pub new_string: String,
    pub replace_all: bool,
}

impl EditRequest {
    /// Creates a request that replaces a single, unambiguous region.
    pub fn new(old_string: impl Into<String>, new_string: impl Into<String>) -> Self {
        Self {
            old_string: old_string.into(),
            new_string: new_string.into(),
            replace_all: false,
        }
    }

    /// Sets whether every occurrence should be replaced.
    pub fn replace_all(mut self, replace_all: bool) -> Self {
        self.replace_all = replace_all;
        self
    }
}

/// The result of [`DocumentStore::replace_text`].
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    pub replacement: Replacement,
    /// Unified diff of the proposed change. Only populated in dry-run mode.
    pub diff: Option<String>,
}

/// Converts a `std::io::Error` into a more specific `StoreError`.
fn map_io_error(path: PathBuf, e: std::io::Error) -> StoreError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StoreError::DocumentNotFound(path),
        std::io::ErrorKind::PermissionDenied => StoreError::PermissionDenied { path },
        _ => StoreError::Io { path, source: e },
    }
}

/// Documents stored as files under a root directory.
///
/// Document identifiers are paths relative to the root. Edits to the same
/// document are serialized: the snapshot is read, edited and written back
/// while holding that document's lock, so two concurrent edits always see
/// each other's result.
#[derive(Debug)]
pub struct DocumentStore {
    root: PathBuf,
    options: ReplaceOptions,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DocumentStore {
    /// Creates a store rooted at `root` using the default matching options.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, ReplaceOptions::default())
    }

    /// Creates a store whose edits use the given block-anchor thresholds.
    /// The `replace_all` flag always comes from the individual request.
    pub fn with_options(root: impl Into<PathBuf>, options: ReplaceOptions) -> Self {
        Self {
            root: root.into(),
            options,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a document identifier to the canonical path of an existing
    /// file inside the root.
    ///
    /// Identifiers containing `..`, absolute paths, or symlinks leading out of
    /// the root are rejected with [`StoreError::PathTraversal`].
    pub fn resolve(&self, id: &Path) -> Result<PathBuf, StoreError> {
        trace!(
            "  Resolving document '{}' under root '{}'",
            id.display(),
            self.root.display()
        );
        if id
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StoreError::PathTraversal(id.to_path_buf()));
        }

        let root =
            fs::canonicalize(&self.root).map_err(|e| map_io_error(self.root.clone(), e))?;
        let path = fs::canonicalize(root.join(id)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::DocumentNotFound(id.to_path_buf()),
            _ => map_io_error(id.to_path_buf(), e),
        })?;
        if !path.starts_with(&root) {
            return Err(StoreError::PathTraversal(id.to_path_buf()));
        }
        if !path.is_file() {
            return Err(StoreError::NotAFile { path });
        }
        Ok(path)
    }

    /// Reads the current content of a document.
    pub fn fetch_content(&self, id: impl AsRef<Path>) -> Result<String, StoreError> {
        let path = self.resolve(id.as_ref())?;
        fs::read_to_string(&path).map_err(|e| map_io_error(path, e))
    }

    /// Lists every document under the root as a path relative to it.
    ///
    /// Hidden files and directories (names starting with `.`) are skipped.
    /// The result is sorted.
    pub fn list_documents(&self) -> Result<Vec<PathBuf>, StoreError> {
        let root =
            fs::canonicalize(&self.root).map_err(|e| map_io_error(self.root.clone(), e))?;
        let mut documents: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.path().strip_prefix(&root).ok().map(Path::to_path_buf))
            .collect();
        documents.sort();
        debug!("  Found {} document(s) under '{}'.", documents.len(), root.display());
        Ok(documents)
    }

    /// Returns the lock guarding mutations of the document at `path`.
    ///
    /// Entries live only while an edit holds or waits on them; see
    /// [`DocumentStore::release_lock`].
    fn document_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Drops the map entry for `path` once no other edit holds a handle to it.
    ///
    /// Handles are only cloned out of the map under the map lock, so a count
    /// of two (the map and `lock`) means no edit is waiting on it.
    fn release_lock(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
            trace!("  Released lock for '{}'.", path.display());
        }
    }

    /// The number of documents with an edit in progress.
    pub fn active_edits(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Applies `request` to a document.
    ///
    /// When `dry_run` is set the document is left untouched and the outcome
    /// carries a unified diff of the change instead. On any error the document
    /// is unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// # use mreplace::{DocumentStore, EditRequest, StoreError, ReplaceError};
    /// # use std::fs;
    /// # use tempfile::tempdir;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let dir = tempdir()?;
    /// fs::write(dir.path().join("notes.md"), "- one\n- two\n")?;
    /// let store = DocumentStore::new(dir.path());
    ///
    /// let preview = store.replace_text("notes.md", &EditRequest::new("- two", "- 2"), true)?;
    /// assert!(preview.diff.unwrap().contains("+- 2"));
    /// assert_eq!(store.fetch_content("notes.md")?, "- one\n- two\n");
    ///
    /// let missing = store.replace_text("notes.md", &EditRequest::new("- three", "- 3"), false);
    /// assert!(matches!(
    ///     missing,
    ///     Err(StoreError::Edit { source: ReplaceError::NotFound, .. })
    /// ));
    /// # Ok(())
    /// # }
    /// ```
    pub fn replace_text(
        &self,
        id: impl AsRef<Path>,
        request: &EditRequest,
        dry_run: bool,
    ) -> Result<EditOutcome, StoreError> {
        let id = id.as_ref();
        info!("Editing document: {}", id.display());
        let path = self.resolve(id)?;

        let lock = self.document_lock(&path);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.edit_locked(id, &path, request, dry_run)
        };
        self.release_lock(&path, lock);
        outcome
    }

    /// Reads, edits and (unless `dry_run`) writes back a document whose lock
    /// is held by the caller.
    fn edit_locked(
        &self,
        id: &Path,
        path: &Path,
        request: &EditRequest,
        dry_run: bool,
    ) -> Result<EditOutcome, StoreError> {
        let original = fs::read_to_string(path).map_err(|e| map_io_error(path.to_path_buf(), e))?;
        trace!("  Read {} bytes from '{}'.", original.len(), id.display());

        let options = ReplaceOptions {
            replace_all: request.replace_all,
            ..self.options
        };
        let replacement =
            replace_with_options(&original, &request.old_string, &request.new_string, &options)
                .map_err(|source| {
                    warn!("  Edit rejected for '{}': {}", id.display(), source);
                    StoreError::Edit {
                        path: id.to_path_buf(),
                        source,
                    }
                })?;

        let mut diff = None;
        if dry_run {
            info!("  DRY RUN: Would write changes to '{}'", id.display());
            let old_header = format!("a/{}", id.display());
            let new_header = format!("b/{}", id.display());
            diff = Some(unified_diff(
                similar::Algorithm::default(),
                &original,
                &replacement.new_content,
                3,
                Some((old_header.as_str(), new_header.as_str())),
            ));
        } else {
            fs::write(path, &replacement.new_content)
                .map_err(|e| map_io_error(path.to_path_buf(), e))?;
            info!(
                "  Successfully wrote changes to '{}' ({} match).",
                id.display(),
                replacement.strategy
            );
        }

        Ok(EditOutcome { replacement, diff })
    }
}

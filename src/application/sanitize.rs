//! Neutralizes LaTeX constructs that can reach the shell or the filesystem.
//!
//! This is a textual filter and only one layer of protection: the compiler is
//! additionally started with shell escape disabled and paranoid file access.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

/// Inserted in place of every blocked construct.
pub const BLOCKED_MARKER: &str = "\\textbf{BLOCKED-COMMAND}";

const BLOCKED_PATTERNS: &[&str] = &[
    r"\\immediate\s*\\write18",
    r"\\write18",
    r"\\ShellEscape",
    r"\\(?:input|include)\s*\{\s*/etc/[^}]*\}?",
    r"\\open(?:in|out)\s*\d*\s*=?\s*`",
    r"\\catcode",
    r"\\csname\s*system\s*\\endcsname",
    r"\\markup",
    r"\\startluacode",
    r"\\directlua",
    r"\\latelua",
    r"\\luaexec",
    r"\\newread",
    r"\\newwrite",
    r"\\readline",
    r"\\openin",
    r"\\openout",
    r"\\write\s*\d+",
];

static BLOCKLIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    BLOCKED_PATTERNS
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid blocklist pattern"))
        .collect()
});

static ABSOLUTE_INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(input|include|bibliography)\s*\{\s*/+").expect("valid include pattern")
});

/// Rewrite `source` so that none of the blocked constructs survive.
///
/// Total and idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(source: &str) -> String {
    let mut text = source.to_owned();
    for pattern in BLOCKLIST.iter() {
        if pattern.is_match(&text) {
            text = pattern
                .replace_all(&text, NoExpand(BLOCKED_MARKER))
                .into_owned();
        }
    }

    if text.contains('`') {
        text = text.replace('`', "'");
    }

    ABSOLUTE_INCLUDE
        .replace_all(&text, r"\${1}{./")
        .into_owned()
}

/// Whether `text` still contains anything the blocklist would rewrite.
pub fn contains_blocked(text: &str) -> bool {
    BLOCKLIST.iter().any(|pattern| pattern.is_match(text))
        || text.contains('`')
        || ABSOLUTE_INCLUDE.is_match(text)
}

//! Locates a sequence of pattern lines inside file contents, preferring the
//! strictest match available.
//!
//! Matching is attempted in four tiers, in order: byte-exact, ignoring
//! trailing whitespace, ignoring leading and trailing whitespace, and
//! finally with common Unicode punctuation folded to its ASCII equivalent.
//! A tier only runs once the previous tier found nothing anywhere in the
//! search range, so an exact occurrence always wins over a fuzzy one.

/// Search for `pattern` in `lines`, starting at `start`. When `eof` is set,
/// the pattern is first anchored so the match would end at the last line;
/// the normal forward scan is used as a fallback.
pub(crate) fn seek_sequence(
    lines: &[String],
    pattern: &[String],
    start: usize,
    eof: bool,
) -> Option<usize> {
    if pattern.is_empty() {
        return Some(start);
    }
    let search_start = if eof && lines.len() >= pattern.len() {
        lines.len() - pattern.len()
    } else {
        start
    };
    if let Some(idx) = seek_from(lines, pattern, search_start) {
        return Some(idx);
    }
    if eof && search_start > start {
        return seek_from(lines, pattern, start);
    }
    None
}

fn seek_from(lines: &[String], pattern: &[String], start: usize) -> Option<usize> {
    if start + pattern.len() > lines.len() {
        return None;
    }
    let last_start = lines.len() - pattern.len();

    for i in start..=last_start {
        if (0..pattern.len()).all(|p| lines[i + p] == pattern[p]) {
            return Some(i);
        }
    }
    for i in start..=last_start {
        if (0..pattern.len()).all(|p| lines[i + p].trim_end() == pattern[p].trim_end()) {
            return Some(i);
        }
    }
    for i in start..=last_start {
        if (0..pattern.len()).all(|p| lines[i + p].trim() == pattern[p].trim()) {
            return Some(i);
        }
    }
    for i in start..=last_start {
        if (0..pattern.len())
            .all(|p| normalise_for_match(&lines[i + p]) == normalise_for_match(&pattern[p]))
        {
            return Some(i);
        }
    }
    None
}

/// Folds Unicode dashes, quotes, and spaces that models commonly substitute
/// for their ASCII counterparts, then trims.
fn normalise_for_match(line: &str) -> String {
    line.trim()
        .chars()
        .map(|ch| match ch {
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' => '-',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{00A0}' | '\u{2002}' | '\u{2003}' | '\u{2004}' | '\u{2005}' | '\u{2006}'
            | '\u{2007}' | '\u{2008}' | '\u{2009}' | '\u{200A}' | '\u{202F}' | '\u{205F}'
            | '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}

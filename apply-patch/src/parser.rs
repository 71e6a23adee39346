//! Parser for the `*** Begin Patch` / `*** End Patch` dialect.
//!
//! A patch is a sequence of hunks. Every hunk is one of:
//!
//! - `*** Add File: <path>` followed by lines each prefixed with `+`,
//! - `*** Delete File: <path>` on its own,
//! - `*** Update File: <path>`, optionally followed by `*** Move to:
//!   <new-path>`, followed by one or more chunks.
//!
//! A chunk begins with `@@` (no change context) or `@@ <context>`; the
//! first chunk of an update hunk may omit the marker entirely. Within a
//! chunk each line carries a marker: space for context, `+` for added,
//! `-` for removed; an empty line is an empty context line. A trailing
//! `*** End of File` line anchors the chunk to the end of the file.
//!
//! Errors reference the 1-based line within the patch text so callers can
//! echo them back to whatever produced the patch.

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

pub const BEGIN_PATCH_MARKER: &str = "*** Begin Patch";
pub const END_PATCH_MARKER: &str = "*** End Patch";
const ADD_FILE_MARKER: &str = "*** Add File: ";
const DELETE_FILE_MARKER: &str = "*** Delete File: ";
const UPDATE_FILE_MARKER: &str = "*** Update File: ";
const MOVE_TO_MARKER: &str = "*** Move to: ";
const END_OF_FILE_MARKER: &str = "*** End of File";
const CHANGE_CONTEXT_MARKER: &str = "@@ ";
const EMPTY_CHANGE_CONTEXT_MARKER: &str = "@@";

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParseError {
    #[error("Invalid patch: {0}")]
    InvalidPatchError(String),
    #[error("Invalid hunk at line {line_number}: {message}")]
    InvalidHunkError { message: String, line_number: usize },
}

use ParseError::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hunk {
    AddFile {
        path: PathBuf,
        contents: String,
    },
    DeleteFile {
        path: PathBuf,
    },
    UpdateFile {
        path: PathBuf,
        move_path: Option<PathBuf>,
        chunks: Vec<UpdateFileChunk>,
    },
}

impl Hunk {
    pub fn resolve_path(&self, cwd: &Path) -> PathBuf {
        let path = match self {
            Hunk::AddFile { path, .. } => path,
            Hunk::DeleteFile { path } => path,
            Hunk::UpdateFile { path, .. } => path,
        };
        if path.is_absolute() || cwd.as_os_str().is_empty() || cwd == Path::new(".") {
            path.clone()
        } else {
            cwd.join(path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateFileChunk {
    /// Text following `@@ ` used to anchor the chunk within the file.
    pub change_context: Option<String>,
    /// Lines the chunk expects to find (context + removed lines).
    pub old_lines: Vec<String>,
    /// Lines the chunk writes in their place (context + added lines).
    pub new_lines: Vec<String>,
    /// When set, `old_lines` must match at the end of the file.
    pub is_end_of_file: bool,
}

/// Parse a complete patch body into hunks.
///
/// A wrapping heredoc pair (`<<EOF` … `EOF`, any tag, optionally quoted)
/// is tolerated and unwrapped before the envelope is checked.
pub fn parse_patch(patch: &str) -> Result<Vec<Hunk>, ParseError> {
    let mut lines: Vec<&str> = patch.trim().lines().collect();
    if let Some(tag) = lines.first().copied().and_then(heredoc_tag) {
        if lines.last().map(|last| last.trim()) == Some(tag) {
            lines.remove(0);
            lines.pop();
        }
    }

    if lines.first().map(|line| line.trim()) != Some(BEGIN_PATCH_MARKER) {
        return Err(InvalidPatchError(format!(
            "The first line of the patch must be '{BEGIN_PATCH_MARKER}'"
        )));
    }
    if lines.last().map(|line| line.trim()) != Some(END_PATCH_MARKER) {
        return Err(InvalidPatchError(format!(
            "The last line of the patch must be '{END_PATCH_MARKER}'"
        )));
    }

    let last_line_index = lines.len() - 1;
    let mut hunks: Vec<Hunk> = Vec::new();
    // Start at 2: line 1 is the `*** Begin Patch` marker.
    let mut line_number = 2;
    let mut remaining = &lines[1..last_line_index];
    while !remaining.is_empty() {
        let (hunk, consumed) = parse_one_hunk(remaining, line_number)?;
        hunks.push(hunk);
        line_number += consumed;
        remaining = &remaining[consumed..];
    }
    Ok(hunks)
}

fn heredoc_tag(first_line: &str) -> Option<&str> {
    let rest = first_line.trim().strip_prefix("<<")?;
    let rest = rest.trim_start_matches('-').trim();
    let tag = rest
        .strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
        .or_else(|| {
            rest.strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
        })
        .unwrap_or(rest);
    if tag.is_empty() { None } else { Some(tag) }
}

/// Attempts to parse a single hunk from the start of `lines`. Returns the
/// parsed hunk and the number of lines it consumed.
fn parse_one_hunk(lines: &[&str], line_number: usize) -> Result<(Hunk, usize), ParseError> {
    // Be tolerant of case mismatches and extra padding around the markers.
    let first_line = lines[0].trim();
    if let Some(path) = first_line.strip_prefix(ADD_FILE_MARKER) {
        let mut contents = String::new();
        let mut parsed_lines = 1;
        for add_line in &lines[1..] {
            if let Some(line_to_add) = add_line.strip_prefix('+') {
                contents.push_str(line_to_add);
                contents.push('\n');
                parsed_lines += 1;
            } else {
                break;
            }
        }
        return Ok((
            Hunk::AddFile {
                path: PathBuf::from(path.trim()),
                contents,
            },
            parsed_lines,
        ));
    } else if let Some(path) = first_line.strip_prefix(DELETE_FILE_MARKER) {
        return Ok((
            Hunk::DeleteFile {
                path: PathBuf::from(path.trim()),
            },
            1,
        ));
    } else if let Some(path) = first_line.strip_prefix(UPDATE_FILE_MARKER) {
        let mut remaining = &lines[1..];
        let mut parsed_lines = 1;

        let move_path = remaining
            .first()
            .and_then(|line| line.trim().strip_prefix(MOVE_TO_MARKER))
            .map(|path| PathBuf::from(path.trim()));
        if move_path.is_some() {
            remaining = &remaining[1..];
            parsed_lines += 1;
        }

        let mut chunks: Vec<UpdateFileChunk> = Vec::new();
        while !remaining.is_empty() {
            // An empty line between chunks is allowed and skipped.
            if remaining[0].is_empty() && remaining.len() > 1 && is_chunk_header(remaining[1]) {
                parsed_lines += 1;
                remaining = &remaining[1..];
                continue;
            }
            // The next hunk header terminates this update hunk.
            if is_hunk_header(remaining[0]) {
                break;
            }
            let (chunk, chunk_lines) = parse_update_file_chunk(
                remaining,
                line_number + parsed_lines,
                chunks.is_empty(),
            )?;
            chunks.push(chunk);
            parsed_lines += chunk_lines;
            remaining = &remaining[chunk_lines..];
        }

        if chunks.is_empty() {
            return Err(InvalidHunkError {
                message: format!("Update file hunk for path '{path}' is empty"),
                line_number,
            });
        }

        return Ok((
            Hunk::UpdateFile {
                path: PathBuf::from(path.trim()),
                move_path,
                chunks,
            },
            parsed_lines,
        ));
    }

    Err(InvalidHunkError {
        message: format!(
            "'{first_line}' is not a valid hunk header. \
             Valid hunk headers: '{ADD_FILE_MARKER}<path>', '{DELETE_FILE_MARKER}<path>', \
             '{UPDATE_FILE_MARKER}<path>'"
        ),
        line_number,
    })
}

fn is_hunk_header(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with(ADD_FILE_MARKER)
        || trimmed.starts_with(DELETE_FILE_MARKER)
        || trimmed.starts_with(UPDATE_FILE_MARKER)
}

fn is_chunk_header(line: &str) -> bool {
    line == EMPTY_CHANGE_CONTEXT_MARKER || line.starts_with(CHANGE_CONTEXT_MARKER)
}

/// Parses one chunk of an update hunk. `allow_missing_context` is true only
/// for the first chunk, which may start directly with diff lines.
fn parse_update_file_chunk(
    lines: &[&str],
    line_number: usize,
    allow_missing_context: bool,
) -> Result<(UpdateFileChunk, usize), ParseError> {
    if lines.is_empty() {
        return Err(InvalidHunkError {
            message: "Update hunk does not contain any lines".to_string(),
            line_number,
        });
    }
    let mut chunk = UpdateFileChunk::default();
    let mut parsed_lines = 0;
    if lines[0] == EMPTY_CHANGE_CONTEXT_MARKER {
        parsed_lines = 1;
    } else if let Some(context) = lines[0].strip_prefix(CHANGE_CONTEXT_MARKER) {
        chunk.change_context = Some(context.to_string());
        parsed_lines = 1;
    } else if !allow_missing_context {
        return Err(InvalidHunkError {
            message: format!(
                "Expected update hunk to start with a @@ context marker, got: '{}'",
                lines[0]
            ),
            line_number,
        });
    }

    let mut saw_change_line = false;
    for line in &lines[parsed_lines..] {
        let line_value = *line;
        if line_value == END_OF_FILE_MARKER {
            if !saw_change_line {
                return Err(InvalidHunkError {
                    message: format!(
                        "Update hunk does not contain any lines before '{END_OF_FILE_MARKER}'"
                    ),
                    line_number: line_number + parsed_lines,
                });
            }
            chunk.is_end_of_file = true;
            parsed_lines += 1;
            break;
        }
        if is_hunk_header(line_value) || is_chunk_header(line_value) {
            break;
        }
        match line_value.chars().next() {
            None => {
                // Interpret this as an empty line.
                chunk.old_lines.push(String::new());
                chunk.new_lines.push(String::new());
            }
            Some(' ') => {
                let text = line_value[1..].to_string();
                chunk.old_lines.push(text.clone());
                chunk.new_lines.push(text);
            }
            Some('+') => {
                chunk.new_lines.push(line_value[1..].to_string());
                saw_change_line = true;
            }
            Some('-') => {
                chunk.old_lines.push(line_value[1..].to_string());
                saw_change_line = true;
            }
            Some(_) => {
                return Err(InvalidHunkError {
                    message: format!("Unexpected line found in update hunk: '{line_value}'"),
                    line_number: line_number + parsed_lines,
                });
            }
        }
        parsed_lines += 1;
    }

    if chunk.old_lines.is_empty() && chunk.new_lines.is_empty() {
        return Err(InvalidHunkError {
            message: "Update hunk chunk is empty".to_string(),
            line_number,
        });
    }
    Ok((chunk, parsed_lines))
}

/// Renders hunks back into patch text. `parse_patch(render_patch(&hunks))`
/// round-trips the hunk structure modulo line-ending normalisation.
pub fn render_patch(hunks: &[Hunk]) -> String {
    let mut out = String::new();
    out.push_str(BEGIN_PATCH_MARKER);
    out.push('\n');
    for hunk in hunks {
        match hunk {
            Hunk::AddFile { path, contents } => {
                out.push_str(&format!("{ADD_FILE_MARKER}{}\n", path.display()));
                for line in contents.lines() {
                    out.push('+');
                    out.push_str(line);
                    out.push('\n');
                }
            }
            Hunk::DeleteFile { path } => {
                out.push_str(&format!("{DELETE_FILE_MARKER}{}\n", path.display()));
            }
            Hunk::UpdateFile {
                path,
                move_path,
                chunks,
            } => {
                out.push_str(&format!("{UPDATE_FILE_MARKER}{}\n", path.display()));
                if let Some(move_path) = move_path {
                    out.push_str(&format!("{MOVE_TO_MARKER}{}\n", move_path.display()));
                }
                for chunk in chunks {
                    match &chunk.change_context {
                        Some(context) => {
                            out.push_str(&format!("{CHANGE_CONTEXT_MARKER}{context}\n"))
                        }
                        None => out.push_str(&format!("{EMPTY_CHANGE_CONTEXT_MARKER}\n")),
                    }
                    render_chunk_lines(&mut out, chunk);
                    if chunk.is_end_of_file {
                        out.push_str(END_OF_FILE_MARKER);
                        out.push('\n');
                    }
                }
            }
        }
    }
    out.push_str(END_PATCH_MARKER);
    out.push('\n');
    out
}

fn render_chunk_lines(out: &mut String, chunk: &UpdateFileChunk) {
    // Emit shared context lines in lockstep, removed before added runs.
    let mut old_iter = chunk.old_lines.iter().peekable();
    let mut new_iter = chunk.new_lines.iter().peekable();
    loop {
        match (old_iter.peek(), new_iter.peek()) {
            (Some(old), Some(new)) if old == new => {
                if old.is_empty() {
                    out.push('\n');
                } else {
                    out.push(' ');
                    out.push_str(old);
                    out.push('\n');
                }
                old_iter.next();
                new_iter.next();
            }
            (Some(old), _) => {
                out.push('-');
                out.push_str(old);
                out.push('\n');
                old_iter.next();
            }
            (None, Some(new)) => {
                out.push('+');
                out.push_str(new);
                out.push('\n');
                new_iter.next();
            }
            (None, None) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_add_file_hunk() {
        let patch = "*** Begin Patch\n*** Add File: greeting.txt\n+hello\n+world\n*** End Patch";
        let hunks = parse_patch(patch).unwrap();
        assert_eq!(
            hunks,
            vec![Hunk::AddFile {
                path: PathBuf::from("greeting.txt"),
                contents: "hello\nworld\n".to_string(),
            }]
        );
    }

    #[test]
    fn parse_delete_file_hunk() {
        let patch = "*** Begin Patch\n*** Delete File: obsolete.txt\n*** End Patch";
        let hunks = parse_patch(patch).unwrap();
        assert_eq!(
            hunks,
            vec![Hunk::DeleteFile {
                path: PathBuf::from("obsolete.txt"),
            }]
        );
    }

    #[test]
    fn parse_update_file_hunk_with_context() {
        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: src/lib.rs\n",
            "@@ fn main() {\n",
            "     let x = 1;\n",
            "-    let y = 2;\n",
            "+    let y = 3;\n",
            "*** End Patch",
        );
        let hunks = parse_patch(patch).unwrap();
        assert_eq!(
            hunks,
            vec![Hunk::UpdateFile {
                path: PathBuf::from("src/lib.rs"),
                move_path: None,
                chunks: vec![UpdateFileChunk {
                    change_context: Some("fn main() {".to_string()),
                    old_lines: vec!["    let x = 1;".to_string(), "    let y = 2;".to_string()],
                    new_lines: vec!["    let x = 1;".to_string(), "    let y = 3;".to_string()],
                    is_end_of_file: false,
                }],
            }]
        );
    }

    #[test]
    fn parse_update_without_leading_marker() {
        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: foo\n",
            " context\n",
            "-old\n",
            "+new\n",
            "*** End Patch",
        );
        let hunks = parse_patch(patch).unwrap();
        let Hunk::UpdateFile { chunks, .. } = &hunks[0] else {
            panic!("expected update hunk");
        };
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].change_context, None);
    }

    #[test]
    fn parse_update_with_move_and_eof() {
        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: old-name.txt\n",
            "*** Move to: new-name.txt\n",
            "@@\n",
            "-last line\n",
            "+final line\n",
            "*** End of File\n",
            "*** End Patch",
        );
        let hunks = parse_patch(patch).unwrap();
        assert_eq!(
            hunks,
            vec![Hunk::UpdateFile {
                path: PathBuf::from("old-name.txt"),
                move_path: Some(PathBuf::from("new-name.txt")),
                chunks: vec![UpdateFileChunk {
                    change_context: None,
                    old_lines: vec!["last line".to_string()],
                    new_lines: vec!["final line".to_string()],
                    is_end_of_file: true,
                }],
            }]
        );
    }

    #[test]
    fn heredoc_wrapper_is_unwrapped() {
        let patch = "<<EOF\n*** Begin Patch\n*** Delete File: a\n*** End Patch\nEOF";
        assert!(parse_patch(patch).is_ok());
        let quoted = "<<'EOF'\n*** Begin Patch\n*** Delete File: a\n*** End Patch\nEOF";
        assert!(parse_patch(quoted).is_ok());
    }

    #[test]
    fn missing_begin_marker_is_rejected() {
        let err = parse_patch("*** Update File: a\n*** End Patch").unwrap_err();
        assert_eq!(
            err,
            InvalidPatchError("The first line of the patch must be '*** Begin Patch'".to_string())
        );
    }

    #[test]
    fn missing_end_marker_is_rejected() {
        let err = parse_patch("*** Begin Patch\n*** Delete File: a").unwrap_err();
        assert_eq!(
            err,
            InvalidPatchError("The last line of the patch must be '*** End Patch'".to_string())
        );
    }

    #[test]
    fn invalid_hunk_error_reports_line_number() {
        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: a\n",
            "@@\n",
            "+new\n",
            "*** Wat File: b\n",
            "*** End Patch",
        );
        let err = parse_patch(patch).unwrap_err();
        let InvalidHunkError { line_number, .. } = err else {
            panic!("expected hunk error, got {err:?}");
        };
        assert_eq!(line_number, 5);
    }

    #[test]
    fn eof_marker_requires_change_lines() {
        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: a\n",
            "@@\n",
            "*** End of File\n",
            "*** End Patch",
        );
        assert!(parse_patch(patch).is_err());
    }

    #[test]
    fn render_round_trips() {
        let patch = concat!(
            "*** Begin Patch\n",
            "*** Add File: added.txt\n",
            "+one\n",
            "+two\n",
            "*** Update File: src/main.rs\n",
            "*** Move to: src/bin/main.rs\n",
            "@@ fn main() {\n",
            " stay\n",
            "-before\n",
            "+after\n",
            "*** Delete File: gone.txt\n",
            "*** End Patch",
        );
        let hunks = parse_patch(patch).unwrap();
        let rendered = render_patch(&hunks);
        assert_eq!(parse_patch(&rendered).unwrap(), hunks);
    }

    #[test]
    fn empty_line_is_shared_context() {
        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: a\n",
            "@@\n",
            " top\n",
            "\n",
            "-old\n",
            "+new\n",
            "*** End Patch",
        );
        let hunks = parse_patch(patch).unwrap();
        let Hunk::UpdateFile { chunks, .. } = &hunks[0] else {
            panic!("expected update hunk");
        };
        assert_eq!(
            chunks[0].old_lines,
            vec!["top".to_string(), String::new(), "old".to_string()]
        );
        assert_eq!(
            chunks[0].new_lines,
            vec!["top".to_string(), String::new(), "new".to_string()]
        );
    }
}

//! Applies `*** Begin Patch` blocks to the filesystem.
//!
//! The parser ([`parse_patch`]) turns patch text into [`Hunk`]s; the
//! applier resolves update chunks against on-disk content with a fuzzy
//! line matcher and performs add/update/delete/move operations.

mod parser;
mod seek_sequence;
mod standalone_executable;

use std::fs;
use std::path::Path;
use std::path::PathBuf;

pub use parser::Hunk;
pub use parser::ParseError;
pub use parser::UpdateFileChunk;
pub use parser::parse_patch;
pub use parser::render_patch;
use seek_sequence::seek_sequence;
use thiserror::Error;

pub use standalone_executable::main;
pub use standalone_executable::run_main;

#[derive(Debug, Error, PartialEq)]
pub enum ApplyPatchError {
    #[error(transparent)]
    ParseError(#[from] ParseError),
    #[error(transparent)]
    IoError(#[from] IoError),
    /// A chunk's context or old-line sequence could not be located.
    #[error(transparent)]
    MatchError(#[from] MatchError),
}

impl From<std::io::Error> for ApplyPatchError {
    fn from(err: std::io::Error) -> Self {
        ApplyPatchError::IoError(IoError {
            context: "I/O error".to_string(),
            source: err,
        })
    }
}

#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct IoError {
    context: String,
    #[source]
    source: std::io::Error,
}

impl IoError {
    fn new(context: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }
}

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context && self.source.kind() == other.source.kind()
    }
}

/// Failure to anchor an update chunk. The message strings are load-bearing:
/// downstream consumers parse them, so they must not change.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct MatchError {
    message: String,
    pub path: PathBuf,
    pub wanted_lines: Vec<String>,
}

impl MatchError {
    fn context_not_found(path: &Path, context: &str) -> Self {
        Self {
            message: format!("Failed to find context '{context}' in {}", path.display()),
            path: path.to_path_buf(),
            wanted_lines: vec![context.to_string()],
        }
    }

    fn lines_not_found(path: &Path, wanted: &[String]) -> Self {
        Self {
            message: format!("Failed to find expected lines in {}", path.display()),
            path: path.to_path_buf(),
            wanted_lines: wanted.to_vec(),
        }
    }
}

/// Paths touched by a successful (or partially successful) application,
/// grouped by operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AffectedPaths {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl AffectedPaths {
    /// Renders the `A/M/D` summary lines in group order.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for path in &self.added {
            out.push_str(&format!("A {}\n", path.display()));
        }
        for path in &self.modified {
            out.push_str(&format!("M {}\n", path.display()));
        }
        for path in &self.deleted {
            out.push_str(&format!("D {}\n", path.display()));
        }
        out
    }
}

impl AffectedPaths {
    /// Machine-readable form of the summary, in the same group order.
    pub fn to_json(&self) -> serde_json::Value {
        let render = |paths: &[PathBuf]| -> Vec<String> {
            paths
                .iter()
                .map(|path| path.display().to_string())
                .collect()
        };
        serde_json::json!({
            "added": render(&self.added),
            "modified": render(&self.modified),
            "deleted": render(&self.deleted),
        })
    }
}

/// A single splice computed for an update hunk chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Replacement {
    start_index: usize,
    old_len: usize,
    new_lines: Vec<String>,
}

/// Parses and applies a patch, writing a human-readable summary to `stdout`
/// and error details to `stderr`.
pub fn apply_patch(
    patch: &str,
    cwd: &Path,
    stdout: &mut impl std::io::Write,
    stderr: &mut impl std::io::Write,
) -> Result<AffectedPaths, ApplyPatchError> {
    let hunks = match parse_patch(patch) {
        Ok(hunks) => hunks,
        Err(err) => {
            let _ = writeln!(stderr, "{err}");
            return Err(err.into());
        }
    };
    match apply_hunks(&hunks, cwd) {
        Ok(affected) => {
            let _ = writeln!(stdout, "Success. Updated the following files:");
            let _ = write!(stdout, "{}", affected.summary());
            Ok(affected)
        }
        Err(err) => {
            let _ = writeln!(stderr, "{err}");
            Err(err)
        }
    }
}

/// Applies hunks in order. Each file is written as soon as its hunk
/// resolves, so a failure partway through leaves earlier files modified;
/// the error names the hunk that failed and nothing after it has run.
pub fn apply_hunks(hunks: &[Hunk], cwd: &Path) -> Result<AffectedPaths, ApplyPatchError> {
    let mut affected = AffectedPaths::default();
    for hunk in hunks {
        let path = hunk.resolve_path(cwd);
        match hunk {
            Hunk::AddFile { contents, .. } => {
                create_parent_dirs(&path)?;
                fs::write(&path, contents)
                    .map_err(|err| IoError::new(format!("Failed to write {}", path.display()), err))?;
                affected.added.push(path);
            }
            Hunk::DeleteFile { .. } => {
                fs::remove_file(&path).map_err(|err| {
                    IoError::new(format!("Failed to delete {}", path.display()), err)
                })?;
                affected.deleted.push(path);
            }
            Hunk::UpdateFile {
                move_path, chunks, ..
            } => {
                let new_contents = derive_new_contents_from_chunks(&path, chunks)?;
                match move_path {
                    Some(dest) => {
                        let dest = resolve_in(cwd, dest);
                        create_parent_dirs(&dest)?;
                        fs::write(&dest, new_contents).map_err(|err| {
                            IoError::new(format!("Failed to write {}", dest.display()), err)
                        })?;
                        fs::remove_file(&path).map_err(|err| {
                            IoError::new(format!("Failed to remove {}", path.display()), err)
                        })?;
                        affected.modified.push(dest);
                    }
                    None => {
                        fs::write(&path, new_contents).map_err(|err| {
                            IoError::new(format!("Failed to write {}", path.display()), err)
                        })?;
                        affected.modified.push(path);
                    }
                }
            }
        }
    }
    Ok(affected)
}

fn resolve_in(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || cwd.as_os_str().is_empty() || cwd == Path::new(".") {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn create_parent_dirs(path: &Path) -> Result<(), ApplyPatchError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                IoError::new(
                    format!("Failed to create parent directories for {}", path.display()),
                    err,
                )
            })?;
        }
    }
    Ok(())
}

fn derive_new_contents_from_chunks(
    path: &Path,
    chunks: &[UpdateFileChunk],
) -> Result<String, ApplyPatchError> {
    let original = fs::read_to_string(path)
        .map_err(|err| IoError::new(format!("Failed to read {}", path.display()), err))?;

    let mut lines: Vec<String> = original.split('\n').map(str::to_string).collect();
    // Drop the empty element introduced by a trailing newline.
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    let replacements = compute_replacements(&lines, path, chunks)?;
    let lines = apply_replacements(lines, replacements);

    let mut contents = lines.join("\n");
    contents.push('\n');
    Ok(contents)
}

/// Resolves every chunk against the file before anything is spliced, so an
/// unresolvable chunk aborts the whole file without a partial rewrite.
fn compute_replacements(
    lines: &[String],
    path: &Path,
    chunks: &[UpdateFileChunk],
) -> Result<Vec<Replacement>, ApplyPatchError> {
    let mut replacements: Vec<Replacement> = Vec::new();
    let mut line_index: usize = 0;

    for chunk in chunks {
        if let Some(context) = &chunk.change_context {
            let Some(idx) = seek_sequence(lines, std::slice::from_ref(context), line_index, false)
            else {
                return Err(MatchError::context_not_found(path, context).into());
            };
            line_index = idx + 1;
        }

        if chunk.old_lines.is_empty() {
            // Pure insertion: before the final trailing blank, or at EOF.
            let insert_at = if lines.last().is_some_and(String::is_empty) {
                lines.len() - 1
            } else {
                lines.len()
            };
            replacements.push(Replacement {
                start_index: insert_at,
                old_len: 0,
                new_lines: chunk.new_lines.clone(),
            });
            continue;
        }

        let mut pattern: &[String] = &chunk.old_lines;
        let mut new_lines: &[String] = &chunk.new_lines;
        let mut found = seek_sequence(lines, pattern, line_index, chunk.is_end_of_file);
        if found.is_none() && pattern.last().is_some_and(|line| line.is_empty()) {
            // Models sometimes emit a spurious trailing blank; retry without
            // it on both sides of the chunk.
            pattern = &pattern[..pattern.len() - 1];
            if new_lines.last().is_some_and(|line| line.is_empty()) {
                new_lines = &new_lines[..new_lines.len() - 1];
            }
            found = seek_sequence(lines, pattern, line_index, chunk.is_end_of_file);
        }
        let Some(idx) = found else {
            return Err(MatchError::lines_not_found(path, &chunk.old_lines).into());
        };
        replacements.push(Replacement {
            start_index: idx,
            old_len: pattern.len(),
            new_lines: new_lines.to_vec(),
        });
        line_index = idx + pattern.len();
    }

    Ok(replacements)
}

fn apply_replacements(mut lines: Vec<String>, mut replacements: Vec<Replacement>) -> Vec<String> {
    replacements.sort_by_key(|replacement| replacement.start_index);
    for replacement in replacements.into_iter().rev() {
        let end = (replacement.start_index + replacement.old_len).min(lines.len());
        lines.splice(replacement.start_index..end, replacement.new_lines);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn apply(patch: &str, cwd: &Path) -> Result<AffectedPaths, ApplyPatchError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        apply_patch(patch, cwd, &mut stdout, &mut stderr)
    }

    #[test]
    fn update_replaces_matched_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        fs::write(&path, "foo\nbar\n").unwrap();

        let patch = format!(
            "*** Begin Patch\n*** Update File: {}\n@@\n foo\n-bar\n+baz\n*** End Patch",
            path.display()
        );
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let affected = apply_patch(&patch, dir.path(), &mut stdout, &mut stderr).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "foo\nbaz\n");
        assert_eq!(affected.modified, vec![path.clone()]);
        let summary = String::from_utf8(stdout).unwrap();
        assert!(summary.contains(&format!("M {}", path.display())));
    }

    #[test]
    fn add_and_delete_in_one_patch() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("old.txt");
        fs::write(&existing, "bye\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Add File: fresh.txt\n",
            "+hello\n",
            "*** Delete File: old.txt\n",
            "*** End Patch",
        );
        let affected = apply(patch, dir.path()).unwrap();

        let added = dir.path().join("fresh.txt");
        assert_eq!(fs::read_to_string(&added).unwrap(), "hello\n");
        assert!(!existing.exists());
        let summary = affected.summary();
        assert!(summary.contains(&format!("A {}", added.display())));
        assert!(summary.contains(&format!("D {}", existing.display())));
    }

    #[test]
    fn add_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let patch = concat!(
            "*** Begin Patch\n",
            "*** Add File: nested/deeply/file.txt\n",
            "+content\n",
            "*** End Patch",
        );
        apply(patch, dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("nested/deeply/file.txt")).unwrap(),
            "content\n"
        );
    }

    #[test]
    fn update_with_move_writes_destination_and_unlinks_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.txt");
        fs::write(&src, "line\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: src.txt\n",
            "*** Move to: dst.txt\n",
            "@@\n",
            "-line\n",
            "+moved line\n",
            "*** End Patch",
        );
        apply(patch, dir.path()).unwrap();

        assert!(!src.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("dst.txt")).unwrap(),
            "moved line\n"
        );
    }

    #[test]
    fn insertion_chunk_appends_at_end_of_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "first\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: notes.txt\n",
            "@@\n",
            "+second\n",
            "*** End Patch",
        );
        apply(patch, dir.path()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn eof_anchored_chunk_matches_last_occurrence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.txt");
        fs::write(&path, "marker\nmiddle\nmarker\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: dup.txt\n",
            "@@\n",
            "-marker\n",
            "+MARKER\n",
            "*** End of File\n",
            "*** End Patch",
        );
        apply(patch, dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "marker\nmiddle\nMARKER\n"
        );
    }

    #[test]
    fn multiple_chunks_apply_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multi.txt");
        fs::write(&path, "a\nb\nc\nd\ne\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: multi.txt\n",
            "@@\n",
            "-a\n",
            "+A\n",
            "@@ c\n",
            "-d\n",
            "+D\n",
            "*** End Patch",
        );
        apply(patch, dir.path()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "A\nb\nc\nD\ne\n");
    }

    #[test]
    fn unicode_variants_in_old_lines_still_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uni.txt");
        fs::write(&path, "it's plain ascii\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: uni.txt\n",
            "@@\n",
            "-it\u{2019}s plain ascii\n",
            "+rewritten\n",
            "*** End Patch",
        );
        apply(patch, dir.path()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "rewritten\n");
    }

    #[test]
    fn missing_context_reports_exact_message() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ctx.txt");
        fs::write(&path, "alpha\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: ctx.txt\n",
            "@@ no such context\n",
            "-alpha\n",
            "+beta\n",
            "*** End Patch",
        );
        let err = apply(patch, dir.path()).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Failed to find context 'no such context' in {}", path.display())
        );
    }

    #[test]
    fn missing_lines_report_exact_message() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("miss.txt");
        fs::write(&path, "alpha\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: miss.txt\n",
            "@@\n",
            "-zeta\n",
            "+beta\n",
            "*** End Patch",
        );
        let err = apply(patch, dir.path()).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Failed to find expected lines in {}", path.display())
        );
    }

    #[test]
    fn failure_leaves_earlier_files_written() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad.txt");
        fs::write(&bad, "unrelated\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Add File: first.txt\n",
            "+first\n",
            "*** Update File: bad.txt\n",
            "@@\n",
            "-missing\n",
            "+replacement\n",
            "*** End Patch",
        );
        let err = apply(patch, dir.path()).unwrap_err();
        assert!(matches!(err, ApplyPatchError::MatchError(_)));
        // Earlier hunks have already been written; this is the documented
        // per-file application order.
        assert!(dir.path().join("first.txt").exists());
        assert_eq!(fs::read_to_string(&bad).unwrap(), "unrelated\n");
    }

    #[test]
    fn trailing_blank_retry_matches_without_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tail.txt");
        fs::write(&path, "only\n").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: tail.txt\n",
            "@@\n",
            "-only\n",
            "-\n",
            "+changed\n",
            "*** End Patch",
        );
        apply(patch, dir.path()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "changed\n");
    }

    #[test]
    fn file_without_trailing_newline_gains_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonl.txt");
        fs::write(&path, "alpha\nbeta").unwrap();

        let patch = concat!(
            "*** Begin Patch\n",
            "*** Update File: nonl.txt\n",
            "@@\n",
            "-beta\n",
            "+gamma\n",
            "*** End Patch",
        );
        apply(patch, dir.path()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "alpha\ngamma\n");
    }
}

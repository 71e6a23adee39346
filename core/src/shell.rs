//! Shell resolution: probe candidate shells once per process and cache the
//! result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellKind {
    Zsh,
    Bash,
    Sh,
    PowerShell,
    Cmd,
}

impl ShellKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ShellKind::Zsh => "zsh",
            ShellKind::Bash => "bash",
            ShellKind::Sh => "sh",
            ShellKind::PowerShell => "powershell",
            ShellKind::Cmd => "cmd",
        }
    }

    pub fn is_posix(&self) -> bool {
        matches!(self, ShellKind::Zsh | ShellKind::Bash | ShellKind::Sh)
    }

    fn program(&self) -> &'static str {
        match self {
            ShellKind::Zsh => "zsh",
            ShellKind::Bash => "bash",
            ShellKind::Sh => "sh",
            ShellKind::PowerShell => "powershell.exe",
            ShellKind::Cmd => "cmd.exe",
        }
    }

    fn probe_args(&self) -> Vec<&'static str> {
        match self {
            ShellKind::Zsh | ShellKind::Bash | ShellKind::Sh => vec!["-c", "exit 0"],
            ShellKind::PowerShell => vec!["-NoProfile", "-Command", "exit 0"],
            ShellKind::Cmd => vec!["/C", "exit 0"],
        }
    }
}

/// A shell known to be runnable on this host, with its invocation template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShell {
    pub kind: ShellKind,
    pub program: PathBuf,
}

impl ResolvedShell {
    /// Argv for running `command` through this shell.
    pub fn command_argv(&self, command: &str) -> Vec<String> {
        let mut argv = vec![self.program.display().to_string()];
        match self.kind {
            ShellKind::Zsh | ShellKind::Bash | ShellKind::Sh => {
                argv.push("-c".to_string());
                argv.push(command.to_string());
            }
            ShellKind::PowerShell => {
                argv.push("-NoProfile".to_string());
                argv.push("-Command".to_string());
                argv.push(command.to_string());
            }
            ShellKind::Cmd => {
                argv.push("/C".to_string());
                argv.push(command.to_string());
            }
        }
        argv
    }

    /// Argv for an interactive session (background transports).
    pub fn interactive_argv(&self) -> Vec<String> {
        let mut argv = vec![self.program.display().to_string()];
        match self.kind {
            ShellKind::Zsh | ShellKind::Bash | ShellKind::Sh => argv.push("-i".to_string()),
            ShellKind::PowerShell => argv.push("-NoLogo".to_string()),
            ShellKind::Cmd => {}
        }
        argv
    }
}

#[cfg(unix)]
const CANDIDATES: &[ShellKind] = &[ShellKind::Zsh, ShellKind::Bash, ShellKind::Sh];
#[cfg(windows)]
const CANDIDATES: &[ShellKind] = &[ShellKind::PowerShell, ShellKind::Cmd];
#[cfg(not(any(unix, windows)))]
const CANDIDATES: &[ShellKind] = &[ShellKind::Sh];

fn availability_cache() -> &'static Mutex<HashMap<ShellKind, bool>> {
    static CACHE: OnceLock<Mutex<HashMap<ShellKind, bool>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn probe(kind: ShellKind) -> bool {
    Command::new(kind.program())
        .args(kind.probe_args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn is_available(kind: ShellKind) -> bool {
    let Ok(mut cache) = availability_cache().lock() else {
        return probe(kind);
    };
    if let Some(known) = cache.get(&kind) {
        return *known;
    }
    let available = probe(kind);
    cache.insert(kind, available);
    available
}

/// Returns the first runnable shell in platform preference order, or `None`
/// when nothing on the candidate list launches.
pub fn resolve_shell() -> Option<ResolvedShell> {
    resolve_preferred(None)
}

/// Like [`resolve_shell`], but tries `preferred` first when given.
pub fn resolve_preferred(preferred: Option<ShellKind>) -> Option<ResolvedShell> {
    let ordered = preferred
        .into_iter()
        .chain(CANDIDATES.iter().copied())
        .collect::<Vec<_>>();
    for kind in ordered {
        if is_available(kind) {
            return Some(ResolvedShell {
                kind,
                program: PathBuf::from(kind.program()),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn resolves_some_posix_shell() {
        let shell = resolve_shell().expect("a posix host has at least /bin/sh");
        assert!(shell.kind.is_posix());
    }

    #[cfg(unix)]
    #[test]
    fn cache_is_stable_across_calls() {
        let first = resolve_shell();
        let second = resolve_shell();
        assert_eq!(first, second);
    }

    #[test]
    fn command_argv_wraps_with_dash_c() {
        let shell = ResolvedShell {
            kind: ShellKind::Bash,
            program: PathBuf::from("bash"),
        };
        assert_eq!(
            shell.command_argv("echo hi"),
            vec!["bash".to_string(), "-c".to_string(), "echo hi".to_string()]
        );
    }
}

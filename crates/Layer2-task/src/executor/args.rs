//! Argument vector for the agent CLI
//!
//! Layout: `<add-dir flag> <dir> [extra args...] <prompt flag> <task text>`.
//! The prompt flag and task text are always the final two tokens.

use relay_foundation::{Error, Result};
use std::path::{Path, PathBuf};

/// Flags that would conflict with the forced one-shot, non-interactive mode
pub const DEFAULT_DENIED_FLAGS: &[&str] = &[
    // print mode (we add our own)
    "-p",
    "--print",
    // auto-confirm
    "-y",
    "--yes",
    "--dangerously-skip-permissions",
    // cache control
    "--cache",
    "--no-cache",
];

/// Resolve the directory the agent runs in.
///
/// A provided directory must exist; it is returned canonicalized. Without one
/// the process's current directory is used.
pub fn resolve_working_dir(dir: Option<&Path>) -> Result<PathBuf> {
    match dir {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(Error::Config(format!(
                    "Working directory does not exist: {}",
                    dir.display()
                )));
            }
            std::fs::canonicalize(dir).map_err(|e| {
                Error::Config(format!(
                    "Cannot resolve working directory {}: {}",
                    dir.display(),
                    e
                ))
            })
        }
        None => std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e))),
    }
}

/// Whether `arg` is one of `denied`, either bare or as `--flag=value`
fn is_denied(arg: &str, denied: &[String]) -> bool {
    let name = arg.split_once('=').map_or(arg, |(name, _)| name);
    denied.iter().any(|d| d == name)
}

/// Drop denied flags from caller-supplied arguments
pub fn strip_denied(extra_args: &[String], denied: &[String]) -> Vec<String> {
    extra_args
        .iter()
        .filter(|arg| !is_denied(arg, denied))
        .cloned()
        .collect()
}

/// Build the full argument vector
pub fn build_args(
    add_dir_flag: &str,
    prompt_flag: &str,
    denied: &[String],
    working_dir: &Path,
    extra_args: &[String],
    task: &str,
) -> Vec<String> {
    let mut args = Vec::with_capacity(extra_args.len() + 4);
    args.push(add_dir_flag.to_string());
    args.push(working_dir.to_string_lossy().into_owned());
    args.extend(strip_denied(extra_args, denied));
    args.push(prompt_flag.to_string());
    args.push(task.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied() -> Vec<String> {
        DEFAULT_DENIED_FLAGS.iter().map(|s| s.to_string()).collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prompt_is_last_two_tokens() {
        let args = build_args(
            "--add-dir",
            "-p",
            &denied(),
            Path::new("/work"),
            &strings(&["--model", "sonnet"]),
            "refactor the parser",
        );
        assert_eq!(
            args,
            strings(&[
                "--add-dir",
                "/work",
                "--model",
                "sonnet",
                "-p",
                "refactor the parser"
            ])
        );
    }

    #[test]
    fn test_denied_flags_removed() {
        let extra = strings(&[
            "--print",
            "-p",
            "--yes",
            "--no-cache",
            "--cache=off",
            "--verbose",
            "--dangerously-skip-permissions",
        ]);
        assert_eq!(strip_denied(&extra, &denied()), strings(&["--verbose"]));
    }

    #[test]
    fn test_task_text_not_stripped() {
        // the task text is appended after filtering, so even "-p" survives
        let args = build_args("--add-dir", "-p", &denied(), Path::new("/w"), &[], "-p");
        assert_eq!(args[args.len() - 2], "-p");
        assert_eq!(args[args.len() - 1], "-p");
    }

    #[test]
    fn test_resolve_missing_dir_is_config_error() {
        let missing = std::env::temp_dir().join(format!("relay-missing-{}", uuid::Uuid::new_v4()));
        let err = resolve_working_dir(Some(&missing)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_resolve_defaults_to_cwd() {
        let dir = resolve_working_dir(None).unwrap();
        assert_eq!(dir, std::env::current_dir().unwrap());
    }

    #[test]
    fn test_resolve_is_absolute() {
        let dir = resolve_working_dir(Some(Path::new("."))).unwrap();
        assert!(dir.is_absolute());
    }
}

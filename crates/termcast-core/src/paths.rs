//! Default locations for recordings.
//!
//! Resolution order for the output directory:
//!
//! 1. `TERMCAST_RECORDING_DIR`, if set and non-empty
//! 2. `$XDG_STATE_HOME/termcast/recordings`
//! 3. `$HOME/.local/state/termcast/recordings` (Unix) or
//!    `%LOCALAPPDATA%\termcast\recordings` (Windows)
//! 4. `./termcast-recordings`

use std::path::PathBuf;

/// Environment variable overriding the recording directory.
pub const RECORDING_DIR_ENV: &str = "TERMCAST_RECORDING_DIR";

/// Resolve the default recording directory from the process environment.
pub fn default_output_dir() -> PathBuf {
    resolve_output_dir(|key| std::env::var(key).ok())
}

/// Resolve the default recording directory using `lookup` for variables.
pub fn resolve_output_dir<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(dir) = var(RECORDING_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(state) = var("XDG_STATE_HOME") {
        return PathBuf::from(state).join("termcast").join("recordings");
    }

    #[cfg(windows)]
    {
        if let Some(local) = var("LOCALAPPDATA") {
            return PathBuf::from(local).join("termcast").join("recordings");
        }
    }

    #[cfg(not(windows))]
    {
        if let Some(home) = var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("termcast")
                .join("recordings");
        }
    }

    PathBuf::from("termcast-recordings")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_explicit_override_wins() {
        let dir = resolve_output_dir(env(&[
            (RECORDING_DIR_ENV, "/data/casts"),
            ("XDG_STATE_HOME", "/state"),
        ]));
        assert_eq!(dir, PathBuf::from("/data/casts"));
    }

    #[test]
    fn test_empty_override_ignored() {
        let dir = resolve_output_dir(env(&[(RECORDING_DIR_ENV, " "), ("XDG_STATE_HOME", "/state")]));
        assert_eq!(dir, PathBuf::from("/state/termcast/recordings"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_home_fallback() {
        let dir = resolve_output_dir(env(&[("HOME", "/home/agent")]));
        assert_eq!(
            dir,
            PathBuf::from("/home/agent/.local/state/termcast/recordings")
        );
    }

    #[test]
    fn test_last_resort_is_relative() {
        let dir = resolve_output_dir(env(&[]));
        assert_eq!(dir, PathBuf::from("termcast-recordings"));
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware data directory resolution.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "bonwerk";

/// Return the application data directory, creating it if needed.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = base_dir(
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
    .join(APP_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// XDG data dir, then `~/.local/share`, then `/tmp`.
fn base_dir(xdg: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    let non_empty = |p: &PathBuf| !p.as_os_str().is_empty();
    if let Some(xdg) = xdg.filter(non_empty) {
        return xdg;
    }
    if let Some(home) = home.filter(non_empty) {
        return home.join(".local").join("share");
    }
    Path::new("/tmp").to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_wins_over_home() {
        let base = base_dir(Some("/xdg".into()), Some("/home/me".into()));
        assert_eq!(base, PathBuf::from("/xdg"));
    }

    #[test]
    fn home_then_tmp() {
        assert_eq!(
            base_dir(None, Some("/home/me".into())),
            PathBuf::from("/home/me/.local/share")
        );
        assert_eq!(base_dir(Some("".into()), None), PathBuf::from("/tmp"));
    }
}

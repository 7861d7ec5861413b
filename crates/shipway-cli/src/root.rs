use std::path::{Path, PathBuf};

/// Resolve the shipway root directory.
///
/// Priority:
/// 1. `--root` flag / `SHIPWAY_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.shipway/`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_up(&cwd, ".shipway")
        .or_else(|| find_up(&cwd, ".git"))
        .unwrap_or(cwd)
}

/// Nearest ancestor of `start` (inclusive) containing a `marker` directory.
fn find_up(start: &Path, marker: &str) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        if dir.join(marker).is_dir() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

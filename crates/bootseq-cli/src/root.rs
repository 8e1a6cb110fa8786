use bootseq_core::config::CONFIG_FILE_NAME;
use std::path::{Path, PathBuf};

/// Locate the config file.
///
/// Priority:
/// 1. `--config` flag / `BOOTSEQ_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `bootseq.yaml`
/// 3. None: run on defaults plus environment
pub fn resolve_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }

    let cwd = std::env::current_dir().ok()?;
    find_upward(&cwd)
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_config_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.yaml");
        assert_eq!(resolve_config(Some(&path)), Some(path));
    }

    #[test]
    fn finds_config_in_ancestor() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{}\n").unwrap();
        let subdir = dir.path().join("app/deep");
        std::fs::create_dir_all(&subdir).unwrap();

        assert_eq!(
            find_upward(&subdir),
            Some(dir.path().join(CONFIG_FILE_NAME))
        );
    }

    #[test]
    fn directory_named_like_config_is_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_ne!(
            find_upward(dir.path()),
            Some(dir.path().join(CONFIG_FILE_NAME))
        );
    }
}

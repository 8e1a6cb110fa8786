use crate::error::Result;
use std::path::Path;

/// Replace every line that is exactly `from` with `to`. Returns `true` if the
/// file existed and at least one line changed; a missing file is left alone.
///
/// The file is rewritten in place through its resolved path, so symlinks,
/// permissions and single-file bind mounts survive the update.
pub fn replace_line(path: &Path, from: &str, to: &str) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let target = std::fs::canonicalize(path)?;
    let content = std::fs::read_to_string(&target)?;
    let mut changed = false;
    let mut updated = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        if body == from {
            updated.push_str(to);
            updated.push_str(&line[body.len()..]);
            changed = true;
        } else {
            updated.push_str(line);
        }
    }
    if changed {
        std::fs::write(&target, updated)?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn replace_line_swaps_exact_match_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "A=1\nKEY=old\nKEY=old-but-not-exact\n").unwrap();

        assert!(replace_line(&path, "KEY=old", "KEY=new").unwrap());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "A=1\nKEY=new\nKEY=old-but-not-exact\n");
    }

    #[test]
    fn replace_line_without_match_leaves_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "A=1").unwrap();
        assert!(!replace_line(&path, "B=2", "B=3").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=1");
    }

    #[test]
    fn replace_line_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        assert!(!replace_line(&dir.path().join("absent"), "a", "b").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn replace_line_writes_through_symlink_and_keeps_mode() {
        use std::os::unix::fs::{symlink, PermissionsExt};

        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real/.env");
        std::fs::create_dir_all(real.parent().unwrap()).unwrap();
        std::fs::write(&real, "A=1\nKEY=old\n").unwrap();
        std::fs::set_permissions(&real, std::fs::Permissions::from_mode(0o644)).unwrap();
        let link = dir.path().join(".env");
        symlink(&real, &link).unwrap();

        assert!(replace_line(&link, "KEY=old", "KEY=new").unwrap());

        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&real).unwrap(), "A=1\nKEY=new\n");
        let mode = std::fs::metadata(&real).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }
}

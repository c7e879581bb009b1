use std::path::{Path, PathBuf};

fn strip_root(path: &Path) -> &Path {
    match path.strip_prefix("/") {
        Ok(relative) => relative,
        Err(_) => path,
    }
}

/// Returns the path obtained by joining the given base path with the given relative path.
pub fn join_relative(base: impl AsRef<Path>, relative: impl AsRef<Path>) -> PathBuf {
    base.as_ref().join(strip_root(relative.as_ref()))
}

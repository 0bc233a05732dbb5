//! Pure sandbox rules for RUN argv splitting and EDIT path containment.

use std::path::{Component, Path, PathBuf};

/// Split a command line into argv using POSIX shell-word rules.
///
/// Quotes and backslash escapes are honored; nothing is expanded. Returns
/// `None` for blank input or unbalanced quoting.
pub fn split_argv(cmd: &str) -> Option<Vec<String>> {
    let argv = shlex::split(cmd)?;
    if argv.is_empty() { None } else { Some(argv) }
}

/// Join `file_path` onto `root` and collapse `.` and `..` without touching the
/// filesystem.
///
/// Returns `None` when the result is not a strict descendant of `root`.
pub fn join_within(root: &Path, file_path: &str) -> Option<PathBuf> {
    let joined = normalize_lexically(&root.join(file_path));
    is_strict_descendant(root, &joined).then_some(joined)
}

/// True when `path` lies under `root` and is not `root` itself.
pub fn is_strict_descendant(root: &Path, path: &Path) -> bool {
    path != root && path.starts_with(root)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    out
}

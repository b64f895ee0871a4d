use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::error::QuillErr;
use crate::error::Result;
use crate::error::WrongKind;

/// What the caller expects the resolved path to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Dir,
    Any,
}

/// An absolute path plus, when it lies inside the sandbox, its
/// sandbox-relative form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    pub abs: PathBuf,
    pub rel: Option<PathBuf>,
}

/// Resolves a user-supplied path to absolute form relative to `sandbox`.
///
/// Relative inputs are joined onto the sandbox root; `.` and `..` are
/// cleaned lexically. When `require_exists` is set the result is stat'ed
/// (following symlinks) and checked against `want`. Escaping the sandbox is
/// not an error here: the authorizer is the boundary, this function only
/// reports whether a relative form exists.
pub fn normalize(
    input: &str,
    sandbox: &Path,
    want: PathKind,
    require_exists: bool,
) -> Result<NormalizedPath> {
    if input.is_empty() {
        return Err(QuillErr::InvalidInput("empty path".to_string()));
    }
    if !sandbox.is_absolute() {
        return Err(QuillErr::InvalidInput(format!(
            "sandbox directory must be absolute: {}",
            sandbox.display()
        )));
    }

    let joined = {
        let input = Path::new(input);
        if input.is_absolute() {
            input.to_path_buf()
        } else {
            sandbox.join(input)
        }
    };
    let abs = clean(&joined);

    if require_exists {
        let meta = std::fs::metadata(&abs).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => QuillErr::PathNotFound(abs.clone()),
            _ => QuillErr::Io(e),
        })?;
        match want {
            PathKind::File if !meta.is_file() => {
                return Err(QuillErr::PathWrongKind {
                    path: abs,
                    kind: WrongKind::ExpectedFile,
                });
            }
            PathKind::Dir if !meta.is_dir() => {
                return Err(QuillErr::PathWrongKind {
                    path: abs,
                    kind: WrongKind::ExpectedDir,
                });
            }
            _ => {}
        }
    }

    let rel = abs
        .strip_prefix(sandbox)
        .ok()
        .map(|r| r.to_path_buf())
        .filter(|r| !r.as_os_str().is_empty() || abs == sandbox);

    Ok(NormalizedPath { abs, rel })
}

/// Removes `.` components and resolves `..` lexically, without touching the
/// filesystem. Works for paths that do not exist yet.
pub(crate) fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True when `path` equals `root` or lives underneath it. Both sides must
/// already be cleaned absolute paths.
pub(crate) fn is_under(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn joins_relative_input_onto_sandbox() {
        let n = normalize("a/b.txt", Path::new("/work"), PathKind::Any, false).unwrap();
        assert_eq!(n.abs, PathBuf::from("/work/a/b.txt"));
        assert_eq!(n.rel, Some(PathBuf::from("a/b.txt")));
    }

    #[test]
    fn cleans_dot_and_dotdot() {
        let n = normalize("a/./b/../c.txt", Path::new("/work"), PathKind::Any, false).unwrap();
        assert_eq!(n.abs, PathBuf::from("/work/a/c.txt"));

        // `..` can climb out of the sandbox; the relative form disappears
        // but the call itself succeeds.
        let n = normalize("../etc/passwd", Path::new("/work"), PathKind::Any, false).unwrap();
        assert_eq!(n.abs, PathBuf::from("/etc/passwd"));
        assert_eq!(n.rel, None);
    }

    #[test]
    fn absolute_input_outside_sandbox_has_no_relative_form() {
        let n = normalize("/etc/passwd", Path::new("/work"), PathKind::Any, false).unwrap();
        assert_eq!(n.abs, PathBuf::from("/etc/passwd"));
        assert_eq!(n.rel, None);
    }

    #[test]
    fn sandbox_root_itself_is_relative_empty() {
        let n = normalize("/work", Path::new("/work"), PathKind::Any, false).unwrap();
        assert_eq!(n.rel, Some(PathBuf::new()));
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(matches!(
            normalize("", Path::new("/work"), PathKind::Any, false),
            Err(QuillErr::InvalidInput(_))
        ));
    }

    #[test]
    fn join_back_invariant_holds() {
        let sandbox = Path::new("/work");
        for input in ["x.txt", "a/b/../c", "/work/deep/file", "./d"] {
            let n = normalize(input, sandbox, PathKind::Any, false).unwrap();
            if let Some(rel) = &n.rel {
                assert_eq!(clean(&sandbox.join(rel)), n.abs);
                assert!(n.abs == sandbox || n.abs.starts_with(sandbox));
            }
        }
    }

    #[test]
    fn require_exists_checks_kind() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = dir.path().canonicalize().unwrap();
        std::fs::write(sandbox.join("f.txt"), b"x").unwrap();
        std::fs::create_dir(sandbox.join("d")).unwrap();

        assert!(normalize("f.txt", &sandbox, PathKind::File, true).is_ok());
        assert!(matches!(
            normalize("f.txt", &sandbox, PathKind::Dir, true),
            Err(QuillErr::PathWrongKind {
                kind: WrongKind::ExpectedDir,
                ..
            })
        ));
        assert!(matches!(
            normalize("d", &sandbox, PathKind::File, true),
            Err(QuillErr::PathWrongKind {
                kind: WrongKind::ExpectedFile,
                ..
            })
        ));
        assert!(matches!(
            normalize("missing.txt", &sandbox, PathKind::Any, true),
            Err(QuillErr::PathNotFound(_))
        ));
        // Without require_exists the same path is fine.
        assert!(normalize("missing.txt", &sandbox, PathKind::Any, false).is_ok());
    }

    #[test]
    fn symlinks_are_followed_for_classification() {
        #[cfg(unix)]
        {
            let dir = tempfile::tempdir().unwrap();
            let sandbox = dir.path().canonicalize().unwrap();
            std::fs::create_dir(sandbox.join("real")).unwrap();
            std::os::unix::fs::symlink(sandbox.join("real"), sandbox.join("link")).unwrap();

            assert!(normalize("link", &sandbox, PathKind::Dir, true).is_ok());
        }
    }
}

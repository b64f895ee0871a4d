use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;

use wildmatch::WildMatch;

use crate::error::QuillErr;
use crate::error::Result;
use crate::paths::clean;

/// A rooted set of included directories inside the sandbox that a subagent
/// is jailed to.
///
/// Invariants: `base_dir` is always included, and every other included
/// directory has an included parent (reachability). A file counts as
/// included iff its parent directory is in the set; a non-existent path is
/// included iff its parent is, so tools can authorize creation of new files.
#[derive(Debug, Clone)]
pub struct CodeUnit {
    base_dir: PathBuf,
    included: BTreeSet<PathBuf>,
}

impl CodeUnit {
    pub fn new(base_dir: &Path) -> Result<Self> {
        if !base_dir.is_absolute() {
            return Err(QuillErr::InvalidInput(format!(
                "code unit base must be absolute: {}",
                base_dir.display()
            )));
        }
        let base_dir = clean(base_dir);
        let mut included = BTreeSet::new();
        included.insert(base_dir.clone());
        Ok(Self { base_dir, included })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Includes every directory reachable from the base.
    pub fn include_entire_subtree(&mut self) -> Result<()> {
        let mut queue = VecDeque::from([self.base_dir.clone()]);
        while let Some(dir) = queue.pop_front() {
            self.included.insert(dir.clone());
            for sub in subdirectories(&dir)? {
                queue.push_back(sub);
            }
        }
        Ok(())
    }

    /// Includes the directory at `rel` (resolved against the base). Fails
    /// with `ParentNotIncluded` when the parent is not already included,
    /// which maintains reachability. With `recursive`, every directory
    /// underneath is included as well.
    pub fn include_dir(&mut self, rel: &Path, recursive: bool) -> Result<()> {
        let abs = clean(&self.base_dir.join(rel));
        if abs != self.base_dir {
            let parent = abs
                .parent()
                .ok_or_else(|| QuillErr::InvalidInput(format!("no parent: {}", abs.display())))?;
            if !self.included.contains(parent) {
                return Err(QuillErr::ParentNotIncluded(parent.to_path_buf()));
            }
        }
        if recursive {
            let mut queue = VecDeque::from([abs]);
            while let Some(dir) = queue.pop_front() {
                self.included.insert(dir.clone());
                for sub in subdirectories(&dir)? {
                    queue.push_back(sub);
                }
            }
        } else {
            self.included.insert(abs);
        }
        Ok(())
    }

    /// Breadth-first inclusion from the base that refuses to enter any
    /// directory containing a file whose name matches one of `globs`. The
    /// base itself stays included regardless, but a match there stops the
    /// walk immediately.
    pub fn include_subtree_unless_contains(&mut self, globs: &[&str]) -> Result<()> {
        let matchers: Vec<WildMatch> = globs.iter().map(|g| WildMatch::new(g)).collect();
        let mut queue = VecDeque::from([self.base_dir.clone()]);
        while let Some(dir) = queue.pop_front() {
            if dir != self.base_dir && contains_matching_file(&dir, &matchers)? {
                continue;
            }
            self.included.insert(dir.clone());
            if dir == self.base_dir && contains_matching_file(&dir, &matchers)? {
                break;
            }
            for sub in subdirectories(&dir)? {
                queue.push_back(sub);
            }
        }
        Ok(())
    }

    /// Iteratively removes included leaves that are not the base, have no
    /// included children, and contain no regular files on disk. Unreadable
    /// directories count as empty.
    pub fn prune_empty_dirs(&mut self) {
        loop {
            let removable: Vec<PathBuf> = self
                .included
                .iter()
                .filter(|d| {
                    **d != self.base_dir
                        && !self.has_included_child(d)
                        && !has_non_dir_entries(d)
                })
                .cloned()
                .collect();
            if removable.is_empty() {
                break;
            }
            for d in removable {
                self.included.remove(&d);
            }
        }
    }

    /// Whether `path` is covered by this code unit. Directories must be in
    /// the included set themselves; files (and paths that do not exist yet)
    /// are covered when their parent directory is included.
    pub fn includes(&self, path: &Path) -> bool {
        let path = clean(path);
        if path.is_dir() {
            return self.included.contains(&path);
        }
        match path.parent() {
            Some(parent) => self.included.contains(parent),
            None => false,
        }
    }

    /// All regular files directly inside included directories, sorted.
    pub fn included_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for dir in &self.included {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }

    pub fn included_dirs(&self) -> impl Iterator<Item = &Path> {
        self.included.iter().map(PathBuf::as_path)
    }

    fn has_included_child(&self, dir: &Path) -> bool {
        self.included
            .iter()
            .any(|d| d != dir && d.parent() == Some(dir))
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        // Do not follow directory symlinks; a link pointing outside the
        // sandbox must not drag its target into the unit.
        if entry.file_type()?.is_dir() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn contains_matching_file(dir: &Path, matchers: &[WildMatch]) -> Result<bool> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if matchers.iter().any(|m| m.matches(&name)) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn has_non_dir_entries(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => continue,
            _ => return true,
        }
    }
    false
}

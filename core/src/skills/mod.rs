mod frontmatter;

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use tracing::warn;

use crate::auth::AccessKind;
use crate::auth::Authorizer;
use crate::code_unit::CodeUnit;
use crate::error::QuillErr;
use crate::error::Result;

pub use frontmatter::FrontMatterError;

const MAX_NAME_LEN: usize = 64;
const MAX_DESCRIPTION_LEN: usize = 1024;
const MAX_COMPATIBILITY_LEN: usize = 500;

/// A named, on-disk instruction bundle the model can follow, loaded from a
/// directory containing a `SKILL.md` with front-matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub abs_dir: PathBuf,
    pub name: String,
    pub description: String,
    pub license: Option<String>,
    pub compatibility: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub body: String,
}

impl Skill {
    /// Path to the skill's `SKILL.md`, as advertised to the model.
    pub fn skill_md_path(&self) -> PathBuf {
        self.abs_dir.join("SKILL.md")
    }

    /// Entity-level validation, separate from load: a skill can load fine
    /// and still be invalid.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(QuillErr::InvalidInput(format!(
                "skill name must be 1-{MAX_NAME_LEN} characters: {:?}",
                self.name
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(QuillErr::InvalidInput(format!(
                "skill name may only contain lowercase letters, digits, and hyphens: {:?}",
                self.name
            )));
        }
        if self.name.starts_with('-') || self.name.ends_with('-') || self.name.contains("--") {
            return Err(QuillErr::InvalidInput(format!(
                "skill name has a misplaced hyphen: {:?}",
                self.name
            )));
        }
        let basename = self.abs_dir.file_name().map(|n| n.to_string_lossy());
        if basename.as_deref() != Some(self.name.as_str()) {
            return Err(QuillErr::InvalidInput(format!(
                "skill directory {:?} does not match name {:?}",
                self.abs_dir, self.name
            )));
        }
        if self.description.is_empty() || self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(QuillErr::InvalidInput(format!(
                "skill description must be 1-{MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if let Some(compat) = &self.compatibility
            && compat.len() > MAX_COMPATIBILITY_LEN
        {
            return Err(QuillErr::InvalidInput(format!(
                "skill compatibility must be at most {MAX_COMPATIBILITY_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// Result of scanning skill directories: loadable-and-valid, loadable but
/// failing entity validation, and unloadable.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub valid: Vec<Skill>,
    pub invalid: Vec<(Skill, QuillErr)>,
    pub failed: Vec<(PathBuf, QuillErr)>,
}

/// Loads a skill from a directory containing `SKILL.md` (any case) or from
/// the file itself. Absent or malformed front-matter is a load error;
/// entity validation is the caller's separate step.
pub async fn load_skill(path: &Path) -> Result<Skill> {
    let (dir, file) = if tokio::fs::metadata(path).await?.is_dir() {
        let file = find_skill_md(path).await?.ok_or_else(|| {
            QuillErr::InvalidInput(format!("no SKILL.md in {}", path.display()))
        })?;
        (path.to_path_buf(), file)
    } else {
        let dir = path
            .parent()
            .ok_or_else(|| QuillErr::InvalidInput(format!("no parent: {}", path.display())))?
            .to_path_buf();
        (dir, path.to_path_buf())
    };

    let content = tokio::fs::read_to_string(&file).await?;
    let parsed = frontmatter::parse(&content)
        .map_err(|e| QuillErr::InvalidInput(format!("{}: {e}", file.display())))?;

    let scalar = |key: &str| parsed.scalars.get(key).cloned();
    Ok(Skill {
        abs_dir: dir,
        name: scalar("name").unwrap_or_default(),
        description: scalar("description").unwrap_or_default(),
        license: scalar("license"),
        compatibility: scalar("compatibility"),
        metadata: parsed.maps.get("metadata").cloned().unwrap_or_default(),
        body: parsed.body,
    })
}

/// Walks each directory one level deep and loads every subdirectory that
/// carries a `SKILL.md`. Missing directories contribute nothing; only
/// non-recoverable I/O errors surface as the function's error.
pub async fn load_skills(dirs: &[PathBuf]) -> Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();
    for dir in dirs {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let sub = entry.path();
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match find_skill_md(&sub).await {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(err) => {
                    warn!("failed to scan {}: {err}", sub.display());
                    outcome.failed.push((sub, err));
                    continue;
                }
            }
            match load_skill(&sub).await {
                Ok(skill) => match skill.validate() {
                    Ok(()) => outcome.valid.push(skill),
                    Err(err) => {
                        warn!("invalid skill at {}: {err}", sub.display());
                        outcome.invalid.push((skill, err));
                    }
                },
                Err(err) => {
                    warn!("failed to load skill at {}: {err}", sub.display());
                    outcome.failed.push((sub, err));
                }
            }
        }
    }
    outcome.valid.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(outcome)
}

/// Grants read access to each skill directory so read/list tools can see
/// skill files outside the normal jail. Skills whose directory is already
/// inside the active code unit need no extra grant.
pub fn authorize_skills(
    skills: &[Skill],
    authorizer: &Authorizer,
    code_unit: Option<&Arc<Mutex<CodeUnit>>>,
) -> Result<()> {
    for skill in skills {
        if let Some(unit) = code_unit {
            #[allow(clippy::unwrap_used)] // poisoned mutex should fail the program
            let inside = unit.lock().unwrap().includes(&skill.abs_dir);
            if inside {
                continue;
            }
        }
        authorizer.grant(AccessKind::Read, &skill.abs_dir)?;
    }
    Ok(())
}

/// Renders the system-prompt fragment enumerating the available skills.
/// In package mode the model is additionally told to keep its hands off
/// the shell tool unless a skill says otherwise.
pub fn skills_prompt(skills: &[Skill], shell_tool_name: &str, is_package_mode: bool) -> String {
    if skills.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Skills\n\n");
    out.push_str(
        "The following skills are available. Each is a directory with a SKILL.md \
         describing when and how to apply it.\n\n",
    );
    for skill in skills {
        out.push_str(&format!(
            "- **{}**: {} ({})\n",
            skill.name,
            skill.description,
            skill.skill_md_path().display()
        ));
    }
    out.push_str(
        "\nWhen a request matches a skill's description, read its SKILL.md and \
         follow the instructions inside before doing anything else.\n",
    );
    if is_package_mode {
        out.push_str(&format!(
            "Do not use the `{shell_tool_name}` tool except as directed by a skill.\n"
        ));
    }
    out
}

async fn find_skill_md(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file()
            && entry.file_name().to_string_lossy().eq_ignore_ascii_case("SKILL.md")
        {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

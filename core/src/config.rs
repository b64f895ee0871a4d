use std::path::PathBuf;

use serde::Deserialize;

use crate::error::QuillErr;
use crate::error::Result;

/// How eagerly the session escalates denied operations to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Ask the user whenever a tool requests permission.
    #[default]
    OnRequest,
    /// Never ask; denied stays denied (unattended runs pair this with the
    /// auto-approve domain).
    Never,
}

/// Resolved session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Outer boundary for all file and shell operations.
    pub sandbox_dir: PathBuf,
    pub approval_mode: ApprovalMode,
    /// Allow-listed shell commands, as argv prefixes. Richer per-argument
    /// rules are built programmatically on top of these.
    pub shell_allowed: Vec<Vec<String>>,
    /// Directories scanned for skills, one level deep.
    pub skill_dirs: Vec<PathBuf>,
    /// Base URL of the monitor host; `None` disables the monitor.
    pub monitor_host: Option<String>,
    pub monitor_build_token: Option<String>,
}

/// Optional overrides applied on top of the file-based configuration,
/// typically sourced from flags by the embedding binary.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub sandbox_dir: Option<PathBuf>,
    pub approval_mode: Option<ApprovalMode>,
    pub monitor_host: Option<String>,
}

/// Serde target for the on-disk TOML. All fields are optional so a missing
/// or partial file still loads.
#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    sandbox_dir: Option<PathBuf>,
    approval_mode: Option<ApprovalMode>,
    #[serde(default)]
    shell_allowed: Vec<Vec<String>>,
    #[serde(default)]
    skill_dirs: Vec<PathBuf>,
    monitor_host: Option<String>,
    monitor_build_token: Option<String>,
}

impl Config {
    /// Loads `config.toml` from the quill home directory (`~/.quill` unless
    /// `QUILL_HOME` is set), then applies `overrides`. A missing file is
    /// treated as empty.
    pub fn load_with_overrides(overrides: ConfigOverrides) -> Result<Self> {
        let config_path = quill_home()?.join("config.toml");
        let toml: ConfigToml = match std::fs::read_to_string(&config_path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| QuillErr::InvalidInput(format!("{}: {e}", config_path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigToml::default(),
            Err(e) => return Err(e.into()),
        };
        Self::from_parts(toml, overrides)
    }

    fn from_parts(toml: ConfigToml, overrides: ConfigOverrides) -> Result<Self> {
        let sandbox_dir = overrides
            .sandbox_dir
            .or(toml.sandbox_dir)
            .map(|p| {
                if p.is_absolute() {
                    Ok::<PathBuf, QuillErr>(p)
                } else {
                    Ok(std::env::current_dir()?.join(p))
                }
            })
            .transpose()?
            .map_or_else(std::env::current_dir, Ok)?;

        Ok(Self {
            sandbox_dir,
            approval_mode: overrides
                .approval_mode
                .or(toml.approval_mode)
                .unwrap_or_default(),
            shell_allowed: toml.shell_allowed,
            skill_dirs: toml.skill_dirs,
            monitor_host: overrides.monitor_host.or(toml.monitor_host),
            monitor_build_token: toml.monitor_build_token,
        })
    }
}

fn quill_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("QUILL_HOME") {
        if home.is_empty() {
            return Err(QuillErr::InvalidInput("QUILL_HOME is empty".to_string()));
        }
        return Ok(PathBuf::from(home));
    }
    let mut home = dirs::home_dir()
        .ok_or_else(|| QuillErr::InvalidInput("could not resolve home directory".to_string()))?;
    home.push(".quill");
    Ok(home)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn overrides_win_over_file_values() {
        let toml: ConfigToml = toml::from_str(
            r#"
sandbox_dir = "/work"
approval_mode = "never"
shell_allowed = [["git", "status"], ["ls"]]
skill_dirs = ["/skills"]
monitor_host = "https://monitor.example"
"#,
        )
        .unwrap();
        let config = Config::from_parts(
            toml,
            ConfigOverrides {
                sandbox_dir: Some(PathBuf::from("/elsewhere")),
                approval_mode: Some(ApprovalMode::OnRequest),
                monitor_host: None,
            },
        )
        .unwrap();

        assert_eq!(config.sandbox_dir, PathBuf::from("/elsewhere"));
        assert_eq!(config.approval_mode, ApprovalMode::OnRequest);
        assert_eq!(config.shell_allowed.len(), 2);
        assert_eq!(config.skill_dirs, vec![PathBuf::from("/skills")]);
        assert_eq!(
            config.monitor_host.as_deref(),
            Some("https://monitor.example")
        );
    }

    #[test]
    fn empty_config_defaults_to_cwd_sandbox() {
        let config = Config::from_parts(ConfigToml::default(), ConfigOverrides::default()).unwrap();
        assert_eq!(config.sandbox_dir, std::env::current_dir().unwrap());
        assert_eq!(config.approval_mode, ApprovalMode::OnRequest);
        assert!(config.monitor_host.is_none());
    }
}

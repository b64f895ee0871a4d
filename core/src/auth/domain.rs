use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use crate::auth::shell_rules::CommandRule;
use crate::auth::shell_rules::MatchContext;
use crate::code_unit::CodeUnit;
use crate::error::QuillErr;
use crate::error::Result;
use crate::paths::clean;
use crate::paths::is_under;

/// One layer of the authorization policy. Domains compose: the code-unit
/// domain wraps an inner domain and narrows it further. Every decision is
/// deny-by-default; an explicit rule must match.
pub trait Domain: Send + Sync {
    fn check_read(&self, path: &Path) -> Result<()>;
    fn check_write(&self, path: &Path) -> Result<()>;
    fn check_shell(&self, argv: &[String], cwd: &Path) -> Result<()>;
}

/// The outer boundary: reads and writes anywhere inside the sandbox
/// directory, shell invocations matching the allow-list. A read-only
/// sandbox denies every write.
pub struct SandboxDomain {
    sandbox_dir: PathBuf,
    shell_allowed: Vec<CommandRule>,
    writes_allowed: bool,
}

impl SandboxDomain {
    pub fn new(sandbox_dir: &Path, shell_allowed: Vec<CommandRule>) -> Result<Self> {
        if !sandbox_dir.is_absolute() {
            return Err(QuillErr::InvalidInput(format!(
                "sandbox directory must be absolute: {}",
                sandbox_dir.display()
            )));
        }
        Ok(Self {
            sandbox_dir: clean(sandbox_dir),
            shell_allowed,
            writes_allowed: true,
        })
    }

    pub fn read_only(mut self) -> Self {
        self.writes_allowed = false;
        self
    }

    pub fn sandbox_dir(&self) -> &Path {
        &self.sandbox_dir
    }
}

impl Domain for SandboxDomain {
    fn check_read(&self, path: &Path) -> Result<()> {
        if is_under(path, &self.sandbox_dir) {
            Ok(())
        } else {
            Err(QuillErr::PathOutsideSandbox(path.to_path_buf()))
        }
    }

    fn check_write(&self, path: &Path) -> Result<()> {
        if !self.writes_allowed {
            return Err(QuillErr::WriteDeniedReadOnlyDomain(path.to_path_buf()));
        }
        if is_under(path, &self.sandbox_dir) {
            Ok(())
        } else {
            Err(QuillErr::PathOutsideSandbox(path.to_path_buf()))
        }
    }

    fn check_shell(&self, argv: &[String], cwd: &Path) -> Result<()> {
        if !is_under(cwd, &self.sandbox_dir) {
            return Err(QuillErr::CwdOutsideSandbox(cwd.to_path_buf()));
        }
        let ctx = MatchContext {
            sandbox_dir: &self.sandbox_dir,
            cwd,
        };
        if self.shell_allowed.iter().any(|rule| rule.matches(argv, ctx)) {
            Ok(())
        } else {
            Err(QuillErr::ShellCommandNotAllowed(argv.join(" ")))
        }
    }
}

/// Inner jail: wraps another domain and additionally requires the path to
/// be covered by the code unit. Shell decisions are delegated unchanged.
pub struct CodeUnitDomain {
    inner: Box<dyn Domain>,
    unit: Arc<Mutex<CodeUnit>>,
}

impl CodeUnitDomain {
    pub fn new(inner: Box<dyn Domain>, unit: Arc<Mutex<CodeUnit>>) -> Self {
        Self { inner, unit }
    }

    fn check_unit(&self, path: &Path) -> Result<()> {
        #[allow(clippy::unwrap_used)] // poisoned mutex should fail the program
        let unit = self.unit.lock().unwrap();
        if unit.includes(path) {
            Ok(())
        } else {
            Err(QuillErr::PathOutsideCodeUnit(path.to_path_buf()))
        }
    }
}

impl Domain for CodeUnitDomain {
    fn check_read(&self, path: &Path) -> Result<()> {
        self.inner.check_read(path)?;
        self.check_unit(path)
    }

    fn check_write(&self, path: &Path) -> Result<()> {
        self.inner.check_write(path)?;
        self.check_unit(path)
    }

    fn check_shell(&self, argv: &[String], cwd: &Path) -> Result<()> {
        self.inner.check_shell(argv, cwd)
    }
}

/// Policy for unattended runs: reads anywhere, writes and shell confined to
/// the sandbox without consulting an allow-list.
pub struct AutoApproveDomain {
    sandbox_dir: PathBuf,
}

impl AutoApproveDomain {
    pub fn new(sandbox_dir: &Path) -> Result<Self> {
        if !sandbox_dir.is_absolute() {
            return Err(QuillErr::InvalidInput(format!(
                "sandbox directory must be absolute: {}",
                sandbox_dir.display()
            )));
        }
        Ok(Self {
            sandbox_dir: clean(sandbox_dir),
        })
    }
}

impl Domain for AutoApproveDomain {
    fn check_read(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn check_write(&self, path: &Path) -> Result<()> {
        if is_under(path, &self.sandbox_dir) {
            Ok(())
        } else {
            Err(QuillErr::PathOutsideSandbox(path.to_path_buf()))
        }
    }

    fn check_shell(&self, _argv: &[String], cwd: &Path) -> Result<()> {
        if is_under(cwd, &self.sandbox_dir) {
            Ok(())
        } else {
            Err(QuillErr::CwdOutsideSandbox(cwd.to_path_buf()))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::auth::shell_rules::ArgRule;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sandbox_domain_bounds_reads_and_writes() {
        let domain =
            SandboxDomain::new(Path::new("/work"), vec![CommandRule::new(["git", "status"])])
                .unwrap();

        assert!(domain.check_read(Path::new("/work/a/b.txt")).is_ok());
        assert!(matches!(
            domain.check_read(Path::new("/etc/passwd")),
            Err(QuillErr::PathOutsideSandbox(_))
        ));
        assert!(domain.check_write(Path::new("/work/out.txt")).is_ok());
        assert!(matches!(
            domain.check_write(Path::new("/tmp/out.txt")),
            Err(QuillErr::PathOutsideSandbox(_))
        ));
    }

    #[test]
    fn read_only_sandbox_denies_all_writes() {
        let domain = SandboxDomain::new(Path::new("/work"), Vec::new())
            .unwrap()
            .read_only();
        assert!(domain.check_read(Path::new("/work/a")).is_ok());
        assert!(matches!(
            domain.check_write(Path::new("/work/a")),
            Err(QuillErr::WriteDeniedReadOnlyDomain(_))
        ));
    }

    #[test]
    fn shell_requires_cwd_inside_sandbox_and_rule_match() {
        let domain = SandboxDomain::new(
            Path::new("/work"),
            vec![CommandRule::new(["ls"]).trailing(ArgRule::PathInSandbox)],
        )
        .unwrap();

        assert!(domain.check_shell(&argv(&["ls", "src"]), Path::new("/work")).is_ok());
        assert!(matches!(
            domain.check_shell(&argv(&["ls"]), Path::new("/tmp")),
            Err(QuillErr::CwdOutsideSandbox(_))
        ));
        assert!(matches!(
            domain.check_shell(&argv(&["rm", "-rf", "/"]), Path::new("/work")),
            Err(QuillErr::ShellCommandNotAllowed(_))
        ));
    }

    #[test]
    fn auto_approve_reads_anywhere_writes_in_sandbox() {
        let domain = AutoApproveDomain::new(Path::new("/work")).unwrap();
        assert!(domain.check_read(Path::new("/etc/passwd")).is_ok());
        assert!(domain.check_write(Path::new("/work/x")).is_ok());
        assert!(domain.check_write(Path::new("/etc/x")).is_err());
        assert!(domain.check_shell(&argv(&["make"]), Path::new("/work")).is_ok());
        assert!(domain.check_shell(&argv(&["make"]), Path::new("/opt")).is_err());
    }
}

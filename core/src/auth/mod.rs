// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

pub(crate) mod domain;
pub(crate) mod shell_rules;

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use tracing::debug;

use quill_protocol::ApprovalKind;
use quill_protocol::Approver;
use quill_protocol::ReviewDecision;

use crate::auth::domain::AutoApproveDomain;
use crate::auth::domain::CodeUnitDomain;
use crate::auth::domain::Domain;
use crate::auth::domain::SandboxDomain;
use crate::auth::shell_rules::CommandRule;
use crate::code_unit::CodeUnit;
use crate::error::QuillErr;
use crate::error::Result;
use crate::paths::clean;
use crate::paths::is_under;

/// The capability a grant extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Ephemeral per-session permission extensions, consulted before the domain
/// chain. A write grant implies read access to the same directory.
#[derive(Default)]
struct Grants {
    read_dirs: Vec<PathBuf>,
    write_dirs: Vec<PathBuf>,
    shell_prefixes: Vec<Vec<String>>,
}

impl Grants {
    fn allows_read(&self, path: &Path) -> bool {
        self.read_dirs
            .iter()
            .chain(self.write_dirs.iter())
            .any(|dir| is_under(path, dir))
    }

    fn allows_write(&self, path: &Path) -> bool {
        self.write_dirs.iter().any(|dir| is_under(path, dir))
    }

    fn allows_shell(&self, argv: &[String]) -> bool {
        self.shell_prefixes.iter().any(|prefix| {
            argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
        })
    }
}

/// Decides, per tool invocation, whether a read, write, or shell command is
/// permitted. Deny-by-default over a composable domain chain, with runtime
/// grants and an optional blocking approver for escalations.
pub struct Authorizer {
    domain: Box<dyn Domain>,
    grants: Mutex<Grants>,
    approver: Option<Arc<dyn Approver>>,
}

impl Authorizer {
    pub fn authorize_read(
        &self,
        request_permission: bool,
        reason: &str,
        tool: &str,
        path: &Path,
    ) -> Result<()> {
        let path = require_absolute(path)?;
        if self.grants.lock().unwrap().allows_read(&path) {
            return Ok(());
        }
        match self.domain.check_read(&path) {
            Ok(()) => Ok(()),
            Err(err) => self.escalate_path(err, request_permission, reason, tool, ApprovalKind::Read, &path),
        }
    }

    pub fn authorize_write(
        &self,
        request_permission: bool,
        reason: &str,
        tool: &str,
        path: &Path,
    ) -> Result<()> {
        let path = require_absolute(path)?;
        if self.grants.lock().unwrap().allows_write(&path) {
            return Ok(());
        }
        match self.domain.check_write(&path) {
            Ok(()) => Ok(()),
            Err(err) => self.escalate_path(err, request_permission, reason, tool, ApprovalKind::Write, &path),
        }
    }

    pub fn authorize_shell(
        &self,
        request_permission: bool,
        reason: &str,
        tool: &str,
        argv: &[String],
        cwd: &Path,
    ) -> Result<()> {
        if argv.is_empty() {
            return Err(QuillErr::InvalidInput("empty command".to_string()));
        }
        let cwd = require_absolute(cwd)?;
        if self.grants.lock().unwrap().allows_shell(argv) {
            return Ok(());
        }
        match self.domain.check_shell(argv, &cwd) {
            Ok(()) => Ok(()),
            Err(err) if err.is_authorization_denial() && request_permission => {
                let Some(approver) = &self.approver else {
                    return Err(err);
                };
                let target = argv.join(" ");
                match approver.ask(ApprovalKind::Shell, tool, &target, reason) {
                    ReviewDecision::Approve => Ok(()),
                    ReviewDecision::ApproveAndRemember => {
                        self.grants.lock().unwrap().shell_prefixes.push(argv.to_vec());
                        Ok(())
                    }
                    ReviewDecision::Deny => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Installs a runtime grant for the rest of the session. Granting the
    /// same directory twice is a no-op.
    pub fn grant(&self, kind: AccessKind, dir: &Path) -> Result<()> {
        let dir = require_absolute(dir)?;
        let mut grants = self.grants.lock().unwrap();
        let list = match kind {
            AccessKind::Read => &mut grants.read_dirs,
            AccessKind::Write => &mut grants.write_dirs,
        };
        if !list.contains(&dir) {
            debug!("granting {kind:?} on {}", dir.display());
            list.push(dir);
        }
        Ok(())
    }

    fn escalate_path(
        &self,
        err: QuillErr,
        request_permission: bool,
        reason: &str,
        tool: &str,
        kind: ApprovalKind,
        path: &Path,
    ) -> Result<()> {
        if !err.is_authorization_denial() || !request_permission {
            return Err(err);
        }
        let Some(approver) = &self.approver else {
            return Err(err);
        };
        match approver.ask(kind, tool, &path.to_string_lossy(), reason) {
            ReviewDecision::Approve => Ok(()),
            ReviewDecision::ApproveAndRemember => {
                // Remember the enclosing directory so sibling files are
                // covered without a second prompt.
                let dir = if path.is_dir() {
                    path.to_path_buf()
                } else {
                    path.parent().unwrap_or(path).to_path_buf()
                };
                let access = match kind {
                    ApprovalKind::Write => AccessKind::Write,
                    _ => AccessKind::Read,
                };
                self.grant(access, &dir)?;
                Ok(())
            }
            ReviewDecision::Deny => Err(err),
        }
    }
}

/// Assembles the domain chain: sandbox (or auto-approve) at the bottom,
/// optionally narrowed by a code unit.
pub struct AuthorizerBuilder {
    sandbox_dir: PathBuf,
    shell_allowed: Vec<CommandRule>,
    read_only: bool,
    auto_approve: bool,
    code_unit: Option<Arc<Mutex<CodeUnit>>>,
    approver: Option<Arc<dyn Approver>>,
}

impl AuthorizerBuilder {
    pub fn new(sandbox_dir: &Path) -> Self {
        Self {
            sandbox_dir: clean(sandbox_dir),
            shell_allowed: Vec::new(),
            read_only: false,
            auto_approve: false,
            code_unit: None,
            approver: None,
        }
    }

    pub fn shell_allowed(mut self, rules: Vec<CommandRule>) -> Self {
        self.shell_allowed = rules;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Unattended contexts: reads anywhere, writes and shell confined to
    /// the sandbox.
    pub fn auto_approve(mut self) -> Self {
        self.auto_approve = true;
        self
    }

    pub fn code_unit(mut self, unit: Arc<Mutex<CodeUnit>>) -> Self {
        self.code_unit = Some(unit);
        self
    }

    pub fn approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn build(self) -> Result<Authorizer> {
        let base: Box<dyn Domain> = if self.auto_approve {
            Box::new(AutoApproveDomain::new(&self.sandbox_dir)?)
        } else {
            let mut domain = SandboxDomain::new(&self.sandbox_dir, self.shell_allowed)?;
            if self.read_only {
                domain = domain.read_only();
            }
            Box::new(domain)
        };
        let domain: Box<dyn Domain> = match self.code_unit {
            Some(unit) => Box::new(CodeUnitDomain::new(base, unit)),
            None => base,
        };
        Ok(Authorizer {
            domain,
            grants: Mutex::new(Grants::default()),
            approver: self.approver,
        })
    }
}

fn require_absolute(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(QuillErr::InvalidInput(format!(
            "path must be absolute: {}",
            path.display()
        )));
    }
    Ok(clean(path))
}

//! Runtime core for the quill coding assistant: path normalization, the
//! authorization policy engine, the code-unit jail, the tool registry, the
//! agent conversation loop, skill discovery, and the remote monitor.
//!
//! The LLM wire protocol, individual tool implementations beyond the bundled
//! file-system set, and the terminal UI live elsewhere; this crate exposes
//! functions returning typed values and typed errors.

mod agent;
mod auth;
mod code_unit;
mod config;
pub mod error;
mod monitor;
mod paths;
mod skills;
pub mod tools;

pub use agent::Agent;
pub use agent::AgentEvent;
pub use auth::AccessKind;
pub use auth::Authorizer;
pub use auth::AuthorizerBuilder;
pub use auth::domain::AutoApproveDomain;
pub use auth::domain::CodeUnitDomain;
pub use auth::domain::Domain;
pub use auth::domain::SandboxDomain;
pub use auth::shell_rules::ArgRule;
pub use auth::shell_rules::CommandRule;
pub use auth::shell_rules::FlagDef;
pub use auth::shell_rules::FlagSpec;
pub use code_unit::CodeUnit;
pub use config::ApprovalMode;
pub use config::Config;
pub use config::ConfigOverrides;
pub use error::QuillErr;
pub use error::Result;
pub use monitor::Monitor;
pub use monitor::MonitorBuilder;
pub use monitor::host_properties;
pub use paths::NormalizedPath;
pub use paths::PathKind;
pub use paths::normalize;
pub use skills::LoadOutcome;
pub use skills::Skill;
pub use skills::authorize_skills;
pub use skills::load_skill;
pub use skills::load_skills;
pub use skills::skills_prompt;
pub use tools::Tool;
pub use tools::ToolInfo;
pub use tools::ToolRegistry;

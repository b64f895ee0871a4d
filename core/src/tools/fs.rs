//! Reference file-system tools. These show the handler contract every tool
//! follows: normalize, authorize, execute, and absorb failures into the
//! result envelope so the model can recover.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use quill_protocol::ToolCall;
use quill_protocol::ToolResult;

use crate::auth::Authorizer;
use crate::error::Result;
use crate::paths::NormalizedPath;
use crate::paths::PathKind;
use crate::paths::normalize;
use crate::tools::JsonSchema;
use crate::tools::Tool;
use crate::tools::ToolInfo;

/// Reads a UTF-8 file inside the sandbox.
pub struct ReadFileTool {
    authorizer: Arc<Authorizer>,
    sandbox_dir: PathBuf,
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

impl ReadFileTool {
    pub fn new(authorizer: Arc<Authorizer>, sandbox_dir: PathBuf) -> Self {
        Self {
            authorizer,
            sandbox_dir,
        }
    }

    async fn handle(&self, call: &ToolCall) -> Result<String> {
        let args: ReadFileArgs = serde_json::from_str(&call.input_json)?;
        let NormalizedPath { abs, .. } =
            normalize(&args.path, &self.sandbox_dir, PathKind::File, true)?;
        self.authorizer
            .authorize_read(false, "", &call.name, &abs)?;
        Ok(tokio::fs::read_to_string(&abs).await?)
    }
}

impl Tool for ReadFileTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "read_file".to_string(),
            description: "Reads a text file and returns its contents".to_string(),
            parameters: JsonSchema::object(
                BTreeMap::from([("path".to_string(), JsonSchema::string("File to read"))]),
                &["path"],
            ),
            required: vec!["path".to_string()],
        }
    }

    fn run(&self, ctx: CancellationToken, call: ToolCall) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return ToolResult::error(&call, "canceled");
            }
            match self.handle(&call).await {
                Ok(content) => ToolResult::ok(&call, content),
                Err(err) => ToolResult::error(&call, err.to_string()),
            }
        })
    }
}

/// Lists the entries of a directory inside the sandbox, one name per line,
/// directories suffixed with `/`.
pub struct ListDirTool {
    authorizer: Arc<Authorizer>,
    sandbox_dir: PathBuf,
}

#[derive(Deserialize)]
struct ListDirArgs {
    path: String,
}

impl ListDirTool {
    pub fn new(authorizer: Arc<Authorizer>, sandbox_dir: PathBuf) -> Self {
        Self {
            authorizer,
            sandbox_dir,
        }
    }

    async fn handle(&self, call: &ToolCall) -> Result<String> {
        let args: ListDirArgs = serde_json::from_str(&call.input_json)?;
        let NormalizedPath { abs, .. } =
            normalize(&args.path, &self.sandbox_dir, PathKind::Dir, true)?;
        self.authorizer
            .authorize_read(false, "", &call.name, &abs)?;

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&abs).await?;
        while let Some(entry) = entries.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names.join("\n"))
    }
}

impl Tool for ListDirTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "list_dir".to_string(),
            description: "Lists the entries of a directory".to_string(),
            parameters: JsonSchema::object(
                BTreeMap::from([("path".to_string(), JsonSchema::string("Directory to list"))]),
                &["path"],
            ),
            required: vec!["path".to_string()],
        }
    }

    fn run(&self, ctx: CancellationToken, call: ToolCall) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return ToolResult::error(&call, "canceled");
            }
            match self.handle(&call).await {
                Ok(content) => ToolResult::ok(&call, content),
                Err(err) => ToolResult::error(&call, err.to_string()),
            }
        })
    }
}

/// Creates or overwrites a file inside the sandbox. Writing may be escalated
/// to the approver when the target lies outside the authorized area.
pub struct WriteFileTool {
    authorizer: Arc<Authorizer>,
    sandbox_dir: PathBuf,
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
    #[serde(default)]
    request_permission: bool,
    #[serde(default)]
    reason: String,
}

impl WriteFileTool {
    pub fn new(authorizer: Arc<Authorizer>, sandbox_dir: PathBuf) -> Self {
        Self {
            authorizer,
            sandbox_dir,
        }
    }

    async fn handle(&self, call: &ToolCall) -> Result<String> {
        let args: WriteFileArgs = serde_json::from_str(&call.input_json)?;
        let NormalizedPath { abs, .. } =
            normalize(&args.path, &self.sandbox_dir, PathKind::Any, false)?;
        self.authorizer.authorize_write(
            args.request_permission,
            &args.reason,
            &call.name,
            &abs,
        )?;
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&abs, args.content.as_bytes()).await?;
        Ok(format!("wrote {} bytes", args.content.len()))
    }
}

impl Tool for WriteFileTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "write_file".to_string(),
            description: "Creates or overwrites a text file".to_string(),
            parameters: JsonSchema::object(
                BTreeMap::from([
                    ("path".to_string(), JsonSchema::string("File to write")),
                    ("content".to_string(), JsonSchema::string("New contents")),
                    (
                        "request_permission".to_string(),
                        JsonSchema::Boolean {
                            description: Some(
                                "Ask the user when the write would otherwise be denied"
                                    .to_string(),
                            ),
                        },
                    ),
                    (
                        "reason".to_string(),
                        JsonSchema::string("One sentence shown with the permission request"),
                    ),
                ]),
                &["path", "content"],
            ),
            required: vec!["path".to_string(), "content".to_string()],
        }
    }

    fn run(&self, ctx: CancellationToken, call: ToolCall) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return ToolResult::error(&call, "canceled");
            }
            match self.handle(&call).await {
                Ok(content) => ToolResult::ok(&call, content),
                Err(err) => ToolResult::error(&call, err.to_string()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::auth::AuthorizerBuilder;

    fn call(name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "1".to_string(),
            name: name.to_string(),
            input_json: input.to_string(),
        }
    }

    fn sandbox_with_auth() -> (tempfile::TempDir, PathBuf, Arc<Authorizer>) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = dir.path().canonicalize().unwrap();
        let auth = Arc::new(AuthorizerBuilder::new(&sandbox).build().unwrap());
        (dir, sandbox, auth)
    }

    #[tokio::test]
    async fn read_file_returns_contents() {
        let (_guard, sandbox, auth) = sandbox_with_auth();
        std::fs::write(sandbox.join("a.txt"), b"hello").unwrap();
        let tool = ReadFileTool::new(auth, sandbox);

        let result = tool
            .run(CancellationToken::new(), call("read_file", serde_json::json!({"path": "a.txt"})))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn errors_become_results_not_failures() {
        let (_guard, sandbox, auth) = sandbox_with_auth();
        let tool = ReadFileTool::new(auth, sandbox);

        let result = tool
            .run(
                CancellationToken::new(),
                call("read_file", serde_json::json!({"path": "missing.txt"})),
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("not found"));
    }

    #[tokio::test]
    async fn read_outside_sandbox_is_denied() {
        let (_guard, sandbox, auth) = sandbox_with_auth();
        let tool = ReadFileTool::new(auth, sandbox);

        let result = tool
            .run(
                CancellationToken::new(),
                call("read_file", serde_json::json!({"path": "/etc/hostname"})),
            )
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn list_dir_sorts_and_marks_directories() {
        let (_guard, sandbox, auth) = sandbox_with_auth();
        std::fs::create_dir(sandbox.join("sub")).unwrap();
        std::fs::write(sandbox.join("b.txt"), b"").unwrap();
        std::fs::write(sandbox.join("a.txt"), b"").unwrap();
        let tool = ListDirTool::new(auth, sandbox);

        let result = tool
            .run(CancellationToken::new(), call("list_dir", serde_json::json!({"path": "."})))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "a.txt\nb.txt\nsub/");
    }

    #[tokio::test]
    async fn write_file_creates_parents() {
        let (_guard, sandbox, auth) = sandbox_with_auth();
        let tool = WriteFileTool::new(auth, sandbox.clone());

        let result = tool
            .run(
                CancellationToken::new(),
                call(
                    "write_file",
                    serde_json::json!({"path": "deep/nested/f.txt", "content": "data"}),
                ),
            )
            .await;
        assert!(!result.is_error, "{}", result.content);
        assert_eq!(
            std::fs::read_to_string(sandbox.join("deep/nested/f.txt")).unwrap(),
            "data"
        );
    }

    #[tokio::test]
    async fn canceled_context_short_circuits() {
        let (_guard, sandbox, auth) = sandbox_with_auth();
        let tool = ReadFileTool::new(auth, sandbox);
        let ctx = CancellationToken::new();
        ctx.cancel();

        let result = tool
            .run(ctx, call("read_file", serde_json::json!({"path": "a.txt"})))
            .await;
        assert!(result.is_error);
        assert_eq!(result.content, "canceled");
    }
}

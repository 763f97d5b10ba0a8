//! Save-and-run-code executor.
//!
//! Writes the model's code to a fresh, timestamp-named file under a fixed
//! scripts directory and optionally runs it through [`ShellExecutor`].
//!
//! Files accumulate: nothing here ever deletes a saved script. Cleaning up
//! the scripts directory is left to the operator.

use super::shell::ShellExecutor;
use super::{ParamType, ToolExecutor, ToolInvocation, ToolOutput, ToolSpec};
use crate::error::{self, Error};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub const CODE_TOOL: &str = "save_and_run_code";

/// Known languages: (name, extension, runner)
const LANGUAGES: &[(&str, &str, Option<&str>)] = &[
    ("python", "py", Some("python3")),
    ("javascript", "js", Some("node")),
    ("bash", "sh", Some("bash")),
    ("sh", "sh", Some("sh")),
    ("c", "c", None),
    ("cpp", "cpp", None),
    ("java", "java", None),
    ("go", "go", Some("go run")),
    ("ruby", "rb", Some("ruby")),
    ("perl", "pl", Some("perl")),
    ("php", "php", Some("php")),
    ("rust", "rs", None),
];

const FALLBACK_EXTENSION: &str = "txt";

/// Extension and (if any) runner command for a language name.
pub fn language_info(language: &str) -> (&'static str, Option<&'static str>) {
    let lower = language.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|(name, _, _)| *name == lower)
        .map(|(_, ext, runner)| (*ext, *runner))
        .unwrap_or((FALLBACK_EXTENSION, None))
}

pub struct SaveAndRunCode {
    spec: ToolSpec,
    scripts_dir: PathBuf,
    shell: ShellExecutor,
    seq: AtomicU64,
}

impl SaveAndRunCode {
    pub fn new(scripts_dir: impl Into<PathBuf>, shell: ShellExecutor) -> Self {
        Self {
            spec: ToolSpec::new(
                CODE_TOOL,
                "Save code to a file and optionally execute it. Saved files are kept on disk.",
            )
            .required("code", ParamType::String, "The code to save.")
            .optional("language", ParamType::String, "The programming language of the code.")
            .optional("execute", ParamType::Boolean, "Whether to execute the code after saving."),
            scripts_dir: scripts_dir.into(),
            shell,
            seq: AtomicU64::new(0),
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Persist `code` under a unique name. `create_new` guards against a
    /// collision with a file written in the same microsecond.
    async fn save(&self, code: &str, extension: &str) -> Result<PathBuf, Error> {
        tokio::fs::create_dir_all(&self.scripts_dir).await.map_err(|e| {
            error::storage_failed(self.scripts_dir.display().to_string(), e.to_string())
                .with_operation("code::save")
        })?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f");
        loop {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let path = self
                .scripts_dir
                .join(format!("{}_{}_script.{}", stamp, seq, extension));
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match file {
                Ok(mut f) => {
                    f.write_all(code.as_bytes()).await.map_err(|e| {
                        error::storage_failed(path.display().to_string(), e.to_string())
                            .with_operation("code::save")
                    })?;
                    f.flush().await.map_err(Error::from)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(error::storage_failed(path.display().to_string(), e.to_string())
                        .with_operation("code::save"))
                }
            }
        }
    }

    pub async fn run(
        &self,
        code: &str,
        language: &str,
        execute: bool,
        timeout: Duration,
    ) -> ToolOutput {
        let (extension, runner) = language_info(language);
        let path = match self.save(code, extension).await {
            Ok(path) => path,
            Err(e) => return ToolOutput::from_error(&e),
        };
        tracing::debug!(path = %path.display(), language, execute, "saved code");

        let saved = format!("Code saved to {}", path.display());
        if !execute {
            return ToolOutput::ok(saved);
        }

        let Some(runner) = runner else {
            let err = error::unsupported_language(language);
            return ToolOutput::failed(format!("{}\n{}", saved, err.message()));
        };

        let command = format!(
            "{} {}",
            runner,
            shell_words::quote(&path.to_string_lossy())
        );
        let exec = self.shell.run(&command, timeout).await;
        ToolOutput {
            output: format!("{}\nExecution result:\n{}", saved, exec.output),
            succeeded: exec.succeeded,
        }
    }
}

#[async_trait]
impl ToolExecutor for SaveAndRunCode {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, invocation: &ToolInvocation, timeout: Duration) -> ToolOutput {
        let Some(code) = invocation.str_arg("code") else {
            return ToolOutput::failed("missing required argument 'code'");
        };
        let language = invocation.str_arg("language").unwrap_or("text");
        let execute = invocation.bool_arg("execute").unwrap_or(false);
        self.run(code, language, execute, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tool(dir: &TempDir) -> SaveAndRunCode {
        SaveAndRunCode::new(dir.path().join("scripts"), ShellExecutor::new())
    }

    #[test]
    fn test_language_table() {
        assert_eq!(language_info("Python"), ("py", Some("python3")));
        assert_eq!(language_info("rust"), ("rs", None));
        assert_eq!(language_info("cobol"), ("txt", None));
    }

    #[tokio::test]
    async fn test_save_without_execute() {
        let dir = TempDir::new().unwrap();
        let out = tool(&dir)
            .run("print('hi')", "python", false, Duration::from_secs(5))
            .await;
        assert!(out.succeeded);
        assert!(out.output.starts_with("Code saved to"));
        assert!(out.output.ends_with(".py"));

        let files: Vec<_> = std::fs::read_dir(dir.path().join("scripts")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_save_and_execute_bash() {
        let dir = TempDir::new().unwrap();
        let out = tool(&dir)
            .run("echo from-script", "bash", true, Duration::from_secs(5))
            .await;
        assert!(out.succeeded, "{}", out.output);
        assert!(out.output.contains("Execution result:"));
        assert!(out.output.contains("from-script"));
    }

    #[tokio::test]
    async fn test_unknown_language_execute_is_rejected() {
        let dir = TempDir::new().unwrap();
        let out = tool(&dir)
            .run("IDENTIFICATION DIVISION.", "cobol", true, Duration::from_secs(5))
            .await;
        assert!(!out.succeeded);
        assert!(out.output.contains("Execution not supported for language: cobol"));
        assert!(out.output.contains(".txt"));
    }

    #[tokio::test]
    async fn test_concurrent_saves_never_collide() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);
        let (a, b, c) = tokio::join!(
            tool.run("a", "text", false, Duration::from_secs(5)),
            tool.run("b", "text", false, Duration::from_secs(5)),
            tool.run("c", "text", false, Duration::from_secs(5)),
        );
        assert!(a.succeeded && b.succeeded && c.succeeded);
        let files: Vec<_> = std::fs::read_dir(dir.path().join("scripts")).unwrap().collect();
        assert_eq!(files.len(), 3);
    }
}

//! Subprocess execution engine.
//!
//! Each ref's source is staged as a script in a private temporary directory
//! and run by an external interpreter, once per phase:
//!
//! - `load`: runs once per deploy. Stdout is empty (nothing exported), or a
//!   JSON object whose `exports` field is either the string `"function"`
//!   (the ref is invocable) or a plain value.
//! - `invoke`: the context arrives as JSON on stdin and the result is
//!   printed as JSON on stdout. Empty output means `null`.
//! - `expand`: the sandbox's extension globals arrive on stdin and the
//!   replacement globals object is printed on stdout.
//!
//! Only the last non-empty stdout line is the result; earlier lines and all
//! of stderr go to the sandbox output stream. A non-zero exit fails with the
//! last stderr line as the message and the exit status as the code.
//!
//! The interpreter runs with a cleared environment. Besides `PATH` it only
//! sees the `SLOTD_*` variables describing its sandbox.

use async_trait::async_trait;
use serde_json::Value;
use slotd_core::{
    BindingSet, Error, ExecutionEngine, ExecutionError, Export, Invocable, OutputStream, SandboxId,
};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const PHASE_VAR: &str = "SLOTD_PHASE";
const SANDBOX_ID_VAR: &str = "SLOTD_SANDBOX_ID";
const GLOBALS_VAR: &str = "SLOTD_GLOBALS";
const MODULE_PATH_VAR: &str = "SLOTD_MODULE_PATH";
const DENIED_PREFIX: &str = "SLOTD_DENIED_";

const FUNCTION_EXPORT: &str = "function";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Load,
    Invoke,
    Expand,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Load => "load",
            Phase::Invoke => "invoke",
            Phase::Expand => "expand",
        }
    }
}

#[derive(Debug)]
struct Interpreter {
    program: PathBuf,
    args: Vec<String>,
}

impl Interpreter {
    async fn run(
        &self,
        script: &Path,
        phase: Phase,
        env: &[(String, String)],
        input: Option<&Value>,
        output: &OutputStream,
    ) -> Result<String, ExecutionError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(script)
            .env_clear()
            .envs(env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .env(PHASE_VAR, phase.as_str())
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        let payload = match input {
            Some(value) => serde_json::to_vec(value)
                .map_err(|err| ExecutionError::new(format!("failed to encode input: {err}")))?,
            None => Vec::new(),
        };

        debug!(program = %self.program.display(), phase = phase.as_str(), "spawning interpreter");
        let mut child = command.spawn().map_err(|err| {
            ExecutionError::new(format!("failed to spawn {}: {err}", self.program.display()))
        })?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The script is free to exit without reading its input.
                let _ = stdin.write_all(&payload).await;
            }
        };
        let ((), result) = tokio::join!(feed, child.wait_with_output());
        let out = result.map_err(|err| ExecutionError::new(format!("interpreter failed: {err}")))?;

        let stderr = String::from_utf8_lossy(&out.stderr);
        for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
            output.error(line);
        }

        if !out.status.success() {
            let message = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("interpreter exited with {}", out.status));
            let err = ExecutionError::new(message);
            return Err(match out.status.code() {
                Some(code) => err.with_code(i64::from(code)),
                None => err,
            });
        }

        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

/// A staged script, removed once no handle refers to it.
#[derive(Debug)]
struct Script {
    path: PathBuf,
    _dir: Arc<TempDir>,
}

impl Drop for Script {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Execution engine that hands ref source to an external interpreter.
pub struct ProcessEngine {
    interpreter: Arc<Interpreter>,
    scripts: Arc<TempDir>,
}

impl ProcessEngine {
    /// Resolves `interpreter` on `PATH` and prepares the script directory.
    ///
    /// `args` are passed to the interpreter before the script path.
    pub fn new(interpreter: &str, args: Vec<String>) -> io::Result<Self> {
        let program = which::which(interpreter).map_err(|err| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("interpreter '{interpreter}' not found: {err}"),
            )
        })?;
        let scripts = tempfile::Builder::new().prefix("slotd-").tempdir()?;
        debug!(program = %program.display(), scripts = %scripts.path().display(), "process engine ready");

        Ok(Self {
            interpreter: Arc::new(Interpreter { program, args }),
            scripts: Arc::new(scripts),
        })
    }

    pub fn program(&self) -> &Path {
        &self.interpreter.program
    }

    async fn stage(&self, sandbox: SandboxId, source: &str) -> Result<Arc<Script>, ExecutionError> {
        let path = self.scripts.path().join(format!("{sandbox}.src"));
        tokio::fs::write(&path, source)
            .await
            .map_err(|err| ExecutionError::new(format!("failed to stage source: {err}")))?;
        Ok(Arc::new(Script {
            path,
            _dir: Arc::clone(&self.scripts),
        }))
    }
}

#[async_trait]
impl ExecutionEngine for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn execute(&self, source: &str, bindings: &mut BindingSet) -> Result<(), ExecutionError> {
        let script = self.stage(bindings.id, source).await?;
        let env = sandbox_env(bindings);
        let stdout = self
            .interpreter
            .run(&script.path, Phase::Load, &env, None, &bindings.output)
            .await?;

        bindings.module.exports = match last_json_line(&stdout, &bindings.output)? {
            None => Export::Undefined,
            Some(report) => match report.get("exports") {
                Some(Value::String(kind)) if kind == FUNCTION_EXPORT => {
                    Export::function(ProcessHandle {
                        interpreter: Arc::clone(&self.interpreter),
                        script,
                        env,
                        output: bindings.output.clone(),
                    })
                }
                Some(value) => Export::Value(value.clone()),
                None => {
                    return Err(ExecutionError::new(
                        "load output must be an object with an `exports` field",
                    ));
                }
            },
        };
        Ok(())
    }
}

/// An invocable ref backed by a staged script.
///
/// Invocations see the environment of the sandbox the ref was loaded in.
struct ProcessHandle {
    interpreter: Arc<Interpreter>,
    script: Arc<Script>,
    env: Vec<(String, String)>,
    output: OutputStream,
}

#[async_trait]
impl Invocable for ProcessHandle {
    async fn call(&self, context: Value) -> Result<Value, ExecutionError> {
        let stdout = self
            .interpreter
            .run(&self.script.path, Phase::Invoke, &self.env, Some(&context), &self.output)
            .await?;
        Ok(last_json_line(&stdout, &self.output)?.unwrap_or(Value::Null))
    }

    async fn expand(&self, bindings: &mut BindingSet) -> Result<(), ExecutionError> {
        let env = sandbox_env(bindings);
        let globals = Value::Object(bindings.globals.clone());
        let stdout = self
            .interpreter
            .run(&self.script.path, Phase::Expand, &env, Some(&globals), &bindings.output)
            .await?;
        if let Some(Value::Object(updated)) = last_json_line(&stdout, &bindings.output)? {
            bindings.globals = updated;
        }
        Ok(())
    }
}

fn sandbox_env(bindings: &BindingSet) -> Vec<(String, String)> {
    let mut env = vec![
        (SANDBOX_ID_VAR.to_string(), bindings.id.to_string()),
        (
            GLOBALS_VAR.to_string(),
            Value::Object(bindings.globals.clone()).to_string(),
        ),
    ];
    if let Ok(loader) = bindings.modules.access() {
        // Same separator as PATH.
        match std::env::join_paths(loader.roots()) {
            Ok(joined) => env.push((
                MODULE_PATH_VAR.to_string(),
                joined.to_string_lossy().into_owned(),
            )),
            Err(err) => debug!(%err, "module path not exported to interpreter"),
        }
    }
    for capability in bindings.disabled_capabilities() {
        env.push((
            format!("{DENIED_PREFIX}{}", capability.to_uppercase()),
            Error::CapabilityDisabled { capability }.to_string(),
        ));
    }
    env
}

fn last_json_line(stdout: &str, output: &OutputStream) -> Result<Option<Value>, ExecutionError> {
    let mut lines: Vec<&str> = stdout.lines().filter(|line| !line.trim().is_empty()).collect();
    let Some(last) = lines.pop() else {
        return Ok(None);
    };
    for line in lines {
        output.write(line);
    }
    serde_json::from_str(last)
        .map(Some)
        .map_err(|err| ExecutionError::new(format!("ref printed invalid JSON: {err}")))
}

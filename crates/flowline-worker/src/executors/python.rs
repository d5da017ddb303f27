//! `python` executor: runs the step's `code` as a standalone script in a
//! subprocess, rather than embedding a Python interpreter — the code
//! runner's internals are out of scope, and a subprocess boundary is the
//! only way to run arbitrary Python from a Rust process without vendoring
//! a runtime.
//!
//! Contract: the script receives the rendered args as a JSON object on
//! stdin (bound to a module-level `args` name) and is expected to print
//! exactly one JSON value to stdout as its result; anything else on stdout
//! is ignored, stderr is captured for the error envelope on failure.

use std::process::Stdio;

use async_trait::async_trait;
use flowline_contracts::Step;
use flowline_core::{ExecutionOutcome, Executor};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub struct PythonExecutor {
    interpreter: String,
}

impl PythonExecutor {
    pub fn new() -> Self {
        Self {
            interpreter: std::env::var("FLOWLINE_PYTHON_BIN").unwrap_or_else(|_| "python3".to_string()),
        }
    }

    fn wrapper_script(code: &str) -> String {
        format!(
            "import json, sys\nargs = json.loads(sys.stdin.read() or 'null')\n\
            def __flowline_run(args):\n{indented}\n\
            __result = __flowline_run(args)\n\
            print(json.dumps(__result))\n",
            indented = indent(code),
        )
    }
}

fn indent(code: &str) -> String {
    code.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Executor for PythonExecutor {
    async fn execute(&self, task: &Step, _context: &Value, rendered_args: Value) -> ExecutionOutcome {
        let Some(code) = task.code.as_deref() else {
            return ExecutionOutcome::error("python step has no code");
        };
        let script = Self::wrapper_script(code);

        let mut child = match Command::new(&self.interpreter)
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return ExecutionOutcome::error(format!("failed to spawn {}: {e}", self.interpreter)),
        };

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&rendered_args).unwrap_or_default();
            if let Err(e) = stdin.write_all(&payload).await {
                return ExecutionOutcome::error(format!("failed to write stdin: {e}"));
            }
        }

        let output = match child.wait_with_output().await {
            Ok(o) => o,
            Err(e) => return ExecutionOutcome::error(format!("python process failed: {e}")),
        };

        if !output.status.success() {
            return ExecutionOutcome::Error {
                error: format!("python exited with {}", output.status),
                traceback: Some(String::from_utf8_lossy(&output.stderr).to_string()),
                meta: Value::Null,
            };
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout.lines().last().unwrap_or_default();
        match serde_json::from_str::<Value>(last_line) {
            Ok(data) => ExecutionOutcome::success(data),
            Err(e) => ExecutionOutcome::error(format!("could not parse python output as JSON: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indent_prefixes_every_line_including_blank_ones() {
        assert_eq!(indent("a\n\nb"), "    a\n    \n    b");
    }

    #[test]
    fn wrapper_script_wraps_code_in_a_function_and_prints_its_result() {
        let script = PythonExecutor::wrapper_script("return args['x'] + 1");
        assert!(script.contains("args = json.loads(sys.stdin.read() or 'null')"));
        assert!(script.contains("def __flowline_run(args):\n    return args['x'] + 1"));
        assert!(script.contains("__result = __flowline_run(args)"));
        assert!(script.contains("print(json.dumps(__result))"));
    }
}

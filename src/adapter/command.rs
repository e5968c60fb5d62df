//! Command data-source adapter.
//!
//! Bridges a source whose records are reachable only through an external
//! tool. Each action is a configured command template with `${fk}`
//! argument holes, e.g.
//!
//! ```toml
//! get    = "usertool show ${fk}"
//! create = "usertool add"
//! set    = "usertool replace ${fk}"
//! delete = "usertool remove ${fk}"
//! ```
//!
//! The document body travels as JSON on stdin (`create`/`set`) and stdout
//! (`get`); `create` prints the new source-side id on stdout. A non-zero
//! exit status or unparsable output becomes a [`SourceFault`] carrying
//! the exit code and captured stderr.

use std::io::Write as IoWrite;
use std::process::{Command, Stdio};

use serde_json::Value;

use crate::model::ident::ForeignKey;

use super::{DataSource, SourceFault};

// ---------------------------------------------------------------------------
// CommandTemplates
// ---------------------------------------------------------------------------

/// The four command templates a [`CommandAdapter`] is configured with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTemplates {
    /// Fetch a record: stdout is the document JSON.
    pub get: String,
    /// Create a record: document JSON on stdin, new id on stdout.
    pub create: String,
    /// Update a record in place: document JSON on stdin.
    pub set: String,
    /// Delete a record.
    pub delete: String,
}

// ---------------------------------------------------------------------------
// CommandAdapter
// ---------------------------------------------------------------------------

/// A [`DataSource`] that shells out to an external tool.
#[derive(Debug)]
pub struct CommandAdapter {
    templates: CommandTemplates,
}

impl CommandAdapter {
    /// Create an adapter from its command templates.
    #[must_use]
    pub const fn new(templates: CommandTemplates) -> Self {
        Self { templates }
    }

    /// Split a template into argv, substituting `${fk}` holes.
    ///
    /// Templates are split on whitespace; each token may contain the
    /// `${fk}` hole. Shell quoting is not interpreted.
    fn render(template: &str, fk: Option<&str>) -> Result<Vec<String>, SourceFault> {
        let mut argv = Vec::new();
        for token in template.split_whitespace() {
            if token.contains("${fk}") {
                let Some(id) = fk else {
                    return Err(SourceFault::new(format!(
                        "template {template:?} uses ${{fk}} but no key is available"
                    )));
                };
                argv.push(token.replace("${fk}", id));
            } else {
                argv.push(token.to_owned());
            }
        }
        if argv.is_empty() {
            return Err(SourceFault::new("empty command template"));
        }
        Ok(argv)
    }

    /// Run a rendered command, optionally piping `stdin_body` in, and
    /// return trimmed stdout. The child is always reaped, fault or not.
    fn run(argv: &[String], stdin_body: Option<&str>) -> Result<String, SourceFault> {
        let display = argv.join(" ");
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(if stdin_body.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| SourceFault::new(format!("could not spawn `{display}`: {e}")))?;

        if let Some(body) = stdin_body
            && let Some(mut stdin) = child.stdin.take()
        {
            if let Err(e) = stdin.write_all(body.as_bytes()) {
                // Reap the child before reporting, so no zombie survives
                // the error path.
                let _ = child.kill();
                let _ = child.wait();
                return Err(SourceFault::new(format!(
                    "could not write to `{display}` stdin: {e}"
                )));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| SourceFault::new(format!("`{display}` did not finish: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(SourceFault::exited(
                format!("`{display}` failed: {stderr}"),
                output.status.code(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

impl DataSource for CommandAdapter {
    fn get(&mut self, fk: &ForeignKey) -> Result<Value, SourceFault> {
        let argv = Self::render(&self.templates.get, Some(fk.id()))?;
        let stdout = Self::run(&argv, None)?;
        serde_json::from_str(&stdout).map_err(|e| {
            SourceFault::new(format!("`{}` printed invalid JSON: {e}", argv.join(" ")))
        })
    }

    fn set(&mut self, content: &Value, fk: Option<&ForeignKey>) -> Result<String, SourceFault> {
        let body = serde_json::to_string(content)
            .map_err(|e| SourceFault::new(format!("could not serialise record: {e}")))?;
        match fk {
            Some(fk) => {
                let argv = Self::render(&self.templates.set, Some(fk.id()))?;
                Self::run(&argv, Some(&body))?;
                Ok(fk.id().to_owned())
            }
            None => {
                let argv = Self::render(&self.templates.create, None)?;
                let id = Self::run(&argv, Some(&body))?;
                if id.is_empty() {
                    return Err(SourceFault::new(format!(
                        "`{}` did not print a record id",
                        argv.join(" ")
                    )));
                }
                Ok(id)
            }
        }
    }

    fn delete(&mut self, fk: &ForeignKey) -> Result<(), SourceFault> {
        let argv = Self::render(&self.templates.delete, Some(fk.id()))?;
        Self::run(&argv, None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

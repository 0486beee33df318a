//! External Commands
//!
//! System proxy and firewall changes go through OS tools
//! (`networksetup`, `pfctl`, `osascript`). They all run through a
//! [`CommandRunner`] handed to the controller that needs it, so tests
//! swap in a recording runner instead of touching the host.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Command execution errors
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },

    #[error("privilege escalation failed (not root and osascript unavailable): {0}")]
    Privilege(Box<CommandError>),
}

/// Runs a program to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning stdout on a zero exit status
    async fn run(&self, program: &str, args: &[String]) -> Result<String, CommandError>;
}

/// Runs commands on the host with `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, CommandError> {
        debug!("exec: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(CommandError::Failed {
                command: format!("{} {}", program, args.join(" ")),
                status: output.status.to_string(),
                output: text.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Build an owned argument list
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Run a shell command with administrator rights
///
/// Goes through the macOS authorization dialog first. When that is
/// unavailable (SSH session, no GUI) and the process already runs as
/// root, the command runs directly.
pub async fn run_privileged(runner: &dyn CommandRunner, command: &str) -> Result<(), CommandError> {
    let escaped = command.replace('"', "\\\"");
    let script = format!("do shell script \"{}\" with administrator privileges", escaped);

    let err = match runner.run("osascript", &args(["-e", script.as_str()])).await {
        Ok(_) => return Ok(()),
        Err(err) => err,
    };

    if is_root(runner).await {
        debug!("osascript unavailable, running as root");
        runner.run("sh", &args(["-c", command])).await?;
        return Ok(());
    }

    Err(CommandError::Privilege(Box::new(err)))
}

async fn is_root(runner: &dyn CommandRunner) -> bool {
    matches!(runner.run("id", &args(["-u"])).await, Ok(uid) if uid.trim() == "0")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording runner for controller tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records every invocation; programs can be scripted to fail or to
    /// return fixed output
    #[derive(Default)]
    pub struct RecordingRunner {
        pub calls: Mutex<Vec<Vec<String>>>,
        outputs: Mutex<HashMap<String, String>>,
        failing: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_output(self, program: &str, output: &str) -> Self {
            self.outputs
                .lock()
                .unwrap()
                .insert(program.to_string(), output.to_string());
            self
        }

        pub fn failing(self, program: &str) -> Self {
            self.failing.lock().unwrap().push(program.to_string());
            self
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls().into_iter().map(|c| c[0].clone()).collect()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<String, CommandError> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().cloned());
            self.calls.lock().unwrap().push(call);

            if self.failing.lock().unwrap().iter().any(|p| p == program) {
                return Err(CommandError::Failed {
                    command: program.to_string(),
                    status: "exit status: 1".into(),
                    output: "scripted failure".into(),
                });
            }

            Ok(self
                .outputs
                .lock()
                .unwrap()
                .get(program)
                .cloned()
                .unwrap_or_default())
        }
    }
}

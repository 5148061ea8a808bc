//! Production implementation of NodeRuntime using the LXC tools.

use crate::{EnvError, NodeName, NodeRuntime, RuntimeState};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Production runtime backed by `lxc-*` commands.
///
/// Every call spawns one child process. Children are killed when the
/// returned future is dropped, so callers can bound a hung invocation
/// with `tokio::time::timeout`.
pub struct LxcRuntime {
    /// Prefix every command with `sudo`
    use_sudo: bool,
}

impl LxcRuntime {
    /// Creates a new LxcRuntime that runs commands through sudo.
    pub fn new() -> Self {
        Self { use_sudo: true }
    }

    /// Runs the lxc tools directly (for hosts with unprivileged containers).
    pub fn without_sudo(mut self) -> Self {
        self.use_sudo = false;
        self
    }

    fn command(&self, program: &str, args: &[String]) -> (Command, String) {
        let mut cmd = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg(program);
            c
        } else {
            Command::new(program)
        };
        cmd.args(args).kill_on_drop(true);
        let label = format!("{} {}", program, args.join(" "));
        (cmd, label)
    }

    /// Runs a command and returns its stdout if it exited successfully.
    async fn output(&self, program: &str, args: &[String]) -> Result<String, EnvError> {
        let (mut cmd, label) = self.command(program, args);
        debug!(command = %label, "running");
        let out = cmd.output().await.map_err(|source| EnvError::Spawn {
            command: label.clone(),
            source,
        })?;
        if !out.status.success() {
            return Err(EnvError::command_failed(label, out.status));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<(), EnvError> {
        self.output(program, args).await.map(|_| ())
    }
}

impl Default for LxcRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn name_args(node: &NodeName, extra: &[&str]) -> Vec<String> {
    let mut args = vec!["-n".to_string(), node.to_string()];
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

/// Arguments for `lxc-attach` running curl against `target`.
///
/// curl prints only the HTTP status code (`000` when nothing answered).
fn check_args(node: &NodeName, target: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_secs().max(1).to_string();
    let mut args = vec!["--clear-env".to_string()];
    args.extend(name_args(node, &[]));
    args.extend(
        [
            "--", "curl", target, "-s", "-o", "/dev/null", "-w", "%{http_code}", "-m", secs.as_str(),
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args
}

#[async_trait]
impl NodeRuntime for LxcRuntime {
    async fn query_state(&self, node: &NodeName) -> Result<String, EnvError> {
        self.output("lxc-info", &name_args(node, &["-s"]))
            .await
            .map_err(|e| match e {
                EnvError::CommandFailed { .. } => EnvError::missing(node),
                other => other,
            })
    }

    async fn start(&self, node: &NodeName) -> Result<(), EnvError> {
        self.run("lxc-start", &name_args(node, &[])).await
    }

    async fn stop(&self, node: &NodeName) -> Result<(), EnvError> {
        self.run("lxc-stop", &name_args(node, &[])).await
    }

    async fn wait_for_state(
        &self,
        node: &NodeName,
        state: RuntimeState,
        timeout: Duration,
    ) -> Result<(), EnvError> {
        let secs = timeout.as_secs().max(1).to_string();
        self.run(
            "lxc-wait",
            &name_args(node, &["-s", state.as_runtime_str(), "-t", secs.as_str()]),
        )
        .await
        .map_err(|e| match e {
            EnvError::CommandFailed { .. } => EnvError::timeout(timeout),
            other => other,
        })
    }

    async fn discover_address(&self, node: &NodeName) -> Result<String, EnvError> {
        self.output("lxc-info", &name_args(node, &["-i"])).await
    }

    async fn exec_remote_check(
        &self,
        node: &NodeName,
        target: &str,
        timeout: Duration,
    ) -> Result<String, EnvError> {
        let (mut cmd, label) = self.command("lxc-attach", &check_args(node, target, timeout));
        let out = cmd.output().await.map_err(|source| EnvError::Spawn {
            command: label.clone(),
            source,
        })?;
        // curl exits non-zero on an unreachable target but still prints
        // "000"; only an empty stdout means the attach itself failed.
        if out.stdout.is_empty() && !out.status.success() {
            return Err(EnvError::command_failed(label, out.status));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_args_shape() {
        let node = NodeName::indexed("n", 1);
        let args = check_args(&node, "10.0.3.7", Duration::from_secs(1));
        assert_eq!(&args[..3], &["--clear-env", "-n", "n1"]);
        assert_eq!(args[3], "--");
        assert_eq!(args[4], "curl");
        assert_eq!(args[5], "10.0.3.7");
        assert_eq!(args.last().map(String::as_str), Some("1"));
    }

    #[test]
    fn test_check_timeout_rounds_up_to_one_second() {
        let node = NodeName::indexed("n", 0);
        let args = check_args(&node, "10.0.3.7", Duration::from_millis(200));
        assert_eq!(args.last().map(String::as_str), Some("1"));
    }

    #[test]
    fn test_command_label_and_sudo_toggle() {
        let runtime = LxcRuntime::new();
        let (_, label) = runtime.command("lxc-info", &name_args(&NodeName::from("n2"), &["-s"]));
        assert_eq!(label, "lxc-info -n n2 -s");

        let runtime = LxcRuntime::default().without_sudo();
        assert!(!runtime.use_sudo);
    }
}

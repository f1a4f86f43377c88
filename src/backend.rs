//! Executor and inventory backed by an external program
//!
//! The program is invoked as:
//!
//! - `<command> [args..] redeploy <keypath> [--dry-run] [--reconcile] [--no-networking]`
//!   prints a JSON array of `{"device", "output"}` for dry-runs
//! - `<command> [args..] list <type-path>` prints a JSON array of keypaths
//! - `<command> [args..] modified <keypath>` prints a JSON array of keypaths
//!
//! A non-zero exit status is a failure; stderr becomes the error message.

use redeploy::{
    CommitFlags, DeviceDiff, ExecutionError, ExecutionResult, Keypath, RedeployExecutor,
    ServiceInventory,
};
use serde::de::DeserializeOwned;
use std::process::Command;

use crate::config::ExecutorConfig;

pub struct CommandBackend {
    command: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    /// Run with the configured args plus `extra`, returning stdout
    fn run_capture(&self, extra: &[&str]) -> Result<String, String> {
        log::debug!("Running {} {:?} {:?}", self.command, self.args, extra);
        let output = Command::new(&self.command)
            .args(&self.args)
            .args(extra)
            .output()
            .map_err(|e| format!("Failed to execute {}: {e}", self.command))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            Err(if stderr.is_empty() {
                format!("{} exited with {}", self.command, output.status)
            } else {
                stderr.to_string()
            })
        }
    }

    fn run_json<T: DeserializeOwned>(&self, extra: &[&str]) -> Result<T, String> {
        let stdout = self.run_capture(extra)?;
        serde_json::from_str(&stdout)
            .map_err(|e| format!("Invalid output from {} {}: {e}", self.command, extra[0]))
    }
}

impl RedeployExecutor for CommandBackend {
    fn execute(
        &self,
        keypath: &str,
        flags: &CommitFlags,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut extra = vec!["redeploy", keypath];
        if flags.dry_run {
            extra.push("--dry-run");
        }
        if flags.reconcile {
            extra.push("--reconcile");
        }
        if flags.no_networking {
            extra.push("--no-networking");
        }

        if flags.dry_run {
            let devices: Vec<DeviceDiff> = self.run_json(&extra).map_err(ExecutionError::new)?;
            Ok(ExecutionResult::DryRun(devices))
        } else {
            self.run_capture(&extra).map_err(ExecutionError::new)?;
            Ok(ExecutionResult::Committed)
        }
    }
}

impl ServiceInventory for CommandBackend {
    fn list_services(&self, type_path: &str) -> redeploy::Result<Vec<Keypath>> {
        self.run_json(&["list", type_path])
            .map_err(redeploy::Error::Inventory)
    }

    fn modified_services(&self, keypath: &str) -> Result<Vec<Keypath>, ExecutionError> {
        self.run_json(&["modified", keypath])
            .map_err(ExecutionError::new)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Backend running `script` through `sh -c`; the subcommand lands in `$1`
    fn shell(script: &str) -> CommandBackend {
        CommandBackend::new("sh", vec!["-c".into(), script.into(), "bsa-executor".into()])
    }

    #[test]
    fn test_dry_run_parses_devices_and_passes_flags() {
        let backend = shell(
            r#"[ "$1 $2 $3 $4" = "redeploy /svc{a} --dry-run --no-networking" ] || exit 3
printf '[{"device":"pe1","output":"+ mtu 9000"}]'"#,
        );
        let flags = CommitFlags {
            dry_run: true,
            no_networking: true,
            reconcile: false,
        };
        let result = backend.execute("/svc{a}", &flags).unwrap();
        assert_eq!(
            result,
            ExecutionResult::DryRun(vec![DeviceDiff {
                device: "pe1".into(),
                output: "+ mtu 9000".into(),
            }])
        );
    }

    #[test]
    fn test_commit_ignores_stdout() {
        let backend = shell(r#"[ "$3" = "--reconcile" ] || exit 3; echo committed"#);
        let result = backend
            .execute("/svc{a}", &CommitFlags::commit().reconciling())
            .unwrap();
        assert_eq!(result, ExecutionResult::Committed);
    }

    #[test]
    fn test_failure_uses_stderr() {
        let backend = shell("echo 'device pe1 is locked' >&2; exit 1");
        let err = backend
            .execute("/svc{a}", &CommitFlags::commit())
            .unwrap_err();
        assert_eq!(err.message, "device pe1 is locked");
    }

    #[test]
    fn test_invalid_dry_run_output_is_failure() {
        let backend = shell("echo not-json");
        let err = backend
            .execute("/svc{a}", &CommitFlags::dry_run())
            .unwrap_err();
        assert!(err.message.contains("Invalid output"));
    }

    #[test]
    fn test_inventory_commands() {
        let backend = shell(
            r#"case "$1" in
  list) printf '["/svc{a}","/svc{b}"]' ;;
  modified) printf '["/svc-pe{a pe1}"]' ;;
  *) exit 2 ;;
esac"#,
        );
        assert_eq!(
            backend.list_services("/services/vpn").unwrap(),
            ["/svc{a}", "/svc{b}"]
        );
        assert_eq!(
            backend.modified_services("/svc{a}").unwrap(),
            ["/svc-pe{a pe1}"]
        );
    }

    #[test]
    fn test_missing_program() {
        let backend = CommandBackend::new("/nonexistent/bsa-executor", Vec::new());
        assert!(matches!(
            backend.list_services("/services/vpn"),
            Err(redeploy::Error::Inventory(_))
        ));
    }
}

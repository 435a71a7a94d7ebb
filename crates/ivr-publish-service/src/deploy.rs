//! Dialplan deployment
//!
//! A compiled dialplan is never written straight to its final path. It is
//! staged as a fully formed file beside the destination (content, owner,
//! group and mode all set) and then moved into place with one rename, so
//! the switch never reads a half-written file or one with the wrong
//! permissions.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ivr_engine::CompiledDialplan;
use thiserror::Error;
use tokio::process::Command;

use crate::config::DeployConfig;
use crate::constants::{defaults, programs, timeouts};

/// Deployment sub-step, reported when one fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    /// Writing the unprivileged temp file
    Write,
    /// Staging the file with owner, group and mode
    Install,
    /// Moving the staged file into place
    Rename,
    /// Deleting a deployed file
    Remove,
}

impl std::fmt::Display for DeployStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeployStep::Write => "write",
            DeployStep::Install => "install",
            DeployStep::Rename => "rename",
            DeployStep::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Deployment errors
#[derive(Debug, Error)]
pub enum DeployError {
    /// A step ran and failed, or could not be started
    #[error("Deploy step '{step}' failed{}: {stderr}", status_suffix(.status))]
    StepFailed {
        step: DeployStep,
        /// Exit status, if the command ran to completion
        status: Option<i32>,
        stderr: String,
    },

    /// A privileged command did not finish in time
    #[error("Deploy step '{step}' timed out after {timeout_secs}s")]
    Timeout { step: DeployStep, timeout_secs: u64 },
}

fn status_suffix(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" (exit status {})", code),
        None => String::new(),
    }
}

impl DeployError {
    /// The step that failed
    pub fn step(&self) -> DeployStep {
        match self {
            DeployError::StepFailed { step, .. } | DeployError::Timeout { step, .. } => *step,
        }
    }

    fn timeout(step: DeployStep, limit: Duration) -> Self {
        DeployError::Timeout {
            step,
            timeout_secs: limit.as_secs(),
        }
    }

    fn io(step: DeployStep, err: std::io::Error) -> Self {
        DeployError::StepFailed {
            step,
            status: None,
            stderr: err.to_string(),
        }
    }
}

/// Captured result of a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs a program with elevated privileges
#[async_trait]
pub trait PrivilegeRunner: Send + Sync {
    /// Run `program` with `args` and capture its output
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Runs commands through non-interactive `sudo`
#[derive(Debug, Clone)]
pub struct SudoRunner {
    sudo_path: String,
}

impl SudoRunner {
    pub fn new(sudo_path: impl Into<String>) -> Self {
        Self {
            sudo_path: sudo_path.into(),
        }
    }
}

#[async_trait]
impl PrivilegeRunner for SudoRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = Command::new(&self.sudo_path)
            .arg("-n")
            .arg(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Places compiled dialplans where the switch reads them
#[async_trait]
pub trait ConfigPublisher: Send + Sync {
    /// Deploy a dialplan, returning its final path
    async fn publish(&self, dialplan: &CompiledDialplan) -> Result<PathBuf, DeployError>;

    /// Delete a deployed dialplan. Missing files are not an error.
    async fn remove(&self, file_name: &str) -> Result<(), DeployError>;

    /// Final path of a dialplan file
    fn target_path(&self, file_name: &str) -> PathBuf;
}

/// `<dir>/.<file>.staging`
fn staging_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!(".{}{}", file_name, defaults::STAGING_SUFFIX))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Deploys through a [`PrivilegeRunner`] into a root-owned directory
pub struct PrivilegedPublisher {
    runner: Arc<dyn PrivilegeRunner>,
    dialplan_dir: PathBuf,
    staging_dir: PathBuf,
    owner: String,
    group: String,
    file_mode: u32,
    timeout: Duration,
}

impl PrivilegedPublisher {
    /// Create a publisher using `sudo` from the config
    pub fn from_config(config: &DeployConfig) -> Self {
        Self::with_runner(config, Arc::new(SudoRunner::new(config.sudo_path.clone())))
    }

    /// Create a publisher with a custom runner
    pub fn with_runner(config: &DeployConfig, runner: Arc<dyn PrivilegeRunner>) -> Self {
        Self {
            runner,
            dialplan_dir: config.dialplan_dir.clone(),
            staging_dir: config.staging_dir(),
            owner: config.owner.clone(),
            group: config.group.clone(),
            file_mode: config.file_mode,
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    async fn step(&self, step: DeployStep, program: &str, args: Vec<String>) -> Result<(), DeployError> {
        log::debug!("deploy {}: {} {}", step, program, args.join(" "));
        match tokio::time::timeout(self.timeout, self.runner.run(program, &args)).await {
            Ok(Ok(output)) if output.success() => Ok(()),
            Ok(Ok(output)) => Err(DeployError::StepFailed {
                step,
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            }),
            Ok(Err(e)) => Err(DeployError::io(step, e)),
            Err(_) => Err(DeployError::timeout(step, self.timeout)),
        }
    }

    /// Best-effort removal of a staging file after a failed step
    async fn discard(&self, staging: &Path) {
        let args = vec!["-f".to_string(), path_arg(staging)];
        if let Err(e) = self.step(DeployStep::Remove, programs::REMOVE, args).await {
            log::warn!("Could not remove staging file {:?}: {}", staging, e);
        }
    }
}

#[async_trait]
impl ConfigPublisher for PrivilegedPublisher {
    async fn publish(&self, dialplan: &CompiledDialplan) -> Result<PathBuf, DeployError> {
        let target = self.target_path(&dialplan.file_name);
        let staging = staging_path(&self.dialplan_dir, &dialplan.file_name);

        // Dropped (and deleted) on every exit path.
        let staging_dir = self.staging_dir.clone();
        let text = dialplan.text.clone();
        let temp = run_blocking(DeployStep::Write, self.timeout, move || {
            write_temp(&staging_dir, &text)
        })
        .await?;

        let install = vec![
            "-o".to_string(),
            self.owner.clone(),
            "-g".to_string(),
            self.group.clone(),
            "-m".to_string(),
            format!("{:04o}", self.file_mode),
            path_arg(temp.path()),
            path_arg(&staging),
        ];
        if let Err(e) = self.step(DeployStep::Install, programs::INSTALL, install).await {
            self.discard(&staging).await;
            return Err(e);
        }

        let rename = vec!["-f".to_string(), path_arg(&staging), path_arg(&target)];
        if let Err(e) = self.step(DeployStep::Rename, programs::MOVE, rename).await {
            self.discard(&staging).await;
            return Err(e);
        }

        log::info!("Deployed flow '{}' to {:?}", dialplan.flow_id, target);
        Ok(target)
    }

    async fn remove(&self, file_name: &str) -> Result<(), DeployError> {
        let target = self.target_path(file_name);
        let args = vec!["-f".to_string(), path_arg(&target)];
        self.step(DeployStep::Remove, programs::REMOVE, args).await?;
        log::info!("Removed {:?}", target);
        Ok(())
    }

    fn target_path(&self, file_name: &str) -> PathBuf {
        self.dialplan_dir.join(file_name)
    }
}

/// Deploys with the service's own permissions
///
/// Used in development and tests, and where the switch's config directory
/// is writable by the service account.
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    dialplan_dir: PathBuf,
    file_mode: u32,
    timeout: Duration,
}

impl LocalPublisher {
    pub fn new(dialplan_dir: impl Into<PathBuf>) -> Self {
        Self {
            dialplan_dir: dialplan_dir.into(),
            file_mode: defaults::LOCAL_FILE_MODE,
            timeout: Duration::from_secs(timeouts::COMMAND_SECS),
        }
    }

    pub fn with_file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = file_mode;
        self
    }

    /// Limit for the whole stage-and-rename
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn publish_blocking(&self, dialplan: &CompiledDialplan) -> Result<PathBuf, DeployError> {
        std::fs::create_dir_all(&self.dialplan_dir)
            .map_err(|e| DeployError::io(DeployStep::Write, e))?;

        let staging_name = format!(".{}", dialplan.file_name);
        let mut staged = tempfile::Builder::new()
            .prefix(&staging_name)
            .suffix(defaults::STAGING_SUFFIX)
            .tempfile_in(&self.dialplan_dir)
            .map_err(|e| DeployError::io(DeployStep::Write, e))?;
        staged
            .write_all(dialplan.text.as_bytes())
            .and_then(|_| staged.flush())
            .map_err(|e| DeployError::io(DeployStep::Write, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                staged.path(),
                std::fs::Permissions::from_mode(self.file_mode),
            )
            .map_err(|e| DeployError::io(DeployStep::Install, e))?;
        }

        let target = self.target_path(&dialplan.file_name);
        staged
            .persist(&target)
            .map_err(|e| DeployError::io(DeployStep::Rename, e.error))?;
        Ok(target)
    }
}

#[async_trait]
impl ConfigPublisher for LocalPublisher {
    async fn publish(&self, dialplan: &CompiledDialplan) -> Result<PathBuf, DeployError> {
        let publisher = self.clone();
        let compiled = dialplan.clone();
        let target = run_blocking(DeployStep::Write, self.timeout, move || {
            publisher.publish_blocking(&compiled)
        })
        .await?;
        log::info!("Deployed flow '{}' to {:?}", dialplan.flow_id, target);
        Ok(target)
    }

    async fn remove(&self, file_name: &str) -> Result<(), DeployError> {
        let target = self.target_path(file_name);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                log::info!("Removed {:?}", target);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::io(DeployStep::Remove, e)),
        }
    }

    fn target_path(&self, file_name: &str) -> PathBuf {
        self.dialplan_dir.join(file_name)
    }
}

/// Write the dialplan to an unprivileged temp file
fn write_temp(staging_dir: &Path, text: &str) -> Result<tempfile::NamedTempFile, DeployError> {
    let mut temp = tempfile::Builder::new()
        .prefix(".ivr-")
        .suffix(".conf")
        .tempfile_in(staging_dir)
        .map_err(|e| DeployError::io(DeployStep::Write, e))?;
    temp.write_all(text.as_bytes())
        .and_then(|_| temp.flush())
        .map_err(|e| DeployError::io(DeployStep::Write, e))?;
    Ok(temp)
}

/// Run blocking file work off the runtime, bounded by `limit`.
///
/// On timeout the caller stops waiting; the thread finishes in the background.
async fn run_blocking<T, F>(step: DeployStep, limit: Duration, work: F) -> Result<T, DeployError>
where
    F: FnOnce() -> Result<T, DeployError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(DeployError::StepFailed {
            step,
            status: None,
            stderr: format!("Task join error: {}", e),
        }),
        Err(_) => Err(DeployError::timeout(step, limit)),
    }
}

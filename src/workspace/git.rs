//! Git invocation seam.
//!
//! [`GitOps`] is the narrow set of git operations provisioning needs.
//! [`GitCli`] runs the real `git` binary with an argument vector (never a
//! shell) and the request's [`ChildEnv`] overlay applied.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::models::task::ChildEnv;
use crate::{AppError, Result};

const GIT_PROGRAM: &str = "git";

/// Boxed future returned by [`GitOps`] methods.
pub type GitFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Git operations used while provisioning the workspace.
pub trait GitOps: Send + Sync {
    /// Install a credential helper that reads the token from `token_var`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Git`] if git rejects the configuration.
    fn configure_credential_helper<'a>(&'a self, token_var: &'a str) -> GitFuture<'a>;

    /// Clone `repo_url` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Git`] if the clone fails.
    fn clone_repo<'a>(&'a self, repo_url: &'a str, dest: &'a Path) -> GitFuture<'a>;

    /// Check out `branch` tracking `origin/<branch>`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Git`] if the remote branch does not exist or the
    /// checkout fails.
    fn checkout_tracking<'a>(&'a self, branch: &'a str) -> GitFuture<'a>;

    /// Create `branch` from the current `HEAD` and switch to it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Git`] if the branch cannot be created.
    fn create_branch<'a>(&'a self, branch: &'a str) -> GitFuture<'a>;
}

/// Build the credential-helper value for `token_var`.
///
/// The helper names the variable; git's helper shell expands it at
/// credential time, so the secret never appears in configuration or in
/// any argument list.
#[must_use]
pub fn credential_helper_script(token_var: &str) -> String {
    format!("!f() {{ echo username=x-access-token; echo \"password=${{{token_var}}}\"; }}; f")
}

/// [`GitOps`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    env: ChildEnv,
}

impl GitCli {
    /// Run `git` inside `workdir` with `env` applied.
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>, env: ChildEnv) -> Self {
        Self {
            workdir: workdir.into(),
            env,
        }
    }

    /// Run a command inside the repository.
    async fn run(&self, args: &[&str]) -> Result<()> {
        self.run_in(Some(&self.workdir), args).await
    }

    /// Run a command from `dir`, or from the process working directory when
    /// `None`. Clone and global config run before the repository exists.
    async fn run_in(&self, dir: Option<&Path>, args: &[&str]) -> Result<()> {
        let subcommand = args.first().copied().unwrap_or("git");
        debug!(subcommand, workdir = ?dir, "running git");

        let mut cmd = Command::new(GIT_PROGRAM);
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.env.apply(&mut cmd);

        let output = cmd
            .output()
            .await
            .map_err(|err| AppError::Git(format!("failed to run git {subcommand}: {err}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_owned(), |c| c.to_string());
        Err(AppError::Git(format!(
            "git {subcommand} failed (exit {code}): {}",
            stderr.trim()
        )))
    }
}

impl GitOps for GitCli {
    fn configure_credential_helper<'a>(&'a self, token_var: &'a str) -> GitFuture<'a> {
        Box::pin(async move {
            let helper = credential_helper_script(token_var);
            self.run_in(None, &["config", "--global", "credential.helper", &helper])
                .await
        })
    }

    fn clone_repo<'a>(&'a self, repo_url: &'a str, dest: &'a Path) -> GitFuture<'a> {
        Box::pin(async move {
            let dest = dest.to_string_lossy();
            self.run_in(None, &["clone", "--", repo_url, &dest]).await
        })
    }

    fn checkout_tracking<'a>(&'a self, branch: &'a str) -> GitFuture<'a> {
        Box::pin(async move {
            let remote = format!("origin/{branch}");
            self.run(&["checkout", "-B", branch, "--track", &remote])
                .await
        })
    }

    fn create_branch<'a>(&'a self, branch: &'a str) -> GitFuture<'a> {
        Box::pin(async move { self.run(&["checkout", "-b", branch]).await })
    }
}

impl<T: GitOps + ?Sized> GitOps for Box<T> {
    fn configure_credential_helper<'a>(&'a self, token_var: &'a str) -> GitFuture<'a> {
        (**self).configure_credential_helper(token_var)
    }

    fn clone_repo<'a>(&'a self, repo_url: &'a str, dest: &'a Path) -> GitFuture<'a> {
        (**self).clone_repo(repo_url, dest)
    }

    fn checkout_tracking<'a>(&'a self, branch: &'a str) -> GitFuture<'a> {
        (**self).checkout_tracking(branch)
    }

    fn create_branch<'a>(&'a self, branch: &'a str) -> GitFuture<'a> {
        (**self).create_branch(branch)
    }
}

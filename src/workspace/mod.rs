//! Workspace provisioning.
//!
//! Prepares the workspace root for the agent: clone the repository, check
//! out the requested branch, and confirm the task file is present. A
//! workspace that already holds a `.git` marker is treated as provisioned
//! (container restarts re-enter here), so provisioning is idempotent.
//!
//! Every fatal step returns a [`ProvisionFailure`] carrying its protocol
//! error code; the controller reports it once and stops.

pub mod git;
pub mod path_safety;

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use tracing::{info, info_span, warn, Instrument};

use crate::acp::envelope::ErrorCode;
use crate::config::GIT_TOKEN_VARS;
use crate::models::task::{ChildEnv, TaskRequest};

use self::git::GitOps;

/// Directory whose presence marks a provisioned workspace.
pub const REPO_MARKER: &str = ".git";

/// How provisioning concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The repository was cloned and the branch checked out.
    Fresh,
    /// The workspace already held a repository; clone and checkout skipped.
    Existing,
}

/// A fatal provisioning failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionFailure {
    /// Protocol error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl ProvisionFailure {
    fn new(code: ErrorCode, message: String) -> Self {
        Self { code, message }
    }
}

impl Display for ProvisionFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// Clones and prepares the workspace for one task request.
#[derive(Debug)]
pub struct Provisioner<G> {
    git: G,
    workspace_root: PathBuf,
    env: ChildEnv,
}

impl<G: GitOps> Provisioner<G> {
    /// Provision `workspace_root` using `git`; `env` is consulted for the
    /// source-control token.
    pub fn new(git: G, workspace_root: impl Into<PathBuf>, env: ChildEnv) -> Self {
        Self {
            git,
            workspace_root: workspace_root.into(),
            env,
        }
    }

    /// Whether the workspace already contains a repository.
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.workspace_root.join(REPO_MARKER).exists()
    }

    /// Prepare the workspace for `request`.
    ///
    /// # Errors
    ///
    /// - `GIT_CLONE_FAILED` when the workspace cannot be created or cloned.
    /// - `GIT_CHECKOUT_FAILED` when neither the tracking checkout nor the
    ///   local-branch fallback succeeds.
    /// - `TASK_FILE_NOT_FOUND` when the task file is absent or escapes the
    ///   workspace.
    pub async fn provision(&self, request: &TaskRequest) -> Result<Provisioned, ProvisionFailure> {
        let span = info_span!(
            "provision",
            workspace = %self.workspace_root.display(),
            branch = %request.branch_name
        );
        self.provision_inner(request).instrument(span).await
    }

    async fn provision_inner(&self, request: &TaskRequest) -> Result<Provisioned, ProvisionFailure> {
        let outcome = if self.is_provisioned() {
            info!("workspace already provisioned, skipping clone");
            Provisioned::Existing
        } else {
            self.configure_credentials().await;
            self.clone_repo(&request.repo_url).await?;
            self.checkout(&request.branch_name).await?;
            Provisioned::Fresh
        };

        self.verify_task_file(&request.task_file_path)?;
        Ok(outcome)
    }

    /// Install the credential helper when a token is available.
    ///
    /// Failure is logged only: other authentication (SSH keys, a baked-in
    /// helper) may still let the clone succeed.
    async fn configure_credentials(&self) {
        let Some(token_var) = GIT_TOKEN_VARS
            .iter()
            .copied()
            .find(|var| self.env.get(var).is_some())
        else {
            info!("no git token present, skipping credential helper");
            return;
        };

        match self.git.configure_credential_helper(token_var).await {
            Ok(()) => info!(token_var, "git credential helper configured"),
            Err(err) => warn!(token_var, %err, "failed to configure git credential helper, continuing"),
        }
    }

    async fn clone_repo(&self, repo_url: &str) -> Result<(), ProvisionFailure> {
        tokio::fs::create_dir_all(&self.workspace_root)
            .await
            .map_err(|err| {
                ProvisionFailure::new(
                    ErrorCode::GitCloneFailed,
                    format!("Cannot create workspace {}: {err}", self.workspace_root.display()),
                )
            })?;

        info!(repo_url, "cloning repository");
        self.git
            .clone_repo(repo_url, &self.workspace_root)
            .await
            .map_err(|err| {
                ProvisionFailure::new(
                    ErrorCode::GitCloneFailed,
                    format!("Failed to clone {repo_url}: {err}"),
                )
            })
    }

    async fn checkout(&self, branch: &str) -> Result<(), ProvisionFailure> {
        match self.git.checkout_tracking(branch).await {
            Ok(()) => {
                info!(branch, "checked out remote tracking branch");
                return Ok(());
            }
            Err(err) => {
                info!(branch, %err, "remote branch unavailable, creating local branch");
            }
        }

        self.git.create_branch(branch).await.map_err(|err| {
            ProvisionFailure::new(
                ErrorCode::GitCheckoutFailed,
                format!("Failed to check out branch {branch}: {err}"),
            )
        })?;
        info!(branch, "created local branch from HEAD");
        Ok(())
    }

    fn verify_task_file(&self, task_file_path: &str) -> Result<(), ProvisionFailure> {
        let resolved = path_safety::resolve_within(&self.workspace_root, task_file_path)
            .map_err(|err| {
                ProvisionFailure::new(
                    ErrorCode::TaskFileNotFound,
                    format!("Task file {task_file_path} is not inside the workspace: {err}"),
                )
            })?;

        if resolved.is_file() {
            info!(task_file = %resolved.display(), "task file present");
            Ok(())
        } else {
            Err(ProvisionFailure::new(
                ErrorCode::TaskFileNotFound,
                format!("Task file not found: {}", resolved.display()),
            ))
        }
    }
}

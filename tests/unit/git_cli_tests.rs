//! Unit tests for provisioning through the real `git` executable.
//!
//! Each test builds a local origin repository in a temp directory. Git runs
//! with an isolated `HOME` and global config so the user's settings are
//! neither read nor written. Tests return early when `git` is not installed.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;

use acp_adapter::acp::envelope::ErrorCode;
use acp_adapter::models::task::{ChildEnv, TaskRequest};
use acp_adapter::workspace::git::GitCli;
use acp_adapter::workspace::{Provisioned, Provisioner, REPO_MARKER};

const TASK_FILE: &str = "tasks/plan.json";

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

/// A bare-bones origin repository plus the isolated git home used with it.
struct Origin {
    repo: TempDir,
    home: TempDir,
}

impl Origin {
    /// One commit holding the task file on the default branch, plus
    /// `branches` pointing at it.
    fn new(branches: &[&str]) -> Self {
        let repo = tempfile::tempdir().expect("origin dir");
        let home = tempfile::tempdir().expect("home dir");
        let origin = Self { repo, home };

        origin.git(origin.repo.path(), &["init", "--quiet"]);
        let task = origin.repo.path().join(TASK_FILE);
        std::fs::create_dir_all(task.parent().expect("parent")).expect("tasks dir");
        std::fs::write(&task, "{}").expect("task file");
        origin.git(origin.repo.path(), &["add", "."]);
        origin.git(origin.repo.path(), &["commit", "--quiet", "-m", "initial"]);
        for branch in branches {
            origin.git(origin.repo.path(), &["branch", branch]);
        }
        origin
    }

    fn url(&self) -> String {
        self.repo.path().to_string_lossy().into_owned()
    }

    fn global_config(&self) -> PathBuf {
        self.home.path().join(".gitconfig")
    }

    fn isolation(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("HOME".to_owned(), self.home.path().to_string_lossy().into_owned()),
            (
                "GIT_CONFIG_GLOBAL".to_owned(),
                self.global_config().to_string_lossy().into_owned(),
            ),
            ("GIT_CONFIG_NOSYSTEM".to_owned(), "1".to_owned()),
        ])
    }

    fn env(&self) -> ChildEnv {
        ChildEnv::new(self.isolation())
    }

    fn env_with(&self, key: &str, value: &str) -> ChildEnv {
        let mut vars = self.isolation();
        vars.insert(key.to_owned(), value.to_owned());
        ChildEnv::new(vars)
    }

    fn request(&self, branch: &str) -> TaskRequest {
        TaskRequest {
            task_file_path: TASK_FILE.into(),
            branch_name: branch.into(),
            repo_url: self.url(),
            env_vars: BTreeMap::new(),
        }
    }

    /// Run git in `dir` and return its trimmed stdout.
    fn git(&self, dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=Test",
                "-c",
                "user.email=test@example.com",
                "-c",
                "commit.gpgsign=false",
                "-c",
                "init.defaultBranch=main",
            ])
            .args(args)
            .current_dir(dir)
            .envs(self.isolation())
            .output()
            .expect("run git");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_owned()
    }
}

fn provisioner(root: &Path, env: ChildEnv) -> Provisioner<GitCli> {
    Provisioner::new(GitCli::new(root, env.clone()), root, env)
}

// ── Checkout ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn remote_branch_is_checked_out_with_tracking() {
    if !git_available() {
        return;
    }
    let origin = Origin::new(&["feat/x"]);
    let parent = tempfile::tempdir().expect("tempdir");
    let root = parent.path().join("workspace");

    let result = provisioner(&root, origin.env())
        .provision(&origin.request("feat/x"))
        .await;

    assert_eq!(result, Ok(Provisioned::Fresh));
    assert!(root.join(REPO_MARKER).is_dir());
    assert!(root.join(TASK_FILE).is_file());
    assert_eq!(origin.git(&root, &["rev-parse", "--abbrev-ref", "HEAD"]), "feat/x");
    assert_eq!(
        origin.git(&root, &["rev-parse", "--abbrev-ref", "feat/x@{upstream}"]),
        "origin/feat/x"
    );
}

#[tokio::test]
async fn branch_missing_on_remote_is_created_locally() {
    if !git_available() {
        return;
    }
    let origin = Origin::new(&[]);
    let parent = tempfile::tempdir().expect("tempdir");
    let root = parent.path().join("workspace");

    let result = provisioner(&root, origin.env())
        .provision(&origin.request("feat/new"))
        .await;

    assert_eq!(result, Ok(Provisioned::Fresh));
    assert_eq!(
        origin.git(&root, &["rev-parse", "--abbrev-ref", "HEAD"]),
        "feat/new"
    );
    assert!(
        origin.git(&root, &["branch", "--remotes"]).lines().all(|b| !b.contains("feat/new")),
        "branch exists only locally"
    );
}

#[tokio::test]
async fn relative_workspace_root_is_cloned_in_place() {
    if !git_available() {
        return;
    }
    let origin = Origin::new(&["feat/x"]);
    let cwd = std::env::current_dir().expect("cwd");
    let base = tempfile::Builder::new()
        .prefix("relative-ws")
        .tempdir_in(&cwd)
        .expect("tempdir under cwd");
    let root = base
        .path()
        .strip_prefix(&cwd)
        .expect("tempdir is under cwd")
        .join("workspace");
    assert!(root.is_relative());

    let result = provisioner(&root, origin.env())
        .provision(&origin.request("feat/x"))
        .await;

    assert_eq!(result, Ok(Provisioned::Fresh));
    assert!(root.join(REPO_MARKER).is_dir());
    assert!(!root.join(&root).exists(), "clone must not nest inside itself");
    assert_eq!(origin.git(&root, &["rev-parse", "--abbrev-ref", "HEAD"]), "feat/x");
}

// ── Idempotence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_provision_keeps_the_existing_clone() {
    if !git_available() {
        return;
    }
    let origin = Origin::new(&["feat/x"]);
    let parent = tempfile::tempdir().expect("tempdir");
    let root = parent.path().join("workspace");
    let provisioner = provisioner(&root, origin.env());

    assert_eq!(
        provisioner.provision(&origin.request("feat/x")).await,
        Ok(Provisioned::Fresh)
    );
    std::fs::write(root.join("agent-notes.txt"), "work in progress").expect("scratch file");

    assert_eq!(
        provisioner.provision(&origin.request("feat/x")).await,
        Ok(Provisioned::Existing)
    );
    assert!(root.join("agent-notes.txt").is_file());
    assert_eq!(origin.git(&root, &["rev-parse", "--abbrev-ref", "HEAD"]), "feat/x");
}

// ── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_repository_reports_git_clone_failed() {
    if !git_available() {
        return;
    }
    let origin = Origin::new(&[]);
    let parent = tempfile::tempdir().expect("tempdir");
    let root = parent.path().join("workspace");
    let mut request = origin.request("feat/x");
    request.repo_url = parent.path().join("missing.git").to_string_lossy().into_owned();

    let failure = provisioner(&root, origin.env())
        .provision(&request)
        .await
        .expect_err("clone fails");

    assert_eq!(failure.code, ErrorCode::GitCloneFailed);
    assert!(failure.message.contains("missing.git"));
    assert!(!root.join(REPO_MARKER).exists());
}

// ── Credential helper ───────────────────────────────────────────────────────

#[tokio::test]
async fn installed_credential_helper_answers_with_the_token() {
    if !git_available() {
        return;
    }
    let origin = Origin::new(&["feat/x"]);
    let parent = tempfile::tempdir().expect("tempdir");
    let root = parent.path().join("workspace");

    provisioner(&root, origin.env_with("GH_TOKEN", "ghp_from_request"))
        .provision(&origin.request("feat/x"))
        .await
        .expect("provisioned");

    let config = std::fs::read_to_string(origin.global_config()).expect("global config");
    assert!(config.contains("helper"), "helper installed: {config}");
    assert!(!config.contains("ghp_from_request"), "secret never stored");

    let mut fill = Command::new("git")
        .args(["credential", "fill"])
        .envs(origin.isolation())
        .env("GH_TOKEN", "ghp_from_request")
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn git credential");
    fill.stdin
        .take()
        .expect("stdin")
        .write_all(b"protocol=https\nhost=example.com\n\n")
        .expect("write credential request");
    let output = fill.wait_with_output().expect("git credential output");

    let answer = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(answer.contains("username=x-access-token"), "got {answer}");
    assert!(answer.contains("password=ghp_from_request"), "got {answer}");
}

//! Git CLI wrapper for content hashes and repository metadata.
//!
//! Shells out to `git` via `tokio::process::Command`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

/// Errors from git invocations.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("failed to resolve {path}: {source}")]
    Resolve {
        path: String,
        source: std::io::Error,
    },

    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error("{path} is outside repository {root}")]
    OutsideRepository { path: String, root: String },

    #[error("unrecognized git remote URL: {0}")]
    UnrecognizedRemote(String),
}

static SSH_REMOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^git@([^:]+):(.+?)(?:\.git)?$").unwrap());
static HTTPS_REMOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://([^/]+)/(.+?)(?:\.git)?$").unwrap());

/// Run `git <args>` in `dir` and return trimmed stdout.
async fn run_git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(GitError::Spawn)?;

    if !output.status.success() {
        return Err(GitError::Command {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Find the root of the git repository containing `start_dir`.
pub async fn find_repo_root(start_dir: &Path) -> Result<PathBuf, GitError> {
    match run_git(start_dir, &["rev-parse", "--show-toplevel"]).await {
        Ok(root) if !root.is_empty() => Ok(PathBuf::from(root)),
        Ok(_) => Err(GitError::NotARepository(start_dir.display().to_string())),
        Err(GitError::Command { stderr, .. }) => Err(GitError::NotARepository(stderr)),
        Err(e) => Err(e),
    }
}

/// Object hash of `file_path` as stored at `commit`.
pub async fn blob_hash_at(repo_root: &Path, commit: &str, file_path: &str) -> Result<String, GitError> {
    let object = format!("{commit}:{file_path}");
    run_git(repo_root, &["rev-parse", &object]).await
}

/// Object hash git would assign to the file's current contents.
pub async fn hash_object(repo_root: &Path, file: &Path) -> Result<String, GitError> {
    let file = file.to_string_lossy();
    run_git(repo_root, &["hash-object", "--", &file]).await
}

/// Convert an SSH or HTTPS remote URL to `https://host/owner/repo`.
pub fn remote_to_https(remote_url: &str) -> Result<String, GitError> {
    let url = remote_url.trim();
    let caps = SSH_REMOTE
        .captures(url)
        .or_else(|| HTTPS_REMOTE.captures(url))
        .ok_or_else(|| GitError::UnrecognizedRemote(url.to_string()))?;
    Ok(format!("https://{}/{}", &caps[1], &caps[2]))
}

/// Where a file lives inside a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    /// `https://host/owner/repo`
    pub repo_url: String,
    pub relative_path: String,
    pub revision: String,
}

impl FileLocation {
    pub fn web_url(&self) -> String {
        format!("{}/blob/{}/{}", self.repo_url, self.revision, self.relative_path)
    }
}

/// Resolve the hosted location of `file` from its repository's `origin`.
pub async fn file_location(file: &Path) -> Result<FileLocation, GitError> {
    let dir = file.parent().unwrap_or(Path::new("."));
    let remote = run_git(dir, &["remote", "get-url", "origin"]).await?;
    let repo_url = remote_to_https(&remote)?;
    let root = find_repo_root(dir).await?;
    let revision = run_git(dir, &["rev-parse", "HEAD"]).await?;
    let relative_path = relative_to(&root, file)?;
    Ok(FileLocation {
        repo_url,
        relative_path,
        revision,
    })
}

/// Path of `file` relative to `root`, with `/` separators.
fn relative_to(root: &Path, file: &Path) -> Result<String, GitError> {
    let root_abs = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let file_abs = std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());
    let rel = file_abs
        .strip_prefix(&root_abs)
        .map_err(|_| GitError::OutsideRepository {
            path: file.display().to_string(),
            root: root.display().to_string(),
        })?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Source of content hashes used as cache keys.
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Hash of `file_path` at `commit` in the reviewed repository.
    async fn file_blob_hash(&self, commit: &str, file_path: &str) -> Result<String, GitError>;

    /// Version-control hash of a rule definition file.
    async fn rule_blob_hash(&self, rule_file: &Path) -> Result<String, GitError>;
}

/// [`BlobSource`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitBlobSource {
    repo_root: PathBuf,
}

impl GitBlobSource {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }
}

#[async_trait]
impl BlobSource for GitBlobSource {
    async fn file_blob_hash(&self, commit: &str, file_path: &str) -> Result<String, GitError> {
        blob_hash_at(&self.repo_root, commit, file_path).await
    }

    async fn rule_blob_hash(&self, rule_file: &Path) -> Result<String, GitError> {
        let rule_file = std::fs::canonicalize(rule_file).map_err(|e| GitError::Resolve {
            path: rule_file.display().to_string(),
            source: e,
        })?;
        let dir = rule_file.parent().unwrap_or(Path::new("."));
        let root = find_repo_root(dir).await?;
        relative_to(&root, &rule_file)?;
        hash_object(&root, &rule_file).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_repo::{git, init_with};
    use super::*;

    #[test]
    fn remote_urls_convert_to_https() {
        assert_eq!(
            remote_to_https("git@github.com:acme/rules.git").unwrap(),
            "https://github.com/acme/rules"
        );
        assert_eq!(
            remote_to_https("https://github.com/acme/rules.git\n").unwrap(),
            "https://github.com/acme/rules"
        );
        assert_eq!(
            remote_to_https("https://github.com/acme/rules").unwrap(),
            "https://github.com/acme/rules"
        );
        assert!(matches!(
            remote_to_https("/srv/git/rules"),
            Err(GitError::UnrecognizedRemote(_))
        ));
    }

    #[tokio::test]
    async fn find_repo_root_non_git() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_repo_root(dir.path()).await.unwrap_err();
        assert!(matches!(err, GitError::NotARepository(_)), "got: {err}");
    }

    #[tokio::test]
    async fn blob_hash_tracks_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let first = init_with(p, &[("src/a.py", "print(1)\n")]).await;

        tokio::fs::write(p.join("src/a.py"), "print(2)\n").await.unwrap();
        git(p, &["commit", "-q", "-am", "change"]).await;
        let second = git(p, &["rev-parse", "HEAD"]).await;

        let source = GitBlobSource::new(p);
        let h1 = source.file_blob_hash(&first, "src/a.py").await.unwrap();
        let h2 = source.file_blob_hash(&second, "src/a.py").await.unwrap();
        assert_eq!(h1.len(), 40);
        assert_ne!(h1, h2);
        assert!(source.file_blob_hash(&first, "missing.py").await.is_err());
    }

    #[tokio::test]
    async fn rule_blob_hash_matches_committed_blob() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let sha = init_with(p, &[("rules/no-print.md", "Do not print.\n")]).await;

        let source = GitBlobSource::new(p);
        let hash = source.rule_blob_hash(&p.join("rules/no-print.md")).await.unwrap();
        let committed = blob_hash_at(p, &sha, "rules/no-print.md").await.unwrap();
        assert_eq!(hash, committed);
    }

    #[tokio::test]
    async fn rule_blob_hash_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("r.md"), "x").await.unwrap();
        let source = GitBlobSource::new(dir.path());
        assert!(source.rule_blob_hash(&dir.path().join("r.md")).await.is_err());
    }

    #[tokio::test]
    async fn file_location_builds_web_url() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let sha = init_with(p, &[("rules/style/no-print.md", "x")]).await;
        git(p, &["remote", "add", "origin", "git@github.com:acme/rules.git"]).await;

        let location = file_location(&p.join("rules/style/no-print.md")).await.unwrap();
        assert_eq!(location.relative_path, "rules/style/no-print.md");
        assert_eq!(
            location.web_url(),
            format!("https://github.com/acme/rules/blob/{sha}/rules/style/no-print.md")
        );
    }
}

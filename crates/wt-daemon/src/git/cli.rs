//! [`GitPorcelain`] backed by the `git` command line.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::debug;
use wt_core::protocol::{AheadBehind, CommitInfo};

use super::{GitError, GitPorcelain, GitWorktree};

/// Runs `git -C <dir> ...` for each query.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
}

impl GitCli {
    /// Porcelain rooted at the main checkout `repo`.
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    fn output<I, S>(cwd: &Path, args: I) -> Result<(String, Output), GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let shown = args
            .iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        let start = std::time::Instant::now();
        let output = Command::new("git")
            .arg("-C")
            .arg(cwd)
            .args(&args)
            // Status reads must not take index.lock away from the user's git.
            .env("GIT_OPTIONAL_LOCKS", "0")
            .stdin(Stdio::null())
            .output()?;
        debug!(
            cwd = %cwd.display(),
            args = %shown,
            elapsed_ms = start.elapsed().as_millis(),
            code = ?output.status.code(),
            "git"
        );
        Ok((shown, output))
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    fn run<I, S>(cwd: &Path, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (display, output) = Self::output(cwd, args)?;
        if !output.status.success() {
            return Err(GitError::Command {
                args: display,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

fn parse_count(raw: &str, what: &str) -> Result<u64, GitError> {
    raw.trim()
        .parse()
        .map_err(|_| GitError::Parse(format!("{what} count {raw:?}")))
}

fn parse_worktree_list(raw: &str) -> Vec<GitWorktree> {
    let mut worktrees = Vec::new();
    let mut current: Option<GitWorktree> = None;
    for line in raw.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                worktrees.push(done);
            }
            current = Some(GitWorktree {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(reference) = line.strip_prefix("branch ") {
            if let Some(wt) = current.as_mut() {
                wt.branch = Some(
                    reference
                        .strip_prefix("refs/heads/")
                        .unwrap_or(reference)
                        .to_string(),
                );
            }
        }
    }
    worktrees.extend(current);
    worktrees
}

impl GitPorcelain for GitCli {
    fn head_branch(&self, worktree: &Path) -> Result<Option<String>, GitError> {
        let (display, output) = Self::output(worktree, ["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok((!name.is_empty()).then_some(name));
        }
        // --quiet exits 1 with no message for a detached HEAD.
        if output.status.code() == Some(1) && output.stderr.is_empty() {
            return Ok(None);
        }
        Err(GitError::Command {
            args: display,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn commit_info(&self, worktree: &Path, reference: &str) -> Result<CommitInfo, GitError> {
        let raw = Self::run(
            worktree,
            ["log", "-1", "--format=%H%x00%an%x00%cI%x00%B", reference, "--"],
        )
        .map_err(|e| match e {
            GitError::Command { .. } => GitError::NoSuchRef(reference.to_string()),
            other => other,
        })?;
        let mut parts = raw.splitn(4, '\0');
        let (Some(hash), Some(author), Some(date), Some(message)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(GitError::Parse(format!("log output for {reference}")));
        };
        Ok(CommitInfo {
            short_hash: hash.chars().take(8).collect(),
            hash: hash.to_string(),
            message: message.trim().to_string(),
            author: author.to_string(),
            date: date.to_string(),
        })
    }

    fn resolve_ref(&self, reference: &str) -> Result<String, GitError> {
        Self::run(
            &self.repo,
            ["rev-parse", "--verify", "--quiet", &format!("{reference}^{{commit}}")],
        )
        .map_err(|_| GitError::NoSuchRef(reference.to_string()))
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let (_, output) = Self::output(
            &self.repo,
            ["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )?;
        Ok(output.status.success())
    }

    fn list_worktrees(&self) -> Result<Vec<GitWorktree>, GitError> {
        let raw = Self::run(&self.repo, ["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&raw))
    }

    fn ahead_behind(&self, branch: &str, upstream: &str) -> Result<AheadBehind, GitError> {
        let range = format!("refs/heads/{branch}...{upstream}");
        let raw = Self::run(&self.repo, ["rev-list", "--left-right", "--count", &range])?;
        let (ahead, behind) = raw
            .split_once('\t')
            .ok_or_else(|| GitError::Parse(format!("rev-list output {raw:?}")))?;
        Ok(AheadBehind::new(
            parse_count(ahead, "ahead")?,
            parse_count(behind, "behind")?,
        ))
    }

    fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<(), GitError> {
        let path = path.as_os_str();
        if self.branch_exists(branch)? {
            Self::run(
                &self.repo,
                [OsStr::new("worktree"), OsStr::new("add"), path, OsStr::new(branch)],
            )?;
        } else {
            Self::run(
                &self.repo,
                [
                    OsStr::new("worktree"),
                    OsStr::new("add"),
                    OsStr::new("-b"),
                    OsStr::new(branch),
                    path,
                    OsStr::new(base),
                ],
            )?;
        }
        Ok(())
    }

    fn worktree_remove(&self, path: &Path, force: bool) -> Result<(), GitError> {
        let mut args = vec![OsStr::new("worktree"), OsStr::new("remove")];
        if force {
            args.push(OsStr::new("--force"));
        }
        args.push(path.as_os_str());
        Self::run(&self.repo, args)?;
        Ok(())
    }

    fn common_git_dir(&self) -> Result<PathBuf, GitError> {
        let raw = Self::run(&self.repo, ["rev-parse", "--git-common-dir"])?;
        let dir = PathBuf::from(raw);
        let dir = if dir.is_relative() {
            self.repo.join(dir)
        } else {
            dir
        };
        Ok(dir.canonicalize()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{commit, git, init_repo};

    #[test]
    fn head_branch_reports_checked_out_branch() {
        let repo = init_repo();
        let cli = GitCli::new(repo.path());
        assert_eq!(cli.head_branch(repo.path()).unwrap().as_deref(), Some("main"));
    }

    #[test]
    fn head_branch_is_none_when_detached() {
        let repo = init_repo();
        git(repo.path(), &["checkout", "--detach", "HEAD"]);
        let cli = GitCli::new(repo.path());
        assert_eq!(cli.head_branch(repo.path()).unwrap(), None);
    }

    #[test]
    fn ahead_behind_counts_local_commits() {
        let repo = init_repo();
        git(repo.path(), &["checkout", "-b", "feature"]);
        for i in 0..3 {
            commit(repo.path(), &format!("feature {i}"));
        }
        git(repo.path(), &["checkout", "main"]);
        commit(repo.path(), "main moves on");

        let cli = GitCli::new(repo.path());
        assert_eq!(
            cli.ahead_behind("feature", "main").unwrap(),
            AheadBehind::new(3, 1)
        );
    }

    #[test]
    fn ahead_behind_fails_for_deleted_branch() {
        let repo = init_repo();
        let cli = GitCli::new(repo.path());
        assert!(cli.ahead_behind("gone", "main").is_err());
    }

    #[test]
    fn commit_info_has_eight_char_short_hash() {
        let repo = init_repo();
        commit(repo.path(), "subject line\n\nbody");
        let cli = GitCli::new(repo.path());
        let info = cli.commit_info(repo.path(), "HEAD").unwrap();
        assert_eq!(info.hash.len(), 40);
        assert_eq!(info.short_hash, info.hash[..8]);
        assert_eq!(info.message, "subject line\n\nbody");
        assert_eq!(info.author, "wt test");
    }

    #[test]
    fn resolve_ref_missing_is_no_such_ref() {
        let repo = init_repo();
        let cli = GitCli::new(repo.path());
        assert!(matches!(
            cli.resolve_ref("refs/heads/nope"),
            Err(GitError::NoSuchRef(_))
        ));
        assert_eq!(cli.resolve_ref("main").unwrap().len(), 40);
    }

    #[test]
    fn worktree_add_list_remove() {
        let repo = init_repo();
        let wts = tempfile::tempdir().unwrap();
        let path = wts.path().join("feat");
        let cli = GitCli::new(repo.path());

        cli.worktree_add(&path, "feat", "main").unwrap();
        assert!(cli.branch_exists("feat").unwrap());
        let listed = cli.list_worktrees().unwrap();
        assert!(listed
            .iter()
            .any(|w| w.branch.as_deref() == Some("feat")));

        let common = GitCli::new(&path).common_git_dir().unwrap();
        assert_eq!(common, repo.path().join(".git").canonicalize().unwrap());

        cli.worktree_remove(&path, false).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn parse_worktree_list_handles_detached_entries() {
        let raw = "worktree /r\nHEAD abc\nbranch refs/heads/main\n\nworktree /w\nHEAD def\ndetached\n";
        let parsed = parse_worktree_list(raw);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].branch.as_deref(), Some("main"));
        assert_eq!(parsed[1].branch, None);
    }
}

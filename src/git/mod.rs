//! Git history import.
//!
//! Walks the commit log, keeps commits that look significant (conventional
//! prefixes, optionally merges), and feeds each one through the learn
//! pipeline as an episodic memory backdated to the commit time. Incremental
//! mode stops at the last synced sha; full re-walks are safe because the
//! deduplicator collapses already-imported commits by content hash.
//!
//! Also resolves the default user identity from git configuration.

use crate::config::{GitSyncConfig, LearningConfig};
use crate::learner::Learner;
use crate::models::{LearnRequest, MemoryType, SourceType};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use git2::{Commit, Repository};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Cap on file names carried into the memory content.
const MAX_FILES_IN_CONTENT: usize = 20;

/// Counters from one sync run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncOutcome {
    /// Commits examined.
    pub scanned: usize,
    /// Commits stored or bumped.
    pub imported: usize,
    /// Commits rejected by the filters.
    pub skipped: usize,
    /// Newest sha seen; becomes the next incremental cursor.
    pub last_sha: Option<String>,
}

/// Commit-history importer.
#[derive(Debug)]
pub struct GitImporter {
    config: GitSyncConfig,
}

impl GitImporter {
    /// Creates an importer with the given sync settings.
    #[must_use]
    pub const fn new(config: GitSyncConfig) -> Self {
        Self { config }
    }

    /// Walks the history of the repository containing `repo_path` and
    /// learns every significant commit.
    ///
    /// With `incremental` set, the walk stops at the configured
    /// `last_commit_sha`; otherwise the whole reachable history is
    /// re-examined and deduplication absorbs the repeats.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] when the repository cannot be
    /// opened or walked; per-commit learn failures are logged and counted,
    /// not fatal.
    #[instrument(skip(self, learner), fields(incremental))]
    pub fn sync(&self, repo_path: &Path, learner: &Learner, incremental: bool) -> Result<SyncOutcome> {
        if !self.config.enabled {
            return Ok(SyncOutcome::default());
        }
        let repo = Repository::discover(repo_path).map_err(|e| git_error("open_repository", &e))?;

        let branch = repo
            .head()
            .ok()
            .and_then(|head| head.shorthand().map(ToString::to_string))
            .unwrap_or_else(|| "HEAD".to_string());
        if !self.branch_allowed(&branch) {
            debug!(branch, "branch excluded from git sync");
            return Ok(SyncOutcome::default());
        }

        let cursor = if incremental {
            self.config.last_commit_sha.as_deref()
        } else {
            None
        };

        let mut walk = repo.revwalk().map_err(|e| git_error("revwalk", &e))?;
        walk.push_head().map_err(|e| git_error("revwalk_push_head", &e))?;
        walk.set_sorting(git2::Sort::TIME)
            .map_err(|e| git_error("revwalk_sorting", &e))?;

        // Collect newest-first until the cursor, then import oldest-first so
        // creation times line up with history.
        let mut pending: Vec<git2::Oid> = Vec::new();
        for oid in walk {
            let oid = oid.map_err(|e| git_error("revwalk_next", &e))?;
            if cursor == Some(oid.to_string().as_str()) {
                break;
            }
            pending.push(oid);
        }

        let mut outcome = SyncOutcome {
            last_sha: pending.first().map(ToString::to_string),
            ..SyncOutcome::default()
        };
        if outcome.last_sha.is_none() {
            outcome.last_sha = cursor.map(ToString::to_string);
        }

        for oid in pending.iter().rev() {
            let commit = repo
                .find_commit(*oid)
                .map_err(|e| git_error("find_commit", &e))?;
            outcome.scanned += 1;

            let Some(summary) = commit.summary().map(ToString::to_string) else {
                outcome.skipped += 1;
                continue;
            };
            if !self.commit_significant(&commit, &summary) {
                outcome.skipped += 1;
                continue;
            }

            let request = self.build_request(&repo, &commit, &summary, &branch);
            match learner.learn(&request) {
                Ok(learn_outcome) if learn_outcome.skipped() => outcome.skipped += 1,
                Ok(_) => outcome.imported += 1,
                Err(e) => {
                    tracing::warn!(sha = %oid, error = %e, "failed to import commit");
                    outcome.skipped += 1;
                },
            }
        }

        info!(
            scanned = outcome.scanned,
            imported = outcome.imported,
            skipped = outcome.skipped,
            "git sync complete"
        );
        metrics::counter!("git_sync_imported_total")
            .increment(u64::try_from(outcome.imported).unwrap_or(0));
        Ok(outcome)
    }

    /// Branch filtering: include patterns (empty means all) minus excludes.
    fn branch_allowed(&self, branch: &str) -> bool {
        let matches_any = |patterns: &[String]| {
            patterns
                .iter()
                .any(|p| branch.contains(p.as_str()))
        };
        if !self.config.branch_include_patterns.is_empty()
            && !matches_any(&self.config.branch_include_patterns)
        {
            return false;
        }
        !matches_any(&self.config.branch_exclude_patterns)
    }

    /// Include/exclude rules for one commit message.
    fn commit_significant(&self, commit: &Commit<'_>, summary: &str) -> bool {
        let lowered = summary.to_lowercase();
        if self
            .config
            .skip_patterns
            .iter()
            .any(|p| lowered.contains(&p.to_lowercase()))
        {
            return false;
        }
        if summary.chars().count() < self.config.min_message_length {
            return false;
        }

        let is_merge = commit.parent_count() > 1;
        if is_merge {
            return self.config.include_merge_commits;
        }
        self.config
            .significant_prefixes
            .iter()
            .any(|prefix| summary.starts_with(prefix.as_str()))
    }

    /// Builds the learn request for an accepted commit.
    fn build_request(
        &self,
        repo: &Repository,
        commit: &Commit<'_>,
        summary: &str,
        branch: &str,
    ) -> LearnRequest {
        let files = changed_files(repo, commit);
        let content = if files.is_empty() {
            summary.to_string()
        } else {
            format!("{summary} | Files: {}", files.join(", "))
        };

        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("sha".to_string(), commit.id().to_string().into());
        metadata.insert("branch".to_string(), branch.to_string().into());
        if let Some(name) = commit.author().name() {
            metadata.insert("author".to_string(), name.to_string().into());
        }
        if let Some(email) = commit.author().email() {
            metadata.insert("author_email".to_string(), email.to_string().into());
        }
        if let Some(name) = commit.committer().name() {
            metadata.insert("committer".to_string(), name.to_string().into());
        }

        LearnRequest {
            content,
            source: SourceType::GitSync,
            session_id: None,
            agent_id: None,
            user_id: None,
            metadata,
            memory_type: Some(MemoryType::Episodic),
            created_at: Some(commit_time(commit)),
        }
    }
}

/// Paths touched by a commit, against its first parent (or the empty tree).
fn changed_files(repo: &Repository, commit: &Commit<'_>) -> Vec<String> {
    let Ok(tree) = commit.tree() else {
        return Vec::new();
    };
    let parent_tree = commit.parent(0).ok().and_then(|parent| parent.tree().ok());
    let Ok(diff) = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None) else {
        return Vec::new();
    };

    let mut files: Vec<String> = diff
        .deltas()
        .filter_map(|delta| delta.new_file().path().map(|p| p.display().to_string()))
        .take(MAX_FILES_IN_CONTENT)
        .collect();
    files.sort();
    files.dedup();
    files
}

/// Commit timestamp as UTC.
fn commit_time(commit: &Commit<'_>) -> DateTime<Utc> {
    Utc.timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Maps a git error into the storage taxonomy.
fn git_error(operation: &str, e: &git2::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.message().to_string(),
    }
}

/// Resolves the default user identity.
///
/// Precedence: `learning.user_id_override`, then git config `user.email`
/// (repository-local, then global) when `auto_tag_git_user` is set, then
/// `$USER`, then `"default"`.
#[must_use]
pub fn resolve_user_id(config: &LearningConfig, repo_path: &Path) -> String {
    if let Some(overridden) = &config.user_id_override {
        return overridden.clone();
    }
    if config.auto_tag_git_user {
        let local = Repository::discover(repo_path)
            .ok()
            .and_then(|repo| repo.config().ok())
            .and_then(|cfg| cfg.get_string("user.email").ok());
        if let Some(email) = local {
            return email;
        }
        let global = git2::Config::open_default()
            .ok()
            .and_then(|cfg| cfg.get_string("user.email").ok());
        if let Some(email) = global {
            return email;
        }
    }
    std::env::var("USER").unwrap_or_else(|_| "default".to_string())
}

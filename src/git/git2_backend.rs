use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use git2::{
    BranchType, Commit, Cred, ErrorCode, FetchOptions, IndexAddOption, ObjectType, Oid, Reference,
    RemoteCallbacks, Repository, ResetType, Signature, Time, TreeWalkMode, TreeWalkResult,
    build::{CheckoutBuilder, RepoBuilder},
};
use std::fs;
use std::path::Path;

use crate::repositories::{Revision, RevisionMetadata};

/// Build a `FetchOptions` with SSH-agent credentials enabled.
///
/// If no SSH key is found, it falls back to default credentials.
fn fetch_opts_with_creds() -> FetchOptions<'static> {
    let mut cb = RemoteCallbacks::new();
    cb.credentials(|_url, username_from_url, _allowed| {
        Cred::ssh_key_from_agent(username_from_url.unwrap_or("git")).or_else(|_| Cred::default())
    });

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(cb);
    fo
}

/// Attach to the remote's default branch (origin/HEAD), creating a local
/// tracking branch if necessary, and hard-reset to the remote tip.
///
/// Fallbacks are tried in order if `origin/HEAD` is missing:
/// `refs/remotes/origin/main` → `refs/remotes/origin/master`.
fn attach_default_branch(repo: &Repository) -> Result<()> {
    let target_remote_ref = if let Ok(origin_head) = repo.find_reference("refs/remotes/origin/HEAD")
    {
        origin_head
            .symbolic_target()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("origin/HEAD has no symbolic target"))?
    } else if repo.find_reference("refs/remotes/origin/main").is_ok() {
        "refs/remotes/origin/main".to_string()
    } else if repo.find_reference("refs/remotes/origin/master").is_ok() {
        "refs/remotes/origin/master".to_string()
    } else {
        return Err(anyhow!(
            "could not determine default branch (missing origin/HEAD, origin/main, origin/master)"
        ));
    };

    let branch_name = target_remote_ref
        .strip_prefix("refs/remotes/origin/")
        .ok_or_else(|| anyhow!("unexpected remote ref: {}", target_remote_ref))?;
    track_remote_branch(repo, branch_name)
}

/// Point the local `branch` at `origin/<branch>` and check it out.
fn track_remote_branch(repo: &Repository, branch: &str) -> Result<()> {
    let remote_tip = repo
        .find_reference(&format!("refs/remotes/origin/{branch}"))
        .with_context(|| format!("branch not found on origin: {branch}"))?
        .peel_to_commit()?;

    let local_ref = match repo.find_branch(branch, BranchType::Local) {
        Ok(mut b) => {
            b.get_mut().set_target(remote_tip.id(), "revsync: sync with origin")?;
            b.into_reference()
        }
        Err(_) => {
            let mut b = repo.branch(branch, &remote_tip, true)?;
            b.set_upstream(Some(&format!("origin/{branch}")))?;
            b.into_reference()
        }
    };

    checkout_attach_to_reference(repo, &local_ref)?;
    repo.reset(remote_tip.as_object(), ResetType::Hard, None)?;
    Ok(())
}

/// Ensure that an up-to-date clone of `url` exists at `dest`.
///
/// - If the clone already exists, fetches `origin`.
/// - Otherwise clones it.
///
/// Either way the clone ends up on `branch` (or the remote's default branch),
/// hard-reset to the remote tip.
///
/// # Errors
/// Returns an error if cloning, fetching, or checkout fails.
pub fn ensure_repo(url: &str, dest: &Path, branch: Option<&str>) -> Result<Repository> {
    let repo = if dest.join(".git").exists() {
        let repo = Repository::open(dest)?;
        fetch_origin(&repo)?;
        repo
    } else {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_opts_with_creds());
        builder
            .clone(url, dest)
            .with_context(|| format!("git clone {}", url))?
    };

    match branch {
        Some(b) => track_remote_branch(&repo, b)?,
        None => attach_default_branch(&repo)?,
    }
    Ok(repo)
}

/// Perform `git fetch origin` to update remote refs and tags.
pub fn fetch_origin(repo: &Repository) -> Result<()> {
    let mut fo = fetch_opts_with_creds();

    let mut remote = repo.find_remote("origin")?;
    remote
        .fetch(
            &[
                "refs/heads/*:refs/remotes/origin/*",
                "refs/tags/*:refs/tags/*",
            ],
            Some(&mut fo),
            None,
        )
        .context("git fetch origin")?;
    Ok(())
}

fn checkout_attach_to_reference(repo: &Repository, reference: &Reference) -> Result<()> {
    let name = reference
        .name()
        .ok_or_else(|| anyhow!("invalid reference name"))?;
    repo.set_head(name)?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(())
}

/// Clone the local repository at `src` into `dest` and detach HEAD at `rev`
/// when given.
pub fn clone_local(src: &Path, dest: &Path, rev: Option<&str>) -> Result<Repository> {
    let src_url = src
        .to_str()
        .ok_or_else(|| anyhow!("non UTF-8 path: {}", src.display()))?;
    let repo = RepoBuilder::new()
        .clone(src_url, dest)
        .with_context(|| format!("git clone {}", src.display()))?;
    if let Some(rev) = rev {
        let commit = repo
            .revparse_single(rev)
            .with_context(|| format!("rev not found: {}", rev))?
            .peel(ObjectType::Commit)?
            .into_commit()
            .map_err(|_| anyhow!("rev didn't peel to a commit"))?;
        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        repo.set_head_detached(commit.id())?;
    }
    Ok(repo)
}

/// Resolve `spec` (a SHA, branch or any revspec) to a commit; `None` means HEAD.
///
/// Returns `Ok(None)` when the spec names nothing.
pub fn resolve_commit<'r>(repo: &'r Repository, spec: Option<&str>) -> Result<Option<Commit<'r>>> {
    let obj = match spec {
        None => repo.head()?.peel(ObjectType::Commit),
        Some(s) => repo.revparse_single(s),
    };
    match obj {
        Ok(o) => Ok(Some(o.peel_to_commit()?)),
        Err(e) if e.code() == ErrorCode::NotFound || e.code() == ErrorCode::Ambiguous => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Look up a commit by full id; `Ok(None)` if it is absent or `rev_id` is not a SHA.
pub fn find_commit<'r>(repo: &'r Repository, rev_id: &str) -> Result<Option<Commit<'r>>> {
    let Ok(oid) = Oid::from_str(rev_id) else {
        return Ok(None);
    };
    match repo.find_commit(oid) {
        Ok(c) => Ok(Some(c)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn commit_metadata(commit: &Commit, repository_name: &str) -> RevisionMetadata {
    let author = commit.author();
    let author = match (author.name(), author.email()) {
        (Some(n), Some(e)) if !e.is_empty() => Some(format!("{n} <{e}>")),
        (Some(n), _) => Some(n.to_string()),
        _ => None,
    };
    let md = RevisionMetadata {
        id: commit.id().to_string(),
        author,
        date: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
        description: commit.message().unwrap_or_default().trim_end().to_string(),
        parents: commit
            .parent_ids()
            .map(|p| Revision::new(p.to_string(), repository_name))
            .collect(),
        fields: Vec::new(),
    };
    md.with_parsed_fields()
}

/// Write every blob of `commit`'s tree under `dest`.
pub fn export_tree(repo: &Repository, commit: &Commit, dest: &Path) -> Result<()> {
    let tree = commit.tree()?;
    let mut blobs = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() == Some(ObjectType::Blob)
            && let Some(name) = entry.name()
        {
            blobs.push((format!("{dir}{name}"), entry.id(), entry.filemode()));
        }
        TreeWalkResult::Ok
    })?;

    for (rel, id, mode) in blobs {
        let blob = repo.find_blob(id)?;
        let path = dest.join(&rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, blob.content()).with_context(|| format!("writing {}", path.display()))?;
        #[cfg(unix)]
        if mode == 0o100755 {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
    }
    Ok(())
}

/// Stage the whole worktree (additions, edits and deletions) and commit it on
/// HEAD. Returns the new commit, or HEAD unchanged if nothing differs.
pub fn commit_worktree(repo: &Repository, metadata: &RevisionMetadata) -> Result<Oid> {
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT | IndexAddOption::FORCE, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let parent = match repo.head() {
        Ok(h) => Some(h.peel_to_commit()?),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    if let Some(p) = &parent
        && p.tree_id() == tree.id()
    {
        tracing::info!(head = %p.id(), "nothing to commit");
        return Ok(p.id());
    }

    let author = signature_for(metadata)?;
    let committer = repo
        .signature()
        .or_else(|_| Signature::now("revsync", "revsync@localhost"))?;
    let parents: Vec<&Commit> = parent.iter().collect();
    let message = commit_message(metadata);
    let oid = repo.commit(Some("HEAD"), &author, &committer, &message, &tree, &parents)?;
    Ok(oid)
}

/// Signature from the metadata's author, dated like the metadata.
///
/// A batched migration carries several authors joined by `, `; the first one
/// signs the commit and the rest are listed in the message.
fn signature_for(metadata: &RevisionMetadata) -> Result<Signature<'static>> {
    let time = Time::new(metadata.date.timestamp(), 0);
    let (name, email) = metadata
        .author
        .as_deref()
        .map(first_author)
        .unwrap_or_default();
    let name = if name.is_empty() { "revsync" } else { name };
    let email = if email.is_empty() {
        "revsync@localhost"
    } else {
        email
    };
    Ok(Signature::new(name, email, &time)?)
}

/// Name and email of the first author in `authors`. Neither contains angle
/// brackets.
fn first_author(authors: &str) -> (&str, &str) {
    match authors.split_once('<') {
        Some((name, rest)) => {
            let email = rest.split_once('>').map_or(rest, |(e, _)| e);
            (name.trim(), email.trim())
        }
        None => (authors.split(", ").next().unwrap_or_default().trim(), ""),
    }
}

fn is_single_author(authors: &str) -> bool {
    authors.matches('<').count() <= 1 && !authors.contains(", ")
}

/// Commit message for `metadata`; lists every author when there are several.
fn commit_message(metadata: &RevisionMetadata) -> String {
    let mut message = if metadata.description.is_empty() {
        format!("Migrated {}", metadata.id)
    } else {
        metadata.description.clone()
    };
    if let Some(authors) = metadata.author.as_deref()
        && !is_single_author(authors)
    {
        message.push_str(&format!("\n\nAuthors: {authors}"));
    }
    message
}

use pgrx::Uuid;
use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};
use crate::util::sql_literal;
use crate::vfs::merge::{conflicts, merge_base};
use crate::vfs::read::snapshot_with_content;
use crate::vfs::types::RebaseOutcome;
use crate::vfs::write::{advance_branch_head, create_commit, write_file};
use pgrx::prelude::*;

fn branch_head_and_repo(branch: Uuid) -> EngineResult<(Uuid, Option<Uuid>)> {
    Spi::connect(|client| {
        let row = client
            .select(
                &format!(
                    "SELECT repository, head FROM vfs.branch WHERE id = {}",
                    sql_literal(&branch.to_string())
                ),
                Some(1),
                &[],
            )?
            .first();
        let repository: Uuid = row
            .get::<Uuid>(1)?
            .ok_or_else(|| EngineError::NotFound(format!("branch {branch} not found")))?;
        Ok((repository, row.get::<Uuid>(2)?))
    })
}

/// §4.5 `rebase_branch(branch, onto, message?)`: squash-rebase via a single
/// net patch, not a replay of individual commits.
pub fn rebase_branch(branch: Uuid, onto: Uuid, message: Option<&str>) -> EngineResult<RebaseOutcome> {
    if branch == onto {
        return Ok(RebaseOutcome::Noop);
    }

    let (branch_repo, branch_head) = branch_head_and_repo(branch)?;
    let (onto_repo, onto_head) = branch_head_and_repo(onto)?;
    if branch_repo != onto_repo {
        return Err(EngineError::CrossRepository(
            "rebase_branch requires branches from the same repository".into(),
        ));
    }
    let branch_head = branch_head
        .ok_or_else(|| EngineError::InvariantViolation("branch has no commits to rebase".into()))?;
    let onto_head = onto_head
        .ok_or_else(|| EngineError::InvariantViolation("onto branch has no head".into()))?;

    let base = merge_base(branch_head, onto_head)?;
    if base == onto_head {
        return Ok(RebaseOutcome::AlreadyUpToDate);
    }
    if base == branch_head {
        advance_branch_head(branch, onto_head)?;
        return Ok(RebaseOutcome::FastForward);
    }

    if !conflicts(branch_head, onto_head)?.is_empty() {
        return Err(EngineError::RebaseBlocked(
            "rebase would overwrite conflicting changes; resolve via merge instead".into(),
        ));
    }

    let base_snap = snapshot_with_content(base)?;
    let branch_snap = snapshot_with_content(branch_head)?;
    let onto_snap = snapshot_with_content(onto_head)?;

    let mut all_paths: HashSet<String> = HashSet::new();
    all_paths.extend(base_snap.keys().cloned());
    all_paths.extend(branch_snap.keys().cloned());
    all_paths.extend(onto_snap.keys().cloned());

    struct Op {
        path: String,
        delete: bool,
        content: String,
        is_symlink: bool,
    }
    let mut ops = Vec::new();

    for path in all_paths {
        let base_entry = base_snap.get(&path);
        let branch_entry = branch_snap.get(&path);
        let onto_entry = onto_snap.get(&path);

        let base_state = base_entry.map(|e| (e.is_symlink, e.content.clone()));
        let branch_state = branch_entry.map(|e| (e.is_symlink, e.content.clone()));
        let onto_state = onto_entry.map(|e| (e.is_symlink, e.content.clone()));

        let branch_changed = branch_state != base_state;
        let desired = if branch_changed { branch_state.clone() } else { onto_state.clone() };

        match (desired, onto_state) {
            (None, Some(_)) => ops.push(Op {
                path,
                delete: true,
                content: String::new(),
                is_symlink: false,
            }),
            (Some((symlink, content)), onto) if onto.as_ref() != Some(&(symlink, content.clone())) => {
                ops.push(Op {
                    path,
                    delete: false,
                    content,
                    is_symlink: symlink,
                })
            }
            _ => {}
        }
    }

    if ops.is_empty() {
        advance_branch_head(branch, onto_head)?;
        return Ok(RebaseOutcome::FastForward);
    }

    let (repository, _) = branch_head_and_repo(branch)?;
    let rebase_commit = create_commit(repository, Some(onto_head), message)?;
    for op in ops {
        if op.delete {
            write_file(rebase_commit.id, &op.path, None, true, false)?;
        } else {
            write_file(rebase_commit.id, &op.path, Some(&op.content), false, op.is_symlink)?;
        }
    }
    advance_branch_head(branch, rebase_commit.id)?;
    Ok(RebaseOutcome::Rebased)
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::vfs::write::{create_branch, create_repository};

    #[pgrx::pg_test]
    fn rebase_applies_net_patch_atop_onto() {
        let repo = create_repository("R-rebase-1").unwrap();
        let base = create_commit(repo.id, None, Some("base")).unwrap();
        write_file(base.id, "/shared", Some("base"), false, false).unwrap();

        let feature = create_branch(repo.id, "feature", Some(base.id)).unwrap();
        let feature_commit = create_commit(repo.id, Some(base.id), Some("feature work")).unwrap();
        write_file(feature_commit.id, "/new", Some("added"), false, false).unwrap();
        advance_branch_head(feature.id, feature_commit.id).unwrap();

        let main = create_branch(repo.id, "main2", Some(base.id)).unwrap();
        let main_commit = create_commit(repo.id, Some(base.id), Some("main work")).unwrap();
        write_file(main_commit.id, "/shared", Some("updated"), false, false).unwrap();
        advance_branch_head(main.id, main_commit.id).unwrap();

        let outcome = rebase_branch(feature.id, main.id, Some("rebase")).unwrap();
        assert_eq!(outcome, RebaseOutcome::Rebased);

        let (_, new_head) = branch_head_and_repo(feature.id).unwrap();
        let new_head = new_head.unwrap();
        assert_eq!(
            crate::vfs::read::read_file(new_head, "/new").unwrap(),
            Some("added".to_string())
        );
        assert_eq!(
            crate::vfs::read::read_file(new_head, "/shared").unwrap(),
            Some("updated".to_string())
        );
    }
}

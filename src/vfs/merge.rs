use pgrx::prelude::*;
use pgrx::Uuid;
use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, EngineResult};
use crate::guc::ANCESTRY_STEP_LIMIT;
use crate::util::sql_literal;
use crate::vfs::read::snapshot_with_content;
use crate::vfs::types::{ConflictEntry, ConflictKind, SnapshotEntry};
use crate::vfs::write::{advance_branch_head, write_file};

fn commit_fields(commit: Uuid) -> EngineResult<(Uuid, Option<Uuid>, Option<Uuid>)> {
    Spi::connect(|client| {
        let row = client
            .select(
                &format!(
                    "SELECT repository, parent, merged_from FROM vfs.commit WHERE id = {}",
                    sql_literal(&commit.to_string())
                ),
                Some(1),
                &[],
            )?
            .first();
        let repository: Uuid = row
            .get::<Uuid>(1)?
            .ok_or_else(|| EngineError::NotFound(format!("commit {commit} not found")))?;
        Ok((repository, row.get::<Uuid>(2)?, row.get::<Uuid>(3)?))
    })
}

/// Shortest-hop distance from `commit` to every ancestor reachable via the
/// union of `parent` and `merged_from` edges — §4.3's "ancestor sets...
/// under the union of parent and merged_from edges".
fn ancestor_depths(commit: Uuid) -> EngineResult<HashMap<Uuid, i64>> {
    let limit = ANCESTRY_STEP_LIMIT.get() as i64;
    let sql = format!(
        r#"
        WITH RECURSIVE ancestry(id, depth) AS (
            SELECT id, 0::bigint FROM vfs.commit WHERE id = {commit}
            UNION ALL
            SELECT p.pid, a.depth + 1
            FROM ancestry a
            JOIN vfs.commit c ON c.id = a.id
            CROSS JOIN LATERAL (VALUES (c.parent), (c.merged_from)) AS p(pid)
            WHERE p.pid IS NOT NULL AND a.depth < {limit}
        )
        SELECT id, MIN(depth) FROM ancestry GROUP BY id
        "#,
        commit = sql_literal(&commit.to_string()),
        limit = limit,
    );

    Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        let mut map = HashMap::with_capacity(table.len());
        for row in table {
            let id: Uuid = row.get::<Uuid>(1)?.unwrap();
            let depth: i64 = row.get::<i64>(2)?.unwrap_or(0);
            map.insert(id, depth);
        }
        Ok(map)
    })
}

/// §4.3 `merge_base(left, right)`: lowest common ancestor under the union of
/// `parent`/`merged_from` edges, minimizing `left_depth + right_depth`.
pub fn merge_base(left: Uuid, right: Uuid) -> EngineResult<Uuid> {
    let (left_repo, ..) = commit_fields(left)?;
    let (right_repo, ..) = commit_fields(right)?;
    if left_repo != right_repo {
        return Err(EngineError::CrossRepository(
            "merge_base requires commits from the same repository".into(),
        ));
    }

    let left_depths = ancestor_depths(left)?;
    let right_depths = ancestor_depths(right)?;

    left_depths
        .iter()
        .filter_map(|(id, ld)| right_depths.get(id).map(|rd| (*id, ld + rd)))
        .min_by_key(|(_, total)| *total)
        .map(|(id, _)| id)
        .ok_or_else(|| EngineError::NotFound(format!("no common ancestor between {left} and {right}")))
}

fn final_state(entry: Option<&SnapshotEntry>) -> (bool, bool, &str) {
    match entry {
        Some(e) => (true, e.is_symlink, e.content.as_str()),
        None => (false, false, ""),
    }
}

/// §4.3 `conflicts(left, right)`: materialize three snapshots-with-content
/// and classify every path both sides touched since `merge_base` where the
/// two resulting states differ.
pub fn conflicts(left: Uuid, right: Uuid) -> EngineResult<Vec<ConflictEntry>> {
    let base = merge_base(left, right)?;
    let base_snap = snapshot_with_content(base)?;
    let left_snap = snapshot_with_content(left)?;
    let right_snap = snapshot_with_content(right)?;

    let mut all_paths: HashSet<&str> = HashSet::new();
    all_paths.extend(base_snap.keys().map(String::as_str));
    all_paths.extend(left_snap.keys().map(String::as_str));
    all_paths.extend(right_snap.keys().map(String::as_str));

    let mut out = Vec::new();
    for path in all_paths {
        let (base_exists, base_symlink, base_content) = final_state(base_snap.get(path));
        let (left_exists, left_symlink, left_content) = final_state(left_snap.get(path));
        let (right_exists, right_symlink, right_content) = final_state(right_snap.get(path));

        let left_changed =
            left_exists != base_exists || left_symlink != base_symlink || left_content != base_content;
        let right_changed =
            right_exists != base_exists || right_symlink != base_symlink || right_content != base_content;

        if !(left_changed && right_changed) {
            continue;
        }
        let states_differ =
            left_exists != right_exists || left_symlink != right_symlink || left_content != right_content;
        if !states_differ {
            continue;
        }

        let kind = if base_exists && (!left_exists || !right_exists) {
            ConflictKind::DeleteModify
        } else if !base_exists && left_exists && right_exists {
            ConflictKind::AddAdd
        } else {
            ConflictKind::ModifyModify
        };

        out.push(ConflictEntry {
            path: path.to_string(),
            conflict_kind: kind,
            base_content: base_exists.then(|| base_content.to_string()),
            left_content: left_exists.then(|| left_content.to_string()),
            right_content: right_exists.then(|| right_content.to_string()),
        });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn branch_fields(branch: Uuid) -> EngineResult<(Uuid, Option<Uuid>)> {
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

fn merge_commit_authored_paths(commit: Uuid) -> EngineResult<HashSet<String>> {
    Spi::connect(|client| {
        let table = client.select(
            &format!(
                "SELECT path FROM vfs.file_delta WHERE commit = {}",
                sql_literal(&commit.to_string())
            ),
            None,
            &[],
        )?;
        let mut set = HashSet::with_capacity(table.len());
        for row in table {
            set.insert(row.get::<String>(1)?.unwrap_or_default());
        }
        Ok(set)
    })
}

/// §4.4 `finalize_commit(merge_commit, target_branch?)`.
pub fn finalize_commit(
    merge_commit: Uuid,
    target_branch: Option<Uuid>,
) -> EngineResult<crate::vfs::types::FinalizeOutcome> {
    use crate::vfs::types::FinalizeOutcome;

    let (repository, parent, merged_from) = commit_fields(merge_commit)?;
    let parent = parent.ok_or_else(|| {
        EngineError::InvariantViolation("merge commit has no parent".into())
    })?;

    if let Some(branch) = target_branch {
        let (branch_repo, head) = branch_fields(branch)?;
        if branch_repo != repository {
            return Err(EngineError::CrossRepository(
                "target branch must belong to the same repository as the merge commit".into(),
            ));
        }
        if head != Some(parent) {
            return Err(EngineError::InvariantViolation(
                "target branch head must equal the merge commit's parent".into(),
            ));
        }
    }

    let merged_from = match merged_from {
        None => {
            if let Some(branch) = target_branch {
                advance_branch_head(branch, merge_commit)?;
            }
            return Ok(FinalizeOutcome::FastForward);
        }
        Some(m) => m,
    };

    let base = merge_base(parent, merged_from)?;
    if base == merged_from {
        return Ok(FinalizeOutcome::AlreadyUpToDate);
    }

    let found_conflicts = conflicts(parent, merged_from)?;
    let authored = merge_commit_authored_paths(merge_commit)?;

    let outcome = if found_conflicts.is_empty() {
        FinalizeOutcome::Merged
    } else {
        for c in &found_conflicts {
            if !authored.contains(&c.path) {
                return Err(EngineError::MergeRequiresResolutions(format!(
                    "path {} conflicts and has no user-authored resolution in the merge commit",
                    c.path
                )));
            }
        }
        FinalizeOutcome::MergedWithConflictsResolved
    };

    // §4.5 patch rule applied in the merge direction: source's changes
    // since base, skipping any path the caller already authored.
    let base_snap = snapshot_with_content(base)?;
    let target_snap = snapshot_with_content(parent)?;
    let source_snap = snapshot_with_content(merged_from)?;

    let mut all_paths: HashSet<String> = HashSet::new();
    all_paths.extend(base_snap.keys().cloned());
    all_paths.extend(target_snap.keys().cloned());
    all_paths.extend(source_snap.keys().cloned());

    for path in all_paths {
        if authored.contains(&path) {
            continue;
        }
        let (base_exists, base_symlink, base_content) = final_state(base_snap.get(&path));
        let (source_exists, source_symlink, source_content) = final_state(source_snap.get(&path));
        let (target_exists, ..) = final_state(target_snap.get(&path));

        let source_changed =
            source_exists != base_exists || source_symlink != base_symlink || source_content != base_content;
        if !source_changed {
            continue;
        }

        if !source_exists && target_exists {
            write_file(merge_commit, &path, None, true, false)?;
        } else if source_exists {
            write_file(merge_commit, &path, Some(source_content), false, source_symlink)?;
        }
    }

    if let Some(branch) = target_branch {
        advance_branch_head(branch, merge_commit)?;
    }

    Ok(outcome)
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::vfs::write::{create_branch, create_commit, create_merge_commit, create_repository};

    #[pgrx::pg_test]
    fn modify_modify_conflict_requires_resolution() {
        let repo = create_repository("R-merge-1").unwrap();
        let base = create_commit(repo.id, None, Some("base")).unwrap();
        crate::vfs::write::write_file(base.id, "/same", Some("base"), false, false).unwrap();

        let left = create_commit(repo.id, Some(base.id), Some("left")).unwrap();
        crate::vfs::write::write_file(left.id, "/same", Some("left"), false, false).unwrap();

        let right = create_commit(repo.id, Some(base.id), Some("right")).unwrap();
        crate::vfs::write::write_file(right.id, "/same", Some("right"), false, false).unwrap();

        let found = conflicts(left.id, right.id).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].conflict_kind, ConflictKind::ModifyModify);
        assert_eq!(found[0].base_content.as_deref(), Some("base"));

        let target_branch = create_branch(repo.id, "target", Some(left.id)).unwrap();
        let merge_commit = create_merge_commit(repo.id, left.id, right.id, Some("merge")).unwrap();
        let err = finalize_commit(merge_commit.id, Some(target_branch.id)).unwrap_err();
        assert!(matches!(err, EngineError::MergeRequiresResolutions(_)));

        crate::vfs::write::write_file(merge_commit.id, "/same", Some("resolved"), false, false).unwrap();
        let outcome = finalize_commit(merge_commit.id, Some(target_branch.id)).unwrap();
        assert_eq!(
            outcome,
            crate::vfs::types::FinalizeOutcome::MergedWithConflictsResolved
        );
    }
}

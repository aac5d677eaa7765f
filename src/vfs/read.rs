use pgrx::prelude::*;
use pgrx::Uuid;
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::guc::ANCESTRY_STEP_LIMIT;
use crate::util::sql_literal;
use crate::vfs::path::{normalize_path, normalize_prefix};
use crate::vfs::types::{FileEntry, SnapshotEntry};

struct AncestorRow {
    id: Uuid,
    parent: Option<Uuid>,
    depth: i64,
}

/// Walk `commit`'s ancestor chain via `parent` edges only, nearest first.
/// §4.1/§9: capped at `chronostore.ancestry_step_limit` hops to defend
/// against a corrupted (by invariant, acyclic) commit graph.
fn walk_ancestry(commit: Uuid) -> EngineResult<Vec<AncestorRow>> {
    let limit = ANCESTRY_STEP_LIMIT.get() as i64;
    let sql = format!(
        r#"
        WITH RECURSIVE ancestry(id, parent, depth) AS (
            SELECT id, parent, 0::bigint FROM vfs.commit WHERE id = {commit}
            UNION ALL
            SELECT c.id, c.parent, a.depth + 1
            FROM vfs.commit c
            JOIN ancestry a ON c.id = a.parent
            WHERE a.depth < {limit}
        )
        SELECT id, parent, depth FROM ancestry ORDER BY depth
        "#,
        commit = sql_literal(&commit.to_string()),
        limit = limit,
    );

    Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        let mut rows = Vec::with_capacity(table.len());
        for row in table {
            let id: Uuid = row
                .get::<Uuid>(1)?
                .ok_or_else(|| EngineError::InvariantViolation("ancestry row missing id".into()))?;
            let parent: Option<Uuid> = row.get::<Uuid>(2)?;
            let depth: i64 = row.get::<i64>(3)?.unwrap_or(0);
            rows.push(AncestorRow { id, parent, depth });
        }
        Ok(rows)
    })
    .and_then(|rows: Vec<AncestorRow>| {
        if rows.len() as i64 > limit && rows.last().map(|r| r.parent.is_some()).unwrap_or(false) {
            Err(EngineError::ExhaustedHistory(format!(
                "ancestry walk exceeded {limit} hops from commit {commit}"
            )))
        } else {
            Ok(rows)
        }
    })
}

/// §4.2 `read_file(commit, path)`: first `FileDelta` row for the normalized
/// path among `commit`'s ancestors (including itself), nearest first.
/// Tombstone or no hit returns `None`.
pub fn read_file(commit: Uuid, path: &str) -> EngineResult<Option<String>> {
    let path = normalize_path(path)?;
    let ancestors = walk_ancestry(commit)?;
    if ancestors.is_empty() {
        return Err(EngineError::NotFound(format!("commit {commit} not found")));
    }

    let ids = ancestors
        .iter()
        .map(|a| sql_literal(&a.id.to_string()))
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT commit, content, is_deleted FROM vfs.file_delta \
         WHERE path = {path} AND commit IN ({ids})",
        path = sql_literal(&path),
        ids = ids,
    );

    let by_commit: HashMap<Uuid, (String, bool)> = Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        let mut map = HashMap::with_capacity(table.len());
        for row in table {
            let c: Uuid = row.get::<Uuid>(1)?.unwrap();
            let content: String = row.get::<String>(2)?.unwrap_or_default();
            let deleted: bool = row.get::<bool>(3)?.unwrap_or(false);
            map.insert(c, (content, deleted));
        }
        Ok::<_, EngineError>(map)
    })?;

    for a in &ancestors {
        if let Some((content, deleted)) = by_commit.get(&a.id) {
            return Ok(if *deleted { None } else { Some(content.clone()) });
        }
    }
    Ok(None)
}

/// §4.2 `snapshot(commit, prefix?)`: the resolved set of live paths visible
/// at `commit`, partitioned by path and resolved to the nearest ancestor's
/// row. Content is not included — fetch on demand via `read_file`.
pub fn snapshot(commit: Uuid, prefix: Option<&str>) -> EngineResult<Vec<FileEntry>> {
    let ancestors = walk_ancestry(commit)?;
    if ancestors.is_empty() {
        return Err(EngineError::NotFound(format!("commit {commit} not found")));
    }
    let depth_by_id: HashMap<Uuid, i64> = ancestors.iter().map(|a| (a.id, a.depth)).collect();
    let ids = ancestors
        .iter()
        .map(|a| sql_literal(&a.id.to_string()))
        .collect::<Vec<_>>()
        .join(",");

    let prefix_clause = match prefix {
        Some(p) => {
            let p = normalize_prefix(p)?;
            format!(" AND path LIKE {} ", sql_literal(&format!("{}%", p.replace('%', "\\%"))))
        }
        None => String::new(),
    };

    let sql = format!(
        "SELECT commit, path, is_deleted, is_symlink FROM vfs.file_delta \
         WHERE commit IN ({ids}) {prefix_clause}",
        ids = ids,
        prefix_clause = prefix_clause,
    );

    // nearest-ancestor-wins per path
    let mut best: HashMap<String, (i64, bool, bool)> = HashMap::new();
    Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        for row in table {
            let c: Uuid = row.get::<Uuid>(1)?.unwrap();
            let path: String = row.get::<String>(2)?.unwrap_or_default();
            let deleted: bool = row.get::<bool>(3)?.unwrap_or(false);
            let symlink: bool = row.get::<bool>(4)?.unwrap_or(false);
            let depth = *depth_by_id.get(&c).unwrap_or(&i64::MAX);
            best.entry(path)
                .and_modify(|e| {
                    if depth < e.0 {
                        *e = (depth, deleted, symlink);
                    }
                })
                .or_insert((depth, deleted, symlink));
        }
        Ok::<_, EngineError>(())
    })?;

    let mut entries: Vec<FileEntry> = best
        .into_iter()
        .filter(|(_, (_, deleted, _))| !*deleted)
        .map(|(path, (_, deleted, symlink))| FileEntry {
            path,
            is_symlink: symlink,
            is_deleted: deleted,
        })
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// §4.2 `delta(commit)`: only the rows written *by* `commit`, no ancestry.
pub fn delta(commit: Uuid) -> EngineResult<Vec<FileEntry>> {
    let sql = format!(
        "SELECT path, is_deleted, is_symlink FROM vfs.file_delta WHERE commit = {}",
        sql_literal(&commit.to_string())
    );
    Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        let mut entries = Vec::with_capacity(table.len());
        for row in table {
            entries.push(FileEntry {
                path: row.get::<String>(1)?.unwrap_or_default(),
                is_deleted: row.get::<bool>(2)?.unwrap_or(false),
                is_symlink: row.get::<bool>(3)?.unwrap_or(false),
            });
        }
        Ok(entries)
    })
}

/// §4.2 `file_history(commit, path)`: every ancestor (nearest first) that
/// has a row for `path`, deleted or not.
pub fn file_history(commit: Uuid, path: &str) -> EngineResult<Vec<(Uuid, FileEntry)>> {
    let path = normalize_path(path)?;
    let ancestors = walk_ancestry(commit)?;
    if ancestors.is_empty() {
        return Err(EngineError::NotFound(format!("commit {commit} not found")));
    }
    let ids = ancestors
        .iter()
        .map(|a| sql_literal(&a.id.to_string()))
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT commit, is_deleted, is_symlink FROM vfs.file_delta \
         WHERE path = {path} AND commit IN ({ids})",
        path = sql_literal(&path),
        ids = ids,
    );
    let by_commit: HashMap<Uuid, (bool, bool)> = Spi::connect(|client| {
        let table = client.select(&sql, None, &[])?;
        let mut map = HashMap::with_capacity(table.len());
        for row in table {
            let c: Uuid = row.get::<Uuid>(1)?.unwrap();
            map.insert(
                c,
                (row.get::<bool>(2)?.unwrap_or(false), row.get::<bool>(3)?.unwrap_or(false)),
            );
        }
        Ok::<_, EngineError>(map)
    })?;

    let mut history = Vec::new();
    for a in &ancestors {
        if let Some((deleted, symlink)) = by_commit.get(&a.id) {
            history.push((
                a.id,
                FileEntry {
                    path: path.clone(),
                    is_deleted: *deleted,
                    is_symlink: *symlink,
                },
            ));
        }
    }
    Ok(history)
}

/// Resolve the full live snapshot *with content*, used by merge/rebase to
/// materialize three-way comparisons without per-path round trips.
pub fn snapshot_with_content(commit: Uuid) -> EngineResult<HashMap<String, SnapshotEntry>> {
    let entries = snapshot(commit, None)?;
    let mut out = HashMap::with_capacity(entries.len());
    for e in entries {
        let content = read_file(commit, &e.path)?.unwrap_or_default();
        out.insert(
            e.path.clone(),
            SnapshotEntry {
                path: e.path,
                exists: true,
                is_symlink: e.is_symlink,
                content,
            },
        );
    }
    Ok(out)
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::vfs::write::{create_commit, create_repository, write_file};

    #[pgrx::pg_test]
    fn basic_versioning_resolves_through_ancestry() {
        let repo = create_repository("R-read-1").unwrap();
        let c1 = create_commit(repo.id, None, Some("root")).unwrap();
        write_file(c1.id, "/x", Some("A"), false, false).unwrap();
        let c2 = create_commit(repo.id, Some(c1.id), Some("second")).unwrap();
        write_file(c2.id, "/y", Some("B"), false, false).unwrap();
        let c3 = create_commit(repo.id, Some(c2.id), Some("third")).unwrap();
        write_file(c3.id, "/x", Some("A2"), false, false).unwrap();

        assert_eq!(read_file(c3.id, "/x").unwrap(), Some("A2".to_string()));
        assert_eq!(read_file(c3.id, "/y").unwrap(), Some("B".to_string()));

        let mut paths: Vec<String> = snapshot(c3.id, None).unwrap().into_iter().map(|e| e.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["/x".to_string(), "/y".to_string()]);
    }

    #[pgrx::pg_test]
    fn tombstone_hides_path_from_snapshot() {
        let repo = create_repository("R-read-2").unwrap();
        let c1 = create_commit(repo.id, None, Some("root")).unwrap();
        write_file(c1.id, "/f", Some("hi"), false, false).unwrap();
        let c2 = create_commit(repo.id, Some(c1.id), Some("delete")).unwrap();
        write_file(c2.id, "/f", None, true, false).unwrap();

        assert_eq!(read_file(c2.id, "/f").unwrap(), None);
        assert!(snapshot(c2.id, None).unwrap().is_empty());

        let history = file_history(c2.id, "/f").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().any(|(_, e)| e.is_deleted));
        assert!(history.iter().any(|(_, e)| !e.is_deleted));
    }
}

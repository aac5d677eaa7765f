pub mod catalog;
pub mod merge;
pub mod path;
pub mod read;
pub mod rebase;
pub mod types;
pub mod write;

use pgrx::iter::TableIterator;
use pgrx::prelude::*;
use pgrx::{JsonB, Uuid};

fn to_jsonb<T: serde::Serialize>(value: &T) -> JsonB {
    JsonB(serde_json::to_value(value).unwrap_or(serde_json::Value::Null))
}

#[pg_extern]
fn vfs_create_repository(name: &str) -> JsonB {
    ok_or_pg_error!(write::create_repository(name).map(|r| to_jsonb(&r)))
}

#[pg_extern]
fn vfs_create_branch(repository: Uuid, name: &str, head: Option<Uuid>) -> JsonB {
    ok_or_pg_error!(write::create_branch(repository, name, head).map(|b| to_jsonb(&b)))
}

#[pg_extern]
fn vfs_delete_branch(branch: Uuid) {
    ok_or_pg_error!(write::delete_branch(branch))
}

#[pg_extern]
fn vfs_create_commit(repository: Uuid, parent: Option<Uuid>, message: Option<&str>) -> JsonB {
    ok_or_pg_error!(write::create_commit(repository, parent, message).map(|c| to_jsonb(&c)))
}

#[pg_extern]
fn vfs_create_merge_commit(
    repository: Uuid,
    target_head: Uuid,
    source_head: Uuid,
    message: Option<&str>,
) -> JsonB {
    ok_or_pg_error!(
        write::create_merge_commit(repository, target_head, source_head, message).map(|c| to_jsonb(&c))
    )
}

#[pg_extern]
fn vfs_write_file(
    commit: Uuid,
    path: &str,
    content: Option<&str>,
    is_deleted: default!(bool, false),
    is_symlink: default!(bool, false),
) -> JsonB {
    ok_or_pg_error!(write::write_file(commit, path, content, is_deleted, is_symlink).map(|f| to_jsonb(&f)))
}

#[pg_extern]
fn vfs_read_file(commit: Uuid, path: &str) -> Option<String> {
    ok_or_pg_error!(read::read_file(commit, path))
}

#[pg_extern]
fn vfs_snapshot(
    commit: Uuid,
    prefix: Option<&str>,
) -> TableIterator<'static, (name!(path, String), name!(is_symlink, bool))> {
    let entries = ok_or_pg_error!(read::snapshot(commit, prefix));
    TableIterator::new(entries.into_iter().map(|e| (e.path, e.is_symlink)))
}

#[pg_extern]
fn vfs_delta(
    commit: Uuid,
) -> TableIterator<'static, (name!(path, String), name!(is_deleted, bool), name!(is_symlink, bool))> {
    let entries = ok_or_pg_error!(read::delta(commit));
    TableIterator::new(entries.into_iter().map(|e| (e.path, e.is_deleted, e.is_symlink)))
}

#[pg_extern]
fn vfs_file_history(
    commit: Uuid,
    path: &str,
) -> TableIterator<'static, (name!(commit_id, Uuid), name!(is_deleted, bool), name!(is_symlink, bool))> {
    let entries = ok_or_pg_error!(read::file_history(commit, path));
    TableIterator::new(
        entries
            .into_iter()
            .map(|(id, e)| (id, e.is_deleted, e.is_symlink)),
    )
}

#[pg_extern]
fn vfs_merge_base(left: Uuid, right: Uuid) -> Uuid {
    ok_or_pg_error!(merge::merge_base(left, right))
}

#[pg_extern]
fn vfs_conflicts(
    left: Uuid,
    right: Uuid,
) -> TableIterator<
    'static,
    (
        name!(path, String),
        name!(conflict_kind, String),
        name!(base_content, Option<String>),
        name!(left_content, Option<String>),
        name!(right_content, Option<String>),
    ),
> {
    let found = ok_or_pg_error!(merge::conflicts(left, right));
    TableIterator::new(found.into_iter().map(|c| {
        (
            c.path,
            c.conflict_kind.as_str().to_string(),
            c.base_content,
            c.left_content,
            c.right_content,
        )
    }))
}

#[pg_extern]
fn vfs_finalize_commit(merge_commit: Uuid, target_branch: Option<Uuid>) -> String {
    ok_or_pg_error!(merge::finalize_commit(merge_commit, target_branch)).as_str().to_string()
}

#[pg_extern]
fn vfs_rebase_branch(branch: Uuid, onto: Uuid, message: Option<&str>) -> String {
    ok_or_pg_error!(rebase::rebase_branch(branch, onto, message)).as_str().to_string()
}

#[pg_extern]
fn vfs_list_repositories(
) -> TableIterator<'static, (name!(id, Uuid), name!(name, String), name!(default_branch, Option<Uuid>))> {
    let repos = ok_or_pg_error!(catalog::list_repositories());
    TableIterator::new(repos.into_iter().map(|r| (r.id, r.name, r.default_branch)))
}

#[pg_extern]
fn vfs_list_branches(
    repository: Uuid,
) -> TableIterator<'static, (name!(id, Uuid), name!(name, String), name!(head, Option<Uuid>))> {
    let branches = ok_or_pg_error!(catalog::list_branches(repository));
    TableIterator::new(branches.into_iter().map(|b| (b.id, b.name, b.head)))
}

#[pg_extern]
fn vfs_get_commit(id: Uuid) -> JsonB {
    ok_or_pg_error!(catalog::get_commit(id).map(|c| to_jsonb(&c)))
}

#[pg_extern]
fn vfs_get_branch(repository: Uuid, name: &str) -> JsonB {
    ok_or_pg_error!(catalog::get_branch(repository, name).map(|b| to_jsonb(&b)))
}

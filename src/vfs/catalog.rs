use pgrx::prelude::*;
use pgrx::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::util::sql_literal;
use crate::vfs::types::{Branch, Commit, Repository};

pub fn list_repositories() -> EngineResult<Vec<Repository>> {
    Spi::connect(|client| {
        let table = client.select(
            "SELECT id, name, default_branch, created_at FROM vfs.repository ORDER BY created_at",
            None,
            &[],
        )?;
        let mut out = Vec::with_capacity(table.len());
        for row in table {
            out.push(Repository {
                id: row.get::<Uuid>(1)?.unwrap(),
                name: row.get::<String>(2)?.unwrap_or_default(),
                default_branch: row.get::<Uuid>(3)?,
                created_at: row.get::<String>(4)?.unwrap_or_default(),
            });
        }
        Ok(out)
    })
}

pub fn list_branches(repository: Uuid) -> EngineResult<Vec<Branch>> {
    Spi::connect(|client| {
        let table = client.select(
            &format!(
                "SELECT id, name, head FROM vfs.branch WHERE repository = {} ORDER BY name",
                sql_literal(&repository.to_string())
            ),
            None,
            &[],
        )?;
        let mut out = Vec::with_capacity(table.len());
        for row in table {
            out.push(Branch {
                id: row.get::<Uuid>(1)?.unwrap(),
                repository,
                name: row.get::<String>(2)?.unwrap_or_default(),
                head: row.get::<Uuid>(3)?,
            });
        }
        Ok(out)
    })
}

pub fn get_commit(id: Uuid) -> EngineResult<Commit> {
    Spi::connect(|client| {
        let row = client
            .select(
                &format!(
                    "SELECT repository, parent, merged_from, message, created_at \
                     FROM vfs.commit WHERE id = {}",
                    sql_literal(&id.to_string())
                ),
                Some(1),
                &[],
            )?
            .first();
        let repository: Uuid = row
            .get::<Uuid>(1)?
            .ok_or_else(|| EngineError::NotFound(format!("commit {id} not found")))?;
        Ok(Commit {
            id,
            repository,
            parent: row.get::<Uuid>(2)?,
            merged_from: row.get::<Uuid>(3)?,
            message: row.get::<String>(4)?,
            created_at: row.get::<String>(5)?.unwrap_or_default(),
        })
    })
}

pub fn get_branch(repository: Uuid, name: &str) -> EngineResult<Branch> {
    Spi::connect(|client| {
        let row = client
            .select(
                &format!(
                    "SELECT id, head FROM vfs.branch WHERE repository = {} AND name = {}",
                    sql_literal(&repository.to_string()),
                    sql_literal(name)
                ),
                Some(1),
                &[],
            )?
            .first();
        let id: Uuid = row
            .get::<Uuid>(1)?
            .ok_or_else(|| EngineError::NotFound(format!("branch {name} not found in repository {repository}")))?;
        Ok(Branch {
            id,
            repository,
            name: name.to_string(),
            head: row.get::<Uuid>(2)?,
        })
    })
}

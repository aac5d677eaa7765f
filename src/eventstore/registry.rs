use pgrx::prelude::*;
use std::cell::RefCell;
use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};
use crate::util::sql_literal;

// Mirrors the teacher's `executor_cache.rs` thread-local cache: registered
// (category, type) pairs rarely change and are checked on every `append`, so
// cache the validity check per backend instead of round-tripping SPI each
// time.
thread_local! {
    static TYPE_CACHE: RefCell<HashSet<(String, String)>> = RefCell::new(HashSet::new());
}

fn invalidate_cache() {
    TYPE_CACHE.with(|c| c.borrow_mut().clear());
}

fn is_kebab_case(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let mut prev_dash = true;
    for c in s.chars() {
        if c == '-' {
            if prev_dash {
                return false;
            }
            prev_dash = true;
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_dash = false;
        } else {
            return false;
        }
    }
    !prev_dash
}

pub fn register_category(category: &str) -> EngineResult<()> {
    if !is_kebab_case(category) {
        return Err(EngineError::InvariantViolation(format!(
            "category '{category}' must be kebab-case"
        )));
    }
    Spi::connect_mut(|client| {
        client.update(
            &format!(
                "INSERT INTO events.category (id) VALUES ({}) ON CONFLICT DO NOTHING",
                sql_literal(category)
            ),
            None,
            &[],
        )
    })?;
    invalidate_cache();
    Ok(())
}

pub fn register_event_type(category: &str, event_type: &str) -> EngineResult<()> {
    if !is_kebab_case(event_type) {
        return Err(EngineError::InvariantViolation(format!(
            "event type '{event_type}' must be kebab-case"
        )));
    }
    let exists: bool = Spi::get_one(&format!(
        "SELECT EXISTS (SELECT 1 FROM events.category WHERE id = {})",
        sql_literal(category)
    ))?
    .unwrap_or(false);
    if !exists {
        return Err(EngineError::NotFound(format!("category '{category}' is not registered")));
    }
    Spi::connect_mut(|client| {
        client.update(
            &format!(
                "INSERT INTO events.event_type (category, id) VALUES ({}, {}) ON CONFLICT DO NOTHING",
                sql_literal(category),
                sql_literal(event_type)
            ),
            None,
            &[],
        )
    })?;
    invalidate_cache();
    Ok(())
}

/// Cascades to `events.event_type` via `ON DELETE CASCADE`; never touches
/// `events.event` rows already recorded against the category (§9).
pub fn unregister_category(category: &str) -> EngineResult<()> {
    let deleted = Spi::connect_mut(|client| {
        client.update(
            &format!("DELETE FROM events.category WHERE id = {}", sql_literal(category)),
            None,
            &[],
        )
    })?;
    if deleted.len() == 0 {
        return Err(EngineError::NotFound(format!("category '{category}' not found")));
    }
    invalidate_cache();
    Ok(())
}

/// §4.7 step 1: validate `(category, type)` is registered before writing the
/// event row.
pub fn is_registered(category: &str, event_type: &str) -> EngineResult<bool> {
    let key = (category.to_string(), event_type.to_string());
    if TYPE_CACHE.with(|c| c.borrow().contains(&key)) {
        return Ok(true);
    }
    let found: bool = Spi::get_one(&format!(
        "SELECT EXISTS (SELECT 1 FROM events.event_type WHERE category = {} AND id = {})",
        sql_literal(category),
        sql_literal(event_type)
    ))?
    .unwrap_or(false);
    if found {
        TYPE_CACHE.with(|c| {
            c.borrow_mut().insert(key);
        });
    }
    Ok(found)
}

pub fn list_categories() -> EngineResult<Vec<String>> {
    Spi::connect(|client| {
        let table = client.select("SELECT id FROM events.category ORDER BY id", None, &[])?;
        let mut out = Vec::with_capacity(table.len());
        for row in table {
            out.push(row.get::<String>(1)?.unwrap_or_default());
        }
        Ok(out)
    })
}

pub fn list_event_types(category: &str) -> EngineResult<Vec<String>> {
    Spi::connect(|client| {
        let table = client.select(
            &format!(
                "SELECT id FROM events.event_type WHERE category = {} ORDER BY id",
                sql_literal(category)
            ),
            None,
            &[],
        )?;
        let mut out = Vec::with_capacity(table.len());
        for row in table {
            out.push(row.get::<String>(1)?.unwrap_or_default());
        }
        Ok(out)
    })
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;

    #[pgrx::pg_test]
    fn registers_category_and_type_then_cascades() {
        register_category("order").unwrap();
        register_event_type("order", "created").unwrap();
        assert!(is_registered("order", "created").unwrap());
        assert!(!is_registered("order", "shipped").unwrap());

        unregister_category("order").unwrap();
        assert!(!is_registered("order", "created").unwrap());
        let types = list_event_types("order").unwrap();
        assert!(types.is_empty());
    }

    #[pgrx::pg_test]
    fn rejects_non_kebab_case_names() {
        assert!(register_category("Order").is_err());
        register_category("order").unwrap();
        assert!(register_event_type("order", "Created_Event").is_err());
    }
}

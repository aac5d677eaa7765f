use pgrx::prelude::*;

pg_module_magic!();

#[macro_use]
pub mod error;
pub mod clock;
pub mod eventstore;
pub mod guc;
pub mod pitr;
pub mod schema;
pub mod util;
pub mod vfs;

/// One-time setup performed when the backend first loads the extension
/// library. Registers the GUC tunables in `guc`; the per-engine
/// `thread_local!` caches (category/type registry, aggregate reducers,
/// projection handlers) initialize themselves lazily on first use.
#[pg_guard]
pub extern "C" fn _PG_init() {
    guc::init();
}

#[cfg(test)]
pub mod pg_test {
    pub fn setup(_options: Vec<&str>) {}

    pub fn postgresql_conf_options() -> Vec<&'static str> {
        vec![]
    }
}

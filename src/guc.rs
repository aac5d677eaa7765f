use pgrx::{GucContext, GucFlags, GucRegistry, GucSetting};

/// §4.2/§9: traversal safety cap for commit-ancestry walks.
pub static ANCESTRY_STEP_LIMIT: GucSetting<i32> = GucSetting::<i32>::new(100_000);

/// §4.10: default claim lease when `poll` omits `claimTimeoutSeconds`.
pub static DEFAULT_CLAIM_TIMEOUT_SECONDS: GucSetting<i32> = GucSetting::<i32>::new(30);

/// §4.10: upper bound clamp on `poll`'s `batchSize`.
pub static MAX_POLL_BATCH_SIZE: GucSetting<i32> = GucSetting::<i32>::new(500);

pub fn init() {
    GucRegistry::define_int_guc(
        "chronostore.ancestry_step_limit",
        "Maximum ancestor hops walked before a VersionedFS traversal aborts with ExhaustedHistory.",
        "Defends against a corrupted (cyclic) commit graph; the graph is acyclic by invariant.",
        &ANCESTRY_STEP_LIMIT,
        1_000,
        i32::MAX,
        GucContext::Suset,
        GucFlags::default(),
    );
    GucRegistry::define_int_guc(
        "chronostore.default_claim_timeout_seconds",
        "Default lease duration used by events.poll() when claimTimeoutSeconds is omitted.",
        "",
        &DEFAULT_CLAIM_TIMEOUT_SECONDS,
        1,
        i32::MAX,
        GucContext::Suset,
        GucFlags::default(),
    );
    GucRegistry::define_int_guc(
        "chronostore.max_poll_batch_size",
        "Upper bound clamp applied to events.poll()'s requested batchSize.",
        "",
        &MAX_POLL_BATCH_SIZE,
        1,
        100_000,
        GucContext::Suset,
        GucFlags::default(),
    );
}

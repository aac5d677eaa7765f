use pgrx::prelude::*;

// Permanent schemas and tables for the three engines. Declared as raw DDL via
// `extension_sql!` rather than generated per-call — the teacher crate builds
// and runs DDL-shaped SQL at call time for its transient `pg_temp` plan
// table; here the DDL is the engines' permanent storage, so it belongs in
// the extension's install script instead.

extension_sql!(
    r#"
    CREATE SCHEMA vfs;
    CREATE SCHEMA events;
    CREATE SCHEMA pitr;
    "#,
    name = "chronostore_schemas",
);

extension_sql!(
    r#"
    CREATE TABLE vfs.repository (
        id              uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        name            text NOT NULL UNIQUE,
        default_branch  uuid,
        created_at      timestamptz NOT NULL DEFAULT transaction_timestamp()
    );

    CREATE TABLE vfs.commit (
        id              uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        repository      uuid NOT NULL REFERENCES vfs.repository(id),
        parent          uuid REFERENCES vfs.commit(id),
        merged_from     uuid REFERENCES vfs.commit(id),
        message         text,
        created_at      timestamptz NOT NULL DEFAULT transaction_timestamp()
    );

    -- at most one root (null-parent) commit per repository
    CREATE UNIQUE INDEX vfs_commit_one_root_per_repo
        ON vfs.commit (repository) WHERE parent IS NULL;

    CREATE TABLE vfs.branch (
        id              uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        repository      uuid NOT NULL REFERENCES vfs.repository(id),
        name            text NOT NULL,
        head            uuid REFERENCES vfs.commit(id),
        UNIQUE (repository, name)
    );

    ALTER TABLE vfs.repository
        ADD CONSTRAINT vfs_repository_default_branch_fkey
        FOREIGN KEY (default_branch) REFERENCES vfs.branch(id)
        DEFERRABLE INITIALLY DEFERRED;

    CREATE TABLE vfs.file_delta (
        id              bigserial PRIMARY KEY,
        commit          uuid NOT NULL REFERENCES vfs.commit(id),
        path            text NOT NULL,
        content         text NOT NULL DEFAULT '',
        is_deleted      boolean NOT NULL DEFAULT false,
        is_symlink      boolean NOT NULL DEFAULT false,
        created_at      timestamptz NOT NULL DEFAULT transaction_timestamp(),
        UNIQUE (commit, path)
    );

    CREATE INDEX vfs_file_delta_path_idx ON vfs.file_delta (path);
    CREATE INDEX vfs_commit_parent_idx ON vfs.commit (parent);
    CREATE INDEX vfs_commit_merged_from_idx ON vfs.commit (merged_from);
    "#,
    name = "chronostore_vfs_tables",
    requires = ["chronostore_schemas"],
);

extension_sql!(
    r#"
    CREATE TABLE events.category (
        id  text PRIMARY KEY CHECK (id ~ '^[a-z0-9]+(-[a-z0-9]+)*$')
    );

    CREATE TABLE events.event_type (
        category  text NOT NULL REFERENCES events.category(id) ON DELETE CASCADE,
        id        text NOT NULL CHECK (id ~ '^[a-z0-9]+(-[a-z0-9]+)*$'),
        PRIMARY KEY (category, id)
    );

    CREATE TABLE events.stream (
        id          uuid PRIMARY KEY,
        category    text NOT NULL REFERENCES events.category(id),
        version     bigint NOT NULL DEFAULT 0,
        created_at  timestamptz NOT NULL DEFAULT transaction_timestamp()
    );

    CREATE TABLE events.event (
        "position"      bigint GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        id              uuid NOT NULL DEFAULT gen_random_uuid() UNIQUE,
        stream          uuid NOT NULL REFERENCES events.stream(id),
        stream_version  bigint NOT NULL,
        category        text NOT NULL,
        type            text NOT NULL,
        data            jsonb NOT NULL DEFAULT '{}',
        metadata        jsonb NOT NULL DEFAULT '{}',
        created_at      timestamptz NOT NULL DEFAULT transaction_timestamp(),
        UNIQUE (stream, stream_version),
        FOREIGN KEY (category, type) REFERENCES events.event_type(category, id)
    );

    CREATE INDEX events_event_stream_idx ON events.event (stream, stream_version);
    CREATE INDEX events_event_category_idx ON events.event (category, "position");
    CREATE INDEX events_event_type_idx ON events.event (category, type, "position");

    CREATE TABLE events.subscription (
        name              text PRIMARY KEY,
        filter_types      jsonb,
        filter_streams    jsonb,
        last_position     bigint NOT NULL DEFAULT 0,
        last_processed_at timestamptz,
        active            boolean NOT NULL DEFAULT true,
        created_at        timestamptz NOT NULL DEFAULT transaction_timestamp()
    );

    CREATE TABLE events.event_claim (
        subscription  text NOT NULL REFERENCES events.subscription(name) ON DELETE CASCADE,
        "position"    bigint NOT NULL,
        claimed_at    timestamptz NOT NULL DEFAULT clock_timestamp(),
        expires_at    timestamptz NOT NULL,
        PRIMARY KEY (subscription, "position")
    );

    CREATE INDEX events_event_claim_expires_idx ON events.event_claim (expires_at);

    CREATE TABLE events.snapshot (
        id          bigserial PRIMARY KEY,
        stream      uuid NOT NULL REFERENCES events.stream(id),
        name        text NOT NULL DEFAULT 'aggregate-state',
        version     bigint NOT NULL,
        state       jsonb NOT NULL,
        created_at  timestamptz NOT NULL DEFAULT transaction_timestamp(),
        UNIQUE (stream, name, version)
    );

    CREATE TABLE events.aggregate_def (
        name                text PRIMARY KEY,
        function_name       text NOT NULL,
        category            text NOT NULL REFERENCES events.category(id),
        initial_state       jsonb NOT NULL,
        reducers            jsonb NOT NULL,
        snapshot_threshold  integer
    );

    CREATE TABLE events.projection_def (
        name               text PRIMARY KEY,
        sync_handlers      jsonb NOT NULL DEFAULT '{}',
        async_types        jsonb NOT NULL DEFAULT '[]',
        trigger_name       text,
        subscription_name  text REFERENCES events.subscription(name)
    );
    "#,
    name = "chronostore_events_tables",
    requires = ["chronostore_schemas"],
);

extension_sql!(
    r#"
    CREATE TABLE pitr.tracked_table (
        id                    bigserial PRIMARY KEY,
        schema_name           text NOT NULL,
        table_name            text NOT NULL,
        primary_key_columns   text[] NOT NULL,
        tracked_columns       text[],
        excluded_columns      text[],
        trigger_name          text NOT NULL,
        enabled               boolean NOT NULL DEFAULT true,
        created_at            timestamptz NOT NULL DEFAULT transaction_timestamp(),
        UNIQUE (schema_name, table_name)
    );

    CREATE TABLE pitr.audit_entry (
        id                  bigserial PRIMARY KEY,
        tracked_table       bigint NOT NULL REFERENCES pitr.tracked_table(id),
        operation           text NOT NULL CHECK (operation IN ('INSERT', 'UPDATE', 'DELETE')),
        primary_key_value   jsonb NOT NULL,
        old_data            jsonb,
        new_data            jsonb,
        changed_columns     text[],
        transaction_id      bigint NOT NULL,
        changed_at          timestamptz NOT NULL,
        changed_by          text NOT NULL DEFAULT CURRENT_USER,
        application_name    text NOT NULL DEFAULT current_setting('application_name')
    );

    CREATE INDEX pitr_audit_entry_table_time_idx
        ON pitr.audit_entry (tracked_table, changed_at DESC);
    CREATE INDEX pitr_audit_entry_txid_idx ON pitr.audit_entry (transaction_id);
    CREATE INDEX pitr_audit_entry_pk_gin_idx ON pitr.audit_entry USING gin (primary_key_value);
    "#,
    name = "chronostore_pitr_tables",
    requires = ["chronostore_schemas"],
);

// Generic, table-agnostic audit capture trigger. `enable_tracking` installs
// one AFTER ROW trigger per tracked table that all invoke this same
// function; per-table behavior (which columns, which PK) is looked up from
// `pitr.tracked_table` by `TG_RELID` at fire time. See pitr::tracking.
extension_sql!(
    r#"
    CREATE FUNCTION pitr.capture_row_change() RETURNS trigger
    LANGUAGE plpgsql AS $$
    DECLARE
        v_tracked      pitr.tracked_table%ROWTYPE;
        v_old          jsonb;
        v_new          jsonb;
        v_old_filtered jsonb;
        v_new_filtered jsonb;
        v_pk           jsonb;
        v_changed      text[];
        v_key          text;
    BEGIN
        SELECT * INTO v_tracked
        FROM pitr.tracked_table
        WHERE schema_name = TG_TABLE_SCHEMA AND table_name = TG_TABLE_NAME AND enabled;

        IF NOT FOUND THEN
            RETURN NEW;
        END IF;

        IF TG_OP IN ('UPDATE', 'DELETE') THEN
            v_old := to_jsonb(OLD);
        END IF;
        IF TG_OP IN ('INSERT', 'UPDATE') THEN
            v_new := to_jsonb(NEW);
        END IF;

        IF TG_OP = 'UPDATE' AND v_old = v_new THEN
            RETURN NEW;
        END IF;

        IF v_tracked.tracked_columns IS NOT NULL THEN
            SELECT COALESCE(jsonb_object_agg(key, value), '{}'::jsonb) INTO v_old_filtered
            FROM jsonb_each(v_old) WHERE v_old IS NOT NULL AND key = ANY(v_tracked.tracked_columns);
            SELECT COALESCE(jsonb_object_agg(key, value), '{}'::jsonb) INTO v_new_filtered
            FROM jsonb_each(v_new) WHERE v_new IS NOT NULL AND key = ANY(v_tracked.tracked_columns);
        ELSIF v_tracked.excluded_columns IS NOT NULL THEN
            SELECT COALESCE(jsonb_object_agg(key, value), '{}'::jsonb) INTO v_old_filtered
            FROM jsonb_each(v_old) WHERE v_old IS NOT NULL AND NOT (key = ANY(v_tracked.excluded_columns));
            SELECT COALESCE(jsonb_object_agg(key, value), '{}'::jsonb) INTO v_new_filtered
            FROM jsonb_each(v_new) WHERE v_new IS NOT NULL AND NOT (key = ANY(v_tracked.excluded_columns));
        ELSE
            v_old_filtered := v_old;
            v_new_filtered := v_new;
        END IF;

        IF TG_OP = 'UPDATE' THEN
            SELECT array_agg(n.key) INTO v_changed
            FROM jsonb_each(v_new_filtered) n
            WHERE n.value IS DISTINCT FROM (v_old_filtered -> n.key);
            IF v_changed IS NULL OR array_length(v_changed, 1) IS NULL THEN
                RETURN NEW;
            END IF;
        END IF;

        SELECT COALESCE(jsonb_object_agg(col, COALESCE(v_new, v_old) -> col), '{}'::jsonb)
        INTO v_pk
        FROM unnest(v_tracked.primary_key_columns) AS col;

        INSERT INTO pitr.audit_entry
            (tracked_table, operation, primary_key_value, old_data, new_data,
             changed_columns, transaction_id, changed_at, changed_by, application_name)
        VALUES
            (v_tracked.id, TG_OP, v_pk,
             CASE WHEN TG_OP IN ('UPDATE', 'DELETE') THEN v_old_filtered END,
             CASE WHEN TG_OP IN ('INSERT', 'UPDATE') THEN v_new_filtered END,
             v_changed, txid_current(), clock_timestamp(), CURRENT_USER,
             current_setting('application_name'));

        RETURN NEW;
    END;
    $$;
    "#,
    name = "chronostore_pitr_capture_fn",
    requires = ["chronostore_pitr_tables"],
);

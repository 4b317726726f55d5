//! SQL schema for the roster SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS demographics (
    demographic_id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id    INTEGER,          -- NULL for legacy rows not yet linked
    national_id    INTEGER NOT NULL,
    badge_number   INTEGER NOT NULL, -- 0 = unassigned
    profile_json   TEXT    NOT NULL,
    modified_at    TEXT    NOT NULL  -- ISO 8601 UTC
);

CREATE UNIQUE INDEX IF NOT EXISTS demographics_external_idx
    ON demographics(external_id) WHERE external_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS demographics_national_badge_idx
    ON demographics(national_id, badge_number);

-- Snapshots are strictly append-only.
CREATE TABLE IF NOT EXISTS demographic_histories (
    history_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    demographic_id INTEGER NOT NULL REFERENCES demographics(demographic_id),
    reason         TEXT    NOT NULL, -- 'initial' | 'sync-update' | 'ssn-change'
    recorded_at    TEXT    NOT NULL,
    snapshot_json  TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS demographic_histories_demographic_idx
    ON demographic_histories(demographic_id);

-- Dependent tables: owned by other subsystems, referenced here only through
-- their national_id column.
CREATE TABLE IF NOT EXISTS beneficiary_contacts (
    beneficiary_contact_id INTEGER PRIMARY KEY AUTOINCREMENT,
    national_id            INTEGER NOT NULL,
    full_name              TEXT    NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS profit_details (
    profit_detail_id INTEGER PRIMARY KEY AUTOINCREMENT,
    national_id      INTEGER NOT NULL,
    profit_year      INTEGER NOT NULL DEFAULT 0,
    amount_cents     INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS beneficiary_contacts_national_idx
    ON beneficiary_contacts(national_id);
CREATE INDEX IF NOT EXISTS profit_details_national_idx
    ON profit_details(national_id);

CREATE TABLE IF NOT EXISTS demographic_sync_audit (
    audit_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    kind         TEXT    NOT NULL, -- 'duplicate-national-id' | 'identity-conflict' | 'profit-details-merge'
    national_id  INTEGER NOT NULL,
    message      TEXT    NOT NULL,
    payload_json TEXT    NOT NULL,
    recorded_at  TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS demographic_sync_audit_recorded_idx
    ON demographic_sync_audit(recorded_at);

PRAGMA user_version = 1;
";

//! Schema DDL (`spec.md` §6 "Store").
//!
//! Expressed against SQLite (the teacher's `rusqlite` dependency) but
//! shaped the way the spec describes a Postgres schema: natural-key unique
//! constraints, foreign keys on every `*_run_id`/`source_raw_record_id`
//! provenance link, check constraints on enumerated status fields, and
//! indexes on the hot read paths named in §6. `id` columns are populated
//! application-side with `uuid::Uuid::new_v4()` rather than a server-side
//! default, since SQLite has no `gen_random_uuid()` equivalent.

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1');

CREATE TABLE IF NOT EXISTS ingestion_run (
    id                 TEXT PRIMARY KEY,
    account            TEXT NOT NULL,
    run_type           TEXT NOT NULL CHECK (run_type IN ('scheduled','manual','reprocess')),
    status             TEXT NOT NULL CHECK (status IN ('started','success','failed')),
    period_key         TEXT NOT NULL,
    flex_query_id      TEXT NOT NULL,
    local_report_date  TEXT,
    started_at         TEXT NOT NULL,
    ended_at           TEXT,
    duration_ms        INTEGER,
    error_code         TEXT,
    error_message      TEXT,
    diagnostics        TEXT NOT NULL DEFAULT '[]'
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_run_single_active
    ON ingestion_run(account) WHERE status = 'started';
CREATE INDEX IF NOT EXISTS idx_run_account_started_at
    ON ingestion_run(account, started_at DESC);

CREATE TABLE IF NOT EXISTS raw_artifact (
    id               TEXT PRIMARY KEY,
    account          TEXT NOT NULL,
    period_key       TEXT NOT NULL,
    flex_query_id    TEXT NOT NULL,
    payload_sha256   TEXT NOT NULL,
    payload          BLOB NOT NULL,
    created_at       TEXT NOT NULL,
    UNIQUE (account, period_key, flex_query_id, payload_sha256)
);
CREATE INDEX IF NOT EXISTS idx_artifact_lookup
    ON raw_artifact(period_key, flex_query_id, payload_sha256);

CREATE TABLE IF NOT EXISTS raw_record (
    id                 TEXT PRIMARY KEY,
    run_id             TEXT NOT NULL REFERENCES ingestion_run(id),
    artifact_id        TEXT NOT NULL REFERENCES raw_artifact(id),
    account            TEXT NOT NULL,
    local_report_date  TEXT,
    section_name       TEXT NOT NULL,
    source_row_ref     TEXT NOT NULL,
    source_payload     TEXT NOT NULL,
    UNIQUE (artifact_id, section_name, source_row_ref)
);
CREATE INDEX IF NOT EXISTS idx_raw_record_run
    ON raw_record(run_id);
CREATE INDEX IF NOT EXISTS idx_raw_record_section
    ON raw_record(artifact_id, section_name);

CREATE TABLE IF NOT EXISTS instrument (
    id              TEXT PRIMARY KEY,
    account         TEXT NOT NULL,
    conid           INTEGER NOT NULL,
    symbol          TEXT,
    local_symbol    TEXT,
    isin            TEXT,
    cusip           TEXT,
    figi            TEXT,
    asset_category  TEXT,
    currency        TEXT,
    description     TEXT,
    active          INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (account, conid)
);
CREATE INDEX IF NOT EXISTS idx_instrument_account_conid
    ON instrument(account, conid);

CREATE TABLE IF NOT EXISTS event_trade_fill (
    id                     TEXT PRIMARY KEY,
    run_id                 TEXT NOT NULL REFERENCES ingestion_run(id),
    raw_record_id          TEXT NOT NULL REFERENCES raw_record(id),
    account                TEXT NOT NULL,
    ib_exec_id             TEXT NOT NULL,
    instrument_id          TEXT NOT NULL REFERENCES instrument(id),
    conid                  INTEGER NOT NULL,
    side                   TEXT NOT NULL CHECK (side IN ('BUY','SELL')),
    quantity               TEXT NOT NULL,
    price                  TEXT NOT NULL,
    commission             TEXT NOT NULL,
    net_cash               TEXT NOT NULL,
    cost                   TEXT NOT NULL,
    realized_pnl           TEXT NOT NULL,
    currency               TEXT NOT NULL,
    trade_timestamp_utc    TEXT NOT NULL,
    report_date_local      TEXT NOT NULL,
    UNIQUE (account, ib_exec_id)
);
CREATE INDEX IF NOT EXISTS idx_trade_fill_instrument_time
    ON event_trade_fill(account, instrument_id, trade_timestamp_utc);

CREATE TABLE IF NOT EXISTS event_cashflow (
    id                  TEXT PRIMARY KEY,
    run_id              TEXT NOT NULL REFERENCES ingestion_run(id),
    raw_record_id       TEXT NOT NULL REFERENCES raw_record(id),
    account             TEXT NOT NULL,
    transaction_id      TEXT NOT NULL,
    cash_action         TEXT NOT NULL,
    currency            TEXT NOT NULL,
    amount              TEXT NOT NULL,
    report_date_local   TEXT NOT NULL,
    instrument_id       TEXT REFERENCES instrument(id),
    is_correction       INTEGER NOT NULL DEFAULT 0,
    UNIQUE (account, transaction_id, cash_action, currency)
);
CREATE INDEX IF NOT EXISTS idx_cashflow_instrument_date
    ON event_cashflow(account, instrument_id, report_date_local);

CREATE TABLE IF NOT EXISTS event_fx (
    id                     TEXT PRIMARY KEY,
    run_id                 TEXT NOT NULL REFERENCES ingestion_run(id),
    raw_record_id          TEXT NOT NULL REFERENCES raw_record(id),
    account                TEXT NOT NULL,
    transaction_id         TEXT NOT NULL,
    currency               TEXT NOT NULL,
    functional_currency    TEXT NOT NULL,
    rate                   TEXT NOT NULL,
    source                 TEXT NOT NULL,
    report_date_local      TEXT NOT NULL,
    UNIQUE (account, transaction_id, currency, functional_currency)
);

CREATE TABLE IF NOT EXISTS event_corporate_action (
    id                  TEXT PRIMARY KEY,
    run_id              TEXT NOT NULL REFERENCES ingestion_run(id),
    raw_record_id       TEXT NOT NULL REFERENCES raw_record(id),
    account             TEXT NOT NULL,
    action_id           TEXT,
    transaction_id      TEXT,
    conid               INTEGER,
    report_date_local   TEXT,
    reorg_code          TEXT,
    provisional         INTEGER NOT NULL DEFAULT 0,
    manual_case         INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_corp_action_id
    ON event_corporate_action(account, action_id) WHERE action_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_corp_action_fallback
    ON event_corporate_action(account, transaction_id, conid, report_date_local, reorg_code)
    WHERE action_id IS NULL;

CREATE TABLE IF NOT EXISTS position_lot (
    id                     TEXT PRIMARY KEY,
    account                TEXT NOT NULL,
    instrument_id          TEXT NOT NULL REFERENCES instrument(id),
    opening_trade_fill_id  TEXT NOT NULL REFERENCES event_trade_fill(id),
    open_timestamp_utc     TEXT NOT NULL,
    close_timestamp_utc    TEXT,
    open_quantity          TEXT NOT NULL,
    remaining_quantity     TEXT NOT NULL,
    open_price             TEXT NOT NULL,
    opening_cost_basis     TEXT NOT NULL,
    realized_pnl_to_date   TEXT NOT NULL,
    status                 TEXT NOT NULL CHECK (status IN ('open','closed')),
    created_at             TEXT NOT NULL,
    updated_at             TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_lot_instrument_open
    ON position_lot(account, instrument_id, open_timestamp_utc);

CREATE TABLE IF NOT EXISTS pnl_snapshot_daily (
    id                  TEXT PRIMARY KEY,
    account             TEXT NOT NULL,
    local_report_date   TEXT NOT NULL,
    instrument_id       TEXT NOT NULL REFERENCES instrument(id),
    position_qty        TEXT NOT NULL,
    cost_basis          TEXT NOT NULL,
    realized_pnl        TEXT NOT NULL,
    unrealized_pnl      TEXT NOT NULL,
    total_pnl           TEXT NOT NULL,
    fees                TEXT NOT NULL,
    withholding_tax     TEXT NOT NULL,
    currency            TEXT NOT NULL,
    provisional         INTEGER NOT NULL DEFAULT 0,
    valuation_source    TEXT,
    fx_source           TEXT,
    run_id              TEXT NOT NULL REFERENCES ingestion_run(id),
    UNIQUE (account, local_report_date, instrument_id)
);
CREATE INDEX IF NOT EXISTS idx_snapshot_instrument_date
    ON pnl_snapshot_daily(instrument_id, local_report_date);
"#;

//! SQL schema for the Polichat SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS personas (
    persona_id    TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    party         TEXT,
    title         TEXT,
    tone          TEXT,
    catchphrases  TEXT NOT NULL DEFAULT '[]',   -- JSON array
    stance        TEXT NOT NULL DEFAULT '',
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS knowledge (
    persona_id  TEXT NOT NULL REFERENCES personas(persona_id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    content     TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (persona_id, name)
);

-- One row per (topic, style, type, version). Versions are assigned by the
-- writer as latest + 1; the unique key turns a lost race into a conflict.
CREATE TABLE IF NOT EXISTS debate_cache (
    cache_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    topic          TEXT NOT NULL,
    style          TEXT NOT NULL,    -- 'calm' | 'heated' | 'comedic'
    debate_type    TEXT NOT NULL,    -- 'topic' | 'free'
    version        INTEGER NOT NULL,
    messages_json  TEXT NOT NULL,
    judgment_json  TEXT,
    created_at     TEXT NOT NULL,
    UNIQUE (topic, style, debate_type, version)
);

CREATE TABLE IF NOT EXISTS issues (
    issue_date      TEXT PRIMARY KEY,   -- YYYY-MM-DD, Korean calendar day
    title           TEXT NOT NULL,
    summary         TEXT NOT NULL,
    talking_points  TEXT NOT NULL DEFAULT '[]',
    source_url      TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS topic_briefs (
    topic       TEXT NOT NULL,
    persona_id  TEXT NOT NULL,
    points      TEXT NOT NULL,   -- JSON array
    created_at  TEXT NOT NULL,
    PRIMARY KEY (topic, persona_id)
);

CREATE TABLE IF NOT EXISTS user_memory (
    user_id         TEXT NOT NULL,
    persona_id      TEXT NOT NULL,
    total_messages  INTEGER NOT NULL DEFAULT 0,
    affinity_score  INTEGER NOT NULL DEFAULT 0,
    facts           TEXT NOT NULL DEFAULT '[]',
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (user_id, persona_id)
);

-- Append-only conversation log.
CREATE TABLE IF NOT EXISTS conversation_memory (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id   TEXT NOT NULL UNIQUE,
    user_id     TEXT NOT NULL,
    persona_id  TEXT NOT NULL,
    role        TEXT NOT NULL,   -- 'user' | 'assistant'
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS intimacy (
    user_id     TEXT NOT NULL,
    persona_id  TEXT NOT NULL,
    level       INTEGER NOT NULL,
    xp          INTEGER NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (user_id, persona_id)
);

CREATE INDEX IF NOT EXISTS debate_cache_key_idx ON debate_cache(topic, style, debate_type);
CREATE INDEX IF NOT EXISTS conversation_pair_idx ON conversation_memory(user_id, persona_id);

PRAGMA user_version = 1;
";

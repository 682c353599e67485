pub const SCHEMA: &str = r#"
-- Configured upstream registries
CREATE TABLE IF NOT EXISTS registries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    host TEXT NOT NULL,
    last_status INTEGER  -- NULL = never checked, -1 = unreachable
);

CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    registry_id INTEGER NOT NULL REFERENCES registries(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    UNIQUE(registry_id, name)
);

-- Tag pointers; digest deliberately has no foreign key so a tag can be
-- written before or without its manifest row
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    digest TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(repo_id, name)
);

CREATE INDEX IF NOT EXISTS idx_tags_digest ON tags(digest);

-- Single-platform manifests and manifest lists. manifest_list_digest names
-- one list containing the manifest; membership lives in manifest_list_entries.
CREATE TABLE IF NOT EXISTS manifests (
    digest TEXT PRIMARY KEY,
    media_type TEXT NOT NULL,
    os TEXT NOT NULL DEFAULT '',
    architecture TEXT NOT NULL DEFAULT '',
    created TEXT,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    manifest_list_digest TEXT REFERENCES manifests(digest) ON DELETE SET NULL,
    labels TEXT  -- JSON object
);

CREATE INDEX IF NOT EXISTS idx_manifests_list ON manifests(manifest_list_digest);

-- A platform manifest can be listed by several indexes and tagged directly.
-- Deleting either side only drops the link; orphan collection decides the rest.
CREATE TABLE IF NOT EXISTS manifest_list_entries (
    list_digest TEXT NOT NULL REFERENCES manifests(digest) ON DELETE CASCADE,
    child_digest TEXT NOT NULL REFERENCES manifests(digest) ON DELETE CASCADE,
    PRIMARY KEY (list_digest, child_digest)
);

CREATE INDEX IF NOT EXISTS idx_manifest_list_entries_child
    ON manifest_list_entries(child_digest);

CREATE TABLE IF NOT EXISTS manifest_layers (
    manifest_digest TEXT NOT NULL REFERENCES manifests(digest) ON DELETE CASCADE,
    layer_digest TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (manifest_digest, layer_digest)
);

-- Durable work queue. Absent scope is stored as '' so the UNIQUE key treats
-- it as equal.
CREATE TABLE IF NOT EXISTS sync_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL CHECK (job_type IN ('catalog', 'tags', 'manifest')),
    registry_name TEXT NOT NULL,
    repository TEXT NOT NULL DEFAULT '',
    tag_ref TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'running', 'completed', 'failed')),
    priority INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    next_retry_at TEXT,
    backoff_seconds INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    UNIQUE(job_type, registry_name, repository, tag_ref)
);

CREATE INDEX IF NOT EXISTS idx_sync_jobs_claim
    ON sync_jobs(status, priority DESC, next_retry_at, created_at);

-- Markers for cache rows that need recomputing
CREATE TABLE IF NOT EXISTS dirty_repos (
    repo_id INTEGER PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS dirty_tags (
    tag_id INTEGER PRIMARY KEY REFERENCES tags(id) ON DELETE CASCADE
);

-- Materialized aggregates
CREATE TABLE IF NOT EXISTS repository_stats (
    id INTEGER PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE,
    registry_id INTEGER NOT NULL,
    registry_name TEXT NOT NULL,
    registry_host TEXT NOT NULL,
    name TEXT NOT NULL,
    tags_count INTEGER NOT NULL DEFAULT 0,
    total_size INTEGER NOT NULL DEFAULT 0,
    architectures TEXT NOT NULL DEFAULT '',  -- comma-separated
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tag_details (
    id INTEGER PRIMARY KEY REFERENCES tags(id) ON DELETE CASCADE,
    repo_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    digest TEXT NOT NULL,
    earliest_created TEXT,
    total_size_in_bytes INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
"#;

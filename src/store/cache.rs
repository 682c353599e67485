use rusqlite::{OptionalExtension, Row, Transaction, TransactionBehavior, params};

use super::sqlite::{SqliteStore, now, parse_datetime};
use super::{CacheStore, RefreshCounts};
use crate::error::{Error, Result};
use crate::types::*;

const ALL_ROWS: &str = "1 = 1";
const DIRTY_REPOS: &str = "r.id IN (SELECT repo_id FROM dirty_repos)";
const DIRTY_TAGS: &str = "t.id IN (SELECT tag_id FROM dirty_tags)";

const STATS_COLUMNS: &str = "id, registry_id, registry_name, registry_host, name, tags_count,
    total_size, architectures, updated_at";

/// Recomputes `repository_stats` for repositories matching `filter`.
///
/// Size counts each distinct referenced manifest once; a list already
/// carries the size of its platforms. Architectures come from the tagged
/// manifests and their platform children.
fn refresh_repository_stats(tx: &Transaction<'_>, filter: &str) -> Result<usize> {
    let sql = format!(
        "INSERT INTO repository_stats (id, registry_id, registry_name, registry_host, name,
            tags_count, total_size, architectures, updated_at)
         SELECT r.id, g.id, g.name, g.host, r.name,
            (SELECT COUNT(*) FROM tags t WHERE t.repo_id = r.id),
            COALESCE((SELECT SUM(m.size_bytes) FROM manifests m
                      WHERE m.digest IN (SELECT t.digest FROM tags t WHERE t.repo_id = r.id)), 0),
            COALESCE((SELECT group_concat(DISTINCT m.architecture) FROM manifests m
                      JOIN tags t ON t.repo_id = r.id
                       AND (m.digest = t.digest
                            OR m.digest IN (SELECT e.child_digest FROM manifest_list_entries e
                                            WHERE e.list_digest = t.digest))
                      WHERE m.architecture <> ''), ''),
            ?1
         FROM repositories r
         JOIN registries g ON g.id = r.registry_id
         WHERE {filter}
         ON CONFLICT(id) DO UPDATE SET
            registry_id = excluded.registry_id,
            registry_name = excluded.registry_name,
            registry_host = excluded.registry_host,
            name = excluded.name,
            tags_count = excluded.tags_count,
            total_size = excluded.total_size,
            architectures = excluded.architectures,
            updated_at = excluded.updated_at"
    );
    Ok(tx.execute(&sql, params![now()])?)
}

/// Recomputes `tag_details` for tags matching `filter`.
fn refresh_tag_details(tx: &Transaction<'_>, filter: &str) -> Result<usize> {
    let sql = format!(
        "INSERT INTO tag_details (id, repo_id, name, digest, earliest_created,
            total_size_in_bytes, updated_at)
         SELECT t.id, t.repo_id, t.name, t.digest,
            (SELECT MIN(m.created) FROM manifests m
             WHERE (m.digest = t.digest
                    OR m.digest IN (SELECT e.child_digest FROM manifest_list_entries e
                                    WHERE e.list_digest = t.digest))
               AND m.created IS NOT NULL AND m.created <> ''),
            COALESCE((SELECT m.size_bytes FROM manifests m WHERE m.digest = t.digest), 0),
            ?1
         FROM tags t
         WHERE {filter}
         ON CONFLICT(id) DO UPDATE SET
            repo_id = excluded.repo_id,
            name = excluded.name,
            digest = excluded.digest,
            earliest_created = excluded.earliest_created,
            total_size_in_bytes = excluded.total_size_in_bytes,
            updated_at = excluded.updated_at"
    );
    Ok(tx.execute(&sql, params![now()])?)
}

fn stats_from_row(row: &Row<'_>) -> rusqlite::Result<RepositoryStats> {
    let architectures: String = row.get(7)?;
    let mut architectures: Vec<String> = architectures
        .split(',')
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    architectures.sort();
    architectures.dedup();

    Ok(RepositoryStats {
        id: row.get(0)?,
        registry_id: row.get(1)?,
        registry_name: row.get(2)?,
        registry_host: row.get(3)?,
        name: row.get(4)?,
        tags_count: row.get(5)?,
        total_size: row.get(6)?,
        architectures,
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

impl CacheStore for SqliteStore {
    fn refresh_all(&self) -> Result<RefreshCounts> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM repository_stats WHERE id NOT IN (SELECT id FROM repositories)",
            [],
        )?;
        tx.execute(
            "DELETE FROM tag_details WHERE id NOT IN (SELECT id FROM tags)",
            [],
        )?;

        let counts = RefreshCounts {
            tags: refresh_tag_details(&tx, ALL_ROWS)?,
            repositories: refresh_repository_stats(&tx, ALL_ROWS)?,
        };

        tx.execute("DELETE FROM dirty_tags", [])?;
        tx.execute("DELETE FROM dirty_repos", [])?;

        tx.commit()?;
        Ok(counts)
    }

    fn refresh_all_dirty(&self) -> Result<RefreshCounts> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Markers are only cleared if every recompute succeeds.
        let counts = RefreshCounts {
            tags: refresh_tag_details(&tx, DIRTY_TAGS)?,
            repositories: refresh_repository_stats(&tx, DIRTY_REPOS)?,
        };

        tx.execute("DELETE FROM dirty_tags", [])?;
        tx.execute("DELETE FROM dirty_repos", [])?;

        tx.commit()?;
        Ok(counts)
    }

    fn mark_all_dirty(&self) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT OR IGNORE INTO dirty_repos (repo_id) SELECT id FROM repositories",
            [],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO dirty_tags (tag_id) SELECT id FROM tags",
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn count_dirty(&self) -> Result<RefreshCounts> {
        let conn = self.conn();
        let (repositories, tags): (i64, i64) = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM dirty_repos), (SELECT COUNT(*) FROM dirty_tags)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(RefreshCounts {
            repositories: repositories as usize,
            tags: tags as usize,
        })
    }

    fn get_repository_stats(&self, repo_id: i64) -> Result<Option<RepositoryStats>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {STATS_COLUMNS} FROM repository_stats WHERE id = ?1"),
            params![repo_id],
            stats_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_repository_stats(&self) -> Result<Vec<RepositoryStats>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {STATS_COLUMNS} FROM repository_stats ORDER BY registry_name, name"
        ))?;
        let rows = stmt.query_map([], stats_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_tag_details(&self, tag_id: i64) -> Result<Option<TagDetails>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, repo_id, name, digest, earliest_created, total_size_in_bytes, updated_at
             FROM tag_details WHERE id = ?1",
            params![tag_id],
            |row| {
                Ok(TagDetails {
                    id: row.get(0)?,
                    repo_id: row.get(1)?,
                    name: row.get(2)?,
                    digest: row.get(3)?,
                    earliest_created: row.get(4)?,
                    total_size_in_bytes: row.get(5)?,
                    updated_at: parse_datetime(&row.get::<_, String>(6)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }
}

use std::collections::BTreeMap;

use rusqlite::{OptionalExtension, Row, Transaction, TransactionBehavior, params};

use super::CatalogStore;
use super::sqlite::{SqliteStore, delete_orphan_manifests, now, repoint_list_digests};
use crate::error::{Error, Result};
use crate::types::*;

const MANIFEST_COLUMNS: &str =
    "digest, media_type, os, architecture, created, size_bytes, manifest_list_digest, labels";

fn registry_from_row(row: &Row<'_>) -> rusqlite::Result<Registry> {
    Ok(Registry {
        id: row.get(0)?,
        name: row.get(1)?,
        host: row.get(2)?,
        last_status: row.get(3)?,
    })
}

fn manifest_from_row(row: &Row<'_>) -> rusqlite::Result<Manifest> {
    let labels: Option<String> = row.get(7)?;
    Ok(Manifest {
        digest: row.get(0)?,
        media_type: row.get(1)?,
        os: row.get(2)?,
        architecture: row.get(3)?,
        created: row.get(4)?,
        size_bytes: row.get(5)?,
        manifest_list_digest: row.get(6)?,
        labels: labels.and_then(|l| serde_json::from_str(&l).ok()),
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        name: row.get(2)?,
        digest: row.get(3)?,
    })
}

fn find_registry(tx: &Transaction<'_>, name: &str) -> Result<Option<Registry>> {
    tx.query_row(
        "SELECT id, name, host, last_status FROM registries WHERE name = ?1",
        params![name],
        registry_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn insert_registry(tx: &Transaction<'_>, name: &str, host: &str) -> Result<Registry> {
    tx.query_row(
        "INSERT INTO registries (name, host) VALUES (?1, ?2)
         RETURNING id, name, host, last_status",
        params![name, host],
        registry_from_row,
    )
    .map_err(Error::from)
}

/// Resolves the repository id, creating the registry and repository rows
/// when missing. An existing registry keeps its stored host.
fn ensure_repository_id(tx: &Transaction<'_>, registry: &str, host: &str, name: &str) -> Result<i64> {
    tx.execute(
        "INSERT INTO registries (name, host) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
        params![registry, host],
    )?;
    tx.execute(
        "INSERT INTO repositories (registry_id, name)
         SELECT id, ?2 FROM registries WHERE name = ?1
         ON CONFLICT(registry_id, name) DO NOTHING",
        params![registry, name],
    )?;
    let id: i64 = tx.query_row(
        "SELECT r.id FROM repositories r
         JOIN registries g ON g.id = r.registry_id
         WHERE g.name = ?1 AND r.name = ?2",
        params![registry, name],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn upsert_manifest(
    tx: &Transaction<'_>,
    record: &ManifestRecord,
    size_bytes: i64,
    list_digest: Option<&str>,
) -> Result<()> {
    let labels = record.labels.as_ref().map(serde_json::to_string).transpose()?;
    tx.execute(
        "INSERT INTO manifests (digest, media_type, os, architecture, created, size_bytes,
            manifest_list_digest, labels)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(digest) DO UPDATE SET
            media_type = excluded.media_type,
            os = excluded.os,
            architecture = excluded.architecture,
            created = excluded.created,
            size_bytes = excluded.size_bytes,
            manifest_list_digest = COALESCE(excluded.manifest_list_digest,
                                            manifests.manifest_list_digest),
            labels = excluded.labels",
        params![
            record.digest,
            record.media_type,
            record.os,
            record.architecture,
            record.created,
            size_bytes,
            list_digest,
            labels,
        ],
    )?;

    tx.execute(
        "DELETE FROM manifest_layers WHERE manifest_digest = ?1",
        params![record.digest],
    )?;
    for layer in &record.layers {
        tx.execute(
            "INSERT INTO manifest_layers (manifest_digest, layer_digest, size_bytes)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(manifest_digest, layer_digest) DO NOTHING",
            params![record.digest, layer.digest, layer.size_bytes],
        )?;
    }
    Ok(())
}

fn mark_repo_dirty(tx: &Transaction<'_>, repo_id: i64) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO dirty_repos (repo_id) VALUES (?1)",
        params![repo_id],
    )?;
    Ok(())
}

impl CatalogStore for SqliteStore {
    fn ensure_registry(&self, name: &str, host: &str) -> Result<Registry> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let registry = match find_registry(&tx, name)? {
            Some(existing) if existing.host == host => existing,
            Some(existing) => {
                tracing::info!(
                    "Registry {name} moved from {} to {host}, dropping mirrored data",
                    existing.host
                );
                tx.execute("DELETE FROM registries WHERE id = ?1", params![existing.id])?;
                delete_orphan_manifests(&tx)?;
                insert_registry(&tx, name, host)?
            }
            None => insert_registry(&tx, name, host)?,
        };

        tx.commit()?;
        Ok(registry)
    }

    fn get_registry(&self, name: &str) -> Result<Option<Registry>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, host, last_status FROM registries WHERE name = ?1",
            params![name],
            registry_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_registries(&self) -> Result<Vec<Registry>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, host, last_status FROM registries ORDER BY name")?;
        let rows = stmt.query_map([], registry_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn set_registry_status(&self, name: &str, status: i64) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE registries SET last_status = ?2 WHERE name = ?1",
            params![name, status],
        )?;
        if updated == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_registry(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute("DELETE FROM registries WHERE name = ?1", params![name])?;
        if deleted > 0 {
            delete_orphan_manifests(&tx)?;
        }
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn ensure_repository(&self, registry: &str, host: &str, name: &str) -> Result<Repository> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id = ensure_repository_id(&tx, registry, host, name)?;
        mark_repo_dirty(&tx, id)?;
        let repo = tx.query_row(
            "SELECT id, registry_id, name FROM repositories WHERE id = ?1",
            params![id],
            |row| {
                Ok(Repository {
                    id: row.get(0)?,
                    registry_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )?;
        tx.commit()?;
        Ok(repo)
    }

    fn get_repository(&self, registry: &str, name: &str) -> Result<Option<Repository>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT r.id, r.registry_id, r.name FROM repositories r
             JOIN registries g ON g.id = r.registry_id
             WHERE g.name = ?1 AND r.name = ?2",
            params![registry, name],
            |row| {
                Ok(Repository {
                    id: row.get(0)?,
                    registry_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_repository_names(&self, registry: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT r.name FROM repositories r
             JOIN registries g ON g.id = r.registry_id
             WHERE g.name = ?1 ORDER BY r.name",
        )?;
        let rows = stmt.query_map(params![registry], |row| row.get::<_, String>(0))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_repository(&self, registry: &str, name: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute(
            "DELETE FROM repositories
             WHERE name = ?2 AND registry_id = (SELECT id FROM registries WHERE name = ?1)",
            params![registry, name],
        )?;
        if deleted > 0 {
            delete_orphan_manifests(&tx)?;
        }
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn get_tag(&self, registry: &str, repository: &str, name: &str) -> Result<Option<Tag>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT t.id, t.repo_id, t.name, t.digest FROM tags t
             JOIN repositories r ON r.id = t.repo_id
             JOIN registries g ON g.id = r.registry_id
             WHERE g.name = ?1 AND r.name = ?2 AND t.name = ?3",
            params![registry, repository, name],
            tag_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tag_digests(
        &self,
        registry: &str,
        repository: &str,
    ) -> Result<BTreeMap<String, String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.name, t.digest FROM tags t
             JOIN repositories r ON r.id = t.repo_id
             JOIN registries g ON g.id = r.registry_id
             WHERE g.name = ?1 AND r.name = ?2",
        )?;
        let rows = stmt.query_map(params![registry, repository], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        rows.collect::<std::result::Result<BTreeMap<_, _>, _>>()
            .map_err(Error::from)
    }

    fn delete_tag(&self, registry: &str, repository: &str, name: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let target: Option<(i64, i64)> = tx
            .query_row(
                "SELECT t.id, t.repo_id FROM tags t
                 JOIN repositories r ON r.id = t.repo_id
                 JOIN registries g ON g.id = r.registry_id
                 WHERE g.name = ?1 AND r.name = ?2 AND t.name = ?3",
                params![registry, repository, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((tag_id, repo_id)) = target else {
            return Ok(false);
        };

        mark_repo_dirty(&tx, repo_id)?;
        tx.execute("DELETE FROM tags WHERE id = ?1", params![tag_id])?;
        delete_orphan_manifests(&tx)?;

        tx.commit()?;
        Ok(true)
    }

    fn save_tag_image(&self, image: &ImageRecord) -> Result<Tag> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let repo_id = ensure_repository_id(
            &tx,
            &image.registry_name,
            &image.registry_host,
            &image.repository,
        )?;

        if image.is_index() {
            let list = ManifestRecord {
                os: String::new(),
                architecture: String::new(),
                layers: Vec::new(),
                ..image.manifest.clone()
            };
            upsert_manifest(&tx, &list, image.total_size(), None)?;

            // Platforms dropped from the list lose their link and are collected
            // below unless something else still reaches them.
            tx.execute(
                "DELETE FROM manifest_list_entries WHERE list_digest = ?1",
                params![list.digest],
            )?;
            for platform in &image.platforms {
                upsert_manifest(&tx, platform, platform.layers_size(), Some(&list.digest))?;
                tx.execute(
                    "INSERT OR IGNORE INTO manifest_list_entries (list_digest, child_digest)
                     VALUES (?1, ?2)",
                    params![list.digest, platform.digest],
                )?;
            }
            repoint_list_digests(&tx)?;
        } else {
            upsert_manifest(&tx, &image.manifest, image.total_size(), None)?;
        }

        let tag = tx.query_row(
            "INSERT INTO tags (repo_id, name, digest, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo_id, name) DO UPDATE SET
                digest = excluded.digest,
                updated_at = excluded.updated_at
             RETURNING id, repo_id, name, digest",
            params![repo_id, image.tag, image.manifest.digest, now()],
            tag_from_row,
        )?;

        tx.execute(
            "INSERT OR IGNORE INTO dirty_tags (tag_id) VALUES (?1)",
            params![tag.id],
        )?;
        mark_repo_dirty(&tx, repo_id)?;
        delete_orphan_manifests(&tx)?;

        tx.commit()?;
        Ok(tag)
    }

    fn get_manifest(&self, digest: &str) -> Result<Option<Manifest>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {MANIFEST_COLUMNS} FROM manifests WHERE digest = ?1"),
            params![digest],
            manifest_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_platform_manifests(&self, list_digest: &str) -> Result<Vec<Manifest>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MANIFEST_COLUMNS} FROM manifests
             WHERE digest IN (SELECT child_digest FROM manifest_list_entries
                              WHERE list_digest = ?1)
             ORDER BY architecture, digest"
        ))?;
        let rows = stmt.query_map(params![list_digest], manifest_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_manifest_layers(&self, digest: &str) -> Result<Vec<ManifestLayer>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT manifest_digest, layer_digest, size_bytes FROM manifest_layers
             WHERE manifest_digest = ?1 ORDER BY layer_digest",
        )?;
        let rows = stmt.query_map(params![digest], |row| {
            Ok(ManifestLayer {
                manifest_digest: row.get(0)?,
                layer_digest: row.get(1)?,
                size_bytes: row.get(2)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::super::CacheStore;
    use super::super::sqlite::test_support::*;
    use super::*;

    fn count(store: &SqliteStore, table: &str) -> i64 {
        store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    fn multi_arch(repo: &str, tag: &str) -> ImageRecord {
        index_image(
            repo,
            tag,
            "sha256:list",
            vec![
                platform("sha256:amd", "amd64", "2024-02-01T00:00:00Z", vec![layer("sha256:a1", 10)]),
                platform("sha256:arm", "arm64", "2024-01-01T00:00:00Z", vec![layer("sha256:b1", 20)]),
                platform("sha256:ppc", "ppc64le", "2024-03-01T00:00:00Z", vec![
                    layer("sha256:c1", 5),
                    layer("sha256:c2", 25),
                ]),
            ],
        )
    }

    #[test]
    fn test_save_single_manifest() {
        let (_temp, store) = open();
        let image = single_image(
            "lib/a",
            "v1",
            platform("sha256:one", "amd64", "2024-01-01T00:00:00Z", vec![
                layer("sha256:l1", 100),
                layer("sha256:l2", 200),
            ]),
        );

        let tag = store.save_tag_image(&image).unwrap();
        assert_eq!(tag.digest, "sha256:one");

        let repo = store.get_repository("default", "lib/a").unwrap().unwrap();
        assert_eq!(tag.repo_id, repo.id);
        let registry = store.get_registry("default").unwrap().unwrap();
        assert_eq!(registry.host, "registry.example.com");

        let manifest = store.get_manifest("sha256:one").unwrap().unwrap();
        assert_eq!(manifest.size_bytes, 300);
        assert_eq!(manifest.architecture, "amd64");
        assert!(manifest.manifest_list_digest.is_none());
        assert_eq!(store.list_manifest_layers("sha256:one").unwrap().len(), 2);

        assert_eq!(store.count_dirty().unwrap(), crate::store::RefreshCounts {
            repositories: 1,
            tags: 1,
        });
    }

    #[test]
    fn test_save_index_sums_platform_sizes() {
        let (_temp, store) = open();
        store.save_tag_image(&multi_arch("lib/a", "v1")).unwrap();

        let list = store.get_manifest("sha256:list").unwrap().unwrap();
        assert_eq!(list.size_bytes, 60);
        assert_eq!(list.os, "");
        assert_eq!(list.architecture, "");

        let children = store.list_platform_manifests("sha256:list").unwrap();
        assert_eq!(children.len(), 3);
        assert!(
            children
                .iter()
                .all(|c| c.manifest_list_digest.as_deref() == Some("sha256:list"))
        );
        let ppc = children.iter().find(|c| c.architecture == "ppc64le").unwrap();
        assert_eq!(ppc.size_bytes, 30);
        assert!(store.list_manifest_layers("sha256:list").unwrap().is_empty());
    }

    #[test]
    fn test_save_is_idempotent_and_updates_pointer() {
        let (_temp, store) = open();
        let first = single_image(
            "lib/a",
            "latest",
            platform("sha256:old", "amd64", "2024-01-01T00:00:00Z", vec![layer("sha256:l1", 1)]),
        );
        let tag1 = store.save_tag_image(&first).unwrap();
        let tag2 = store.save_tag_image(&first).unwrap();
        assert_eq!(tag1.id, tag2.id);
        assert_eq!(count(&store, "manifest_layers"), 1);

        let second = single_image(
            "lib/a",
            "latest",
            platform("sha256:new", "amd64", "2024-01-02T00:00:00Z", vec![layer("sha256:l2", 2)]),
        );
        let tag3 = store.save_tag_image(&second).unwrap();
        assert_eq!(tag3.id, tag1.id);
        assert_eq!(tag3.digest, "sha256:new");

        // The replaced manifest is no longer referenced.
        assert!(store.get_manifest("sha256:old").unwrap().is_none());
        assert_eq!(count(&store, "manifests"), 1);
        assert_eq!(count(&store, "manifest_layers"), 1);
    }

    #[test]
    fn test_shared_manifest_survives_single_tag_delete() {
        let (_temp, store) = open();
        store.save_tag_image(&multi_arch("lib/a", "v1")).unwrap();
        store.save_tag_image(&multi_arch("lib/a", "latest")).unwrap();

        assert!(store.delete_tag("default", "lib/a", "v1").unwrap());
        assert!(store.get_manifest("sha256:list").unwrap().is_some());
        assert_eq!(store.list_platform_manifests("sha256:list").unwrap().len(), 3);

        assert!(store.delete_tag("default", "lib/a", "latest").unwrap());
        assert_eq!(count(&store, "manifests"), 0);
        assert_eq!(count(&store, "manifest_layers"), 0);
        assert!(!store.delete_tag("default", "lib/a", "latest").unwrap());
    }

    fn amd64() -> ManifestRecord {
        platform("sha256:amd", "amd64", "2024-02-01T00:00:00Z", vec![layer("sha256:a1", 10)])
    }

    fn arm64() -> ManifestRecord {
        platform("sha256:arm", "arm64", "2024-01-01T00:00:00Z", vec![layer("sha256:b1", 20)])
    }

    #[test]
    fn test_directly_tagged_platform_survives_list_delete() {
        let (_temp, store) = open();
        store.save_tag_image(&single_image("lib/a", "amd64", amd64())).unwrap();
        store
            .save_tag_image(&index_image("lib/a", "latest", "sha256:list", vec![amd64(), arm64()]))
            .unwrap();
        assert_eq!(
            store.get_manifest("sha256:amd").unwrap().unwrap().manifest_list_digest.as_deref(),
            Some("sha256:list")
        );

        assert!(store.delete_tag("default", "lib/a", "latest").unwrap());

        let amd = store.get_manifest("sha256:amd").unwrap().unwrap();
        assert!(amd.manifest_list_digest.is_none());
        assert_eq!(store.list_manifest_layers("sha256:amd").unwrap().len(), 1);
        assert!(store.get_manifest("sha256:list").unwrap().is_none());
        assert!(store.get_manifest("sha256:arm").unwrap().is_none());
        assert_eq!(count(&store, "manifest_list_entries"), 0);

        store.refresh_all_dirty().unwrap();
        let repo = store.get_repository("default", "lib/a").unwrap().unwrap();
        let stats = store.get_repository_stats(repo.id).unwrap().unwrap();
        assert_eq!(stats.tags_count, 1);
        assert_eq!(stats.total_size, 10);
        assert_eq!(stats.architectures, ["amd64"]);
    }

    #[test]
    fn test_single_save_keeps_list_membership() {
        let (_temp, store) = open();
        store
            .save_tag_image(&index_image("lib/a", "latest", "sha256:list", vec![amd64(), arm64()]))
            .unwrap();
        store.save_tag_image(&single_image("lib/a", "amd64", amd64())).unwrap();

        let amd = store.get_manifest("sha256:amd").unwrap().unwrap();
        assert_eq!(amd.manifest_list_digest.as_deref(), Some("sha256:list"));
        assert_eq!(store.list_platform_manifests("sha256:list").unwrap().len(), 2);
    }

    #[test]
    fn test_platform_shared_by_two_lists() {
        let (_temp, store) = open();
        let ppc = platform("sha256:ppc", "ppc64le", "2023-06-01T00:00:00Z", vec![layer("sha256:c1", 30)]);
        store
            .save_tag_image(&index_image("lib/a", "v1", "sha256:list1", vec![amd64(), arm64()]))
            .unwrap();
        store
            .save_tag_image(&index_image("lib/a", "v2", "sha256:list2", vec![amd64(), ppc]))
            .unwrap();

        // The first list keeps its amd64 child after the second one claims it.
        assert_eq!(store.list_platform_manifests("sha256:list1").unwrap().len(), 2);
        assert_eq!(store.list_platform_manifests("sha256:list2").unwrap().len(), 2);

        store.refresh_all_dirty().unwrap();
        let v1 = store.get_tag("default", "lib/a", "v1").unwrap().unwrap();
        let details = store.get_tag_details(v1.id).unwrap().unwrap();
        assert_eq!(details.earliest_created.as_deref(), Some("2024-01-01T00:00:00Z"));

        assert!(store.delete_tag("default", "lib/a", "v2").unwrap());
        assert!(store.get_manifest("sha256:ppc").unwrap().is_none());
        let amd = store.get_manifest("sha256:amd").unwrap().unwrap();
        assert_eq!(amd.manifest_list_digest.as_deref(), Some("sha256:list1"));

        store.refresh_all_dirty().unwrap();
        let repo = store.get_repository("default", "lib/a").unwrap().unwrap();
        let stats = store.get_repository_stats(repo.id).unwrap().unwrap();
        assert_eq!(stats.architectures, ["amd64", "arm64"]);
    }

    #[test]
    fn test_platform_dropped_from_list_is_collected() {
        let (_temp, store) = open();
        store
            .save_tag_image(&index_image("lib/a", "latest", "sha256:list", vec![amd64(), arm64()]))
            .unwrap();
        store
            .save_tag_image(&index_image("lib/a", "latest", "sha256:list", vec![amd64()]))
            .unwrap();

        assert!(store.get_manifest("sha256:arm").unwrap().is_none());
        assert_eq!(store.list_platform_manifests("sha256:list").unwrap().len(), 1);
        assert_eq!(store.get_manifest("sha256:list").unwrap().unwrap().size_bytes, 10);
    }

    #[test]
    fn test_delete_tag_marks_repository_dirty() {
        let (_temp, store) = open();
        store.save_tag_image(&multi_arch("lib/a", "v1")).unwrap();
        store.refresh_all_dirty().unwrap();

        store.delete_tag("default", "lib/a", "v1").unwrap();
        assert_eq!(store.count_dirty().unwrap().repositories, 1);
        assert!(store.list_tag_digests("default", "lib/a").unwrap().is_empty());
    }

    #[test]
    fn test_delete_repository_cascades() {
        let (_temp, store) = open();
        store.save_tag_image(&multi_arch("lib/a", "v1")).unwrap();
        store.save_tag_image(&multi_arch("lib/b", "v1")).unwrap();
        store.refresh_all_dirty().unwrap();

        assert!(store.delete_repository("default", "lib/a").unwrap());
        assert_eq!(store.list_repository_names("default").unwrap(), ["lib/b"]);
        assert_eq!(count(&store, "tags"), 1);
        assert_eq!(count(&store, "repository_stats"), 1);
        assert_eq!(count(&store, "tag_details"), 1);
        // Still referenced through lib/b.
        assert_eq!(count(&store, "manifests"), 4);

        assert!(store.delete_repository("default", "lib/b").unwrap());
        assert_eq!(count(&store, "manifests"), 0);
        assert!(!store.delete_repository("default", "lib/b").unwrap());
    }

    #[test]
    fn test_ensure_registry_host_change_recreates() {
        let (_temp, store) = open();
        store.save_tag_image(&multi_arch("lib/a", "v1")).unwrap();
        let before = store.ensure_registry("default", "registry.example.com").unwrap();
        assert_eq!(store.list_registries().unwrap().len(), 1);

        let after = store.ensure_registry("default", "mirror.example.com").unwrap();
        assert_ne!(before.id, after.id);
        assert_eq!(after.host, "mirror.example.com");
        assert!(after.last_status.is_none());
        assert_eq!(count(&store, "repositories"), 0);
        assert_eq!(count(&store, "tags"), 0);
        assert_eq!(count(&store, "manifests"), 0);
    }

    #[test]
    fn test_registry_status_and_delete() {
        let (_temp, store) = open();
        store.ensure_registry("default", "a.example.com").unwrap();
        store.ensure_registry("other", "a.example.com").unwrap();

        store.set_registry_status("default", -1).unwrap();
        assert_eq!(store.get_registry("default").unwrap().unwrap().last_status, Some(-1));
        assert!(matches!(store.set_registry_status("missing", 200), Err(Error::NotFound)));

        assert!(store.delete_registry("other").unwrap());
        assert!(!store.delete_registry("other").unwrap());
        assert_eq!(store.list_registries().unwrap().len(), 1);
    }

    #[test]
    fn test_ensure_repository_is_idempotent() {
        let (_temp, store) = open();
        let a = store.ensure_repository("default", "r.example.com", "lib/a").unwrap();
        let b = store.ensure_repository("default", "r.example.com", "lib/a").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list_repository_names("default").unwrap(), ["lib/a"]);
    }

    #[test]
    fn test_labels_round_trip() {
        let (_temp, store) = open();
        let mut manifest = platform("sha256:one", "amd64", "2024-01-01T00:00:00Z", vec![]);
        manifest.labels = Some(serde_json::json!({"maintainer": "ops"}));
        store.save_tag_image(&single_image("lib/a", "v1", manifest)).unwrap();

        let stored = store.get_manifest("sha256:one").unwrap().unwrap();
        assert_eq!(stored.labels, Some(serde_json::json!({"maintainer": "ops"})));
    }
}

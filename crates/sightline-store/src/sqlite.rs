//! SQLite-backed profile store.
//!
//! Samples are stored as little-endian `f32` blobs. Selection rows cascade
//! with their profile and are re-seeded after every profile-list change.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use sightline_core::{Embedding, Profile, SelectionSet};

use crate::{new_profile_id, ProfileStore, ProfileSummary, StoreError};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS profiles (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS samples (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_id    TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    data          BLOB NOT NULL,
    model_version TEXT
);

CREATE INDEX IF NOT EXISTS samples_by_profile ON samples(profile_id, seq);

CREATE TABLE IF NOT EXISTS selection (
    profile_id TEXT PRIMARY KEY REFERENCES profiles(id) ON DELETE CASCADE,
    active     INTEGER NOT NULL DEFAULT 1
);
";

const RESYNC_SELECTION: &str = "
DELETE FROM selection WHERE profile_id NOT IN (SELECT id FROM profiles);
INSERT OR IGNORE INTO selection (profile_id, active) SELECT id, 1 FROM profiles;
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened profile database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(RESYNC_SELECTION)?;
        Ok(Self { conn })
    }

    fn ensure_exists(&self, id: &str) -> Result<(), StoreError> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM profiles WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        found.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn sample_count(&self, id: &str) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM samples WHERE profile_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Load profiles with their samples, optionally restricted to one id.
    fn load(&self, only: Option<&str>) -> Result<Vec<(Profile, DateTime<Utc>)>, StoreError> {
        let (profile_sql, sample_sql) = match only {
            Some(_) => (
                "SELECT id, name, created_at FROM profiles WHERE id = ?1 ORDER BY seq",
                "SELECT profile_id, data, model_version FROM samples WHERE profile_id = ?1 ORDER BY seq",
            ),
            None => (
                "SELECT id, name, created_at FROM profiles ORDER BY seq",
                "SELECT profile_id, data, model_version FROM samples ORDER BY seq",
            ),
        };
        let args: Vec<&str> = only.into_iter().collect();

        let mut out: Vec<(Profile, DateTime<Utc>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        let mut stmt = self.conn.prepare(profile_sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (id, name, created_at) = row?;
            let created_at = parse_timestamp(&created_at)?;
            index.insert(id.clone(), out.len());
            out.push((Profile::new(id, name), created_at));
        }

        let mut stmt = self.conn.prepare(sample_sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        for row in rows {
            let (profile_id, data, model_version) = row?;
            let Some(&slot) = index.get(&profile_id) else {
                continue;
            };
            out[slot].0.samples.push(Embedding {
                values: decode_sample(&data)?,
                model_version,
            });
        }

        Ok(out)
    }
}

impl ProfileStore for SqliteStore {
    fn list(&self) -> Result<Vec<Profile>, StoreError> {
        Ok(self.load(None)?.into_iter().map(|(p, _)| p).collect())
    }

    fn get(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.load(Some(id))?.into_iter().next().map(|(p, _)| p))
    }

    fn summaries(&self) -> Result<Vec<ProfileSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.created_at,
                    (SELECT COUNT(*) FROM samples s WHERE s.profile_id = p.id),
                    COALESCE(sel.active, 1)
             FROM profiles p LEFT JOIN selection sel ON sel.profile_id = p.id
             ORDER BY p.seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, name, created_at, samples, active) = row?;
            out.push(ProfileSummary {
                id,
                name,
                samples: samples as usize,
                active,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(out)
    }

    fn create_profile(&mut self, name: &str) -> Result<Profile, StoreError> {
        let profile = Profile::new(new_profile_id(), name);
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO profiles (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![profile.id, profile.name, Utc::now().to_rfc3339()],
        )?;
        tx.execute_batch(RESYNC_SELECTION)?;
        tx.commit()?;
        tracing::info!(id = %profile.id, name, "profile created");
        Ok(profile)
    }

    fn rename_profile(&mut self, id: &str, name: &str) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("UPDATE profiles SET name = ?2 WHERE id = ?1", params![id, name])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn add_sample(&mut self, id: &str, sample: Embedding) -> Result<usize, StoreError> {
        self.ensure_exists(id)?;
        self.conn.execute(
            "INSERT INTO samples (profile_id, data, model_version) VALUES (?1, ?2, ?3)",
            params![id, encode_sample(&sample.values), sample.model_version],
        )?;
        let count = self.sample_count(id)?;
        tracing::debug!(id, dim = sample.values.len(), count, "sample added");
        Ok(count)
    }

    fn remove_sample(&mut self, id: &str, index: usize) -> Result<Embedding, StoreError> {
        self.ensure_exists(id)?;
        let len = self.sample_count(id)?;
        if index >= len {
            return Err(StoreError::SampleOutOfRange {
                id: id.to_string(),
                index,
                len,
            });
        }

        let (seq, data, model_version): (i64, Vec<u8>, Option<String>) = self.conn.query_row(
            "SELECT seq, data, model_version FROM samples WHERE profile_id = ?1
             ORDER BY seq LIMIT 1 OFFSET ?2",
            params![id, index as i64],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        self.conn.execute("DELETE FROM samples WHERE seq = ?1", params![seq])?;

        Ok(Embedding {
            values: decode_sample(&data)?,
            model_version,
        })
    }

    fn clear_samples(&mut self, id: &str) -> Result<(), StoreError> {
        self.ensure_exists(id)?;
        self.conn
            .execute("DELETE FROM samples WHERE profile_id = ?1", params![id])?;
        Ok(())
    }

    fn delete_profile(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tx.execute_batch(RESYNC_SELECTION)?;
        tx.commit()?;
        tracing::info!(id, "profile deleted");
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("DELETE FROM samples; DELETE FROM profiles;")?;
        tx.execute_batch(RESYNC_SELECTION)?;
        tx.commit()?;
        tracing::info!("all profiles cleared");
        Ok(())
    }

    fn put_profile(&mut self, profile: Profile, created_at: DateTime<Utc>) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE profiles SET name = ?2 WHERE id = ?1",
            params![profile.id, profile.name],
        )?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO profiles (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![profile.id, profile.name, created_at.to_rfc3339()],
            )?;
        } else {
            tx.execute("DELETE FROM samples WHERE profile_id = ?1", params![profile.id])?;
        }
        for sample in &profile.samples {
            tx.execute(
                "INSERT INTO samples (profile_id, data, model_version) VALUES (?1, ?2, ?3)",
                params![profile.id, encode_sample(&sample.values), sample.model_version],
            )?;
        }
        tx.execute_batch(RESYNC_SELECTION)?;
        tx.commit()?;
        Ok(())
    }

    fn selection(&self) -> Result<SelectionSet, StoreError> {
        let mut stmt = self.conn.prepare("SELECT profile_id, active FROM selection")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?;
        let mut set = SelectionSet::new();
        for row in rows {
            let (id, active) = row?;
            set.set(id, active);
        }
        Ok(set)
    }

    fn set_selected(&mut self, id: &str, active: bool) -> Result<(), StoreError> {
        self.ensure_exists(id)?;
        self.conn.execute(
            "INSERT INTO selection (profile_id, active) VALUES (?1, ?2)
             ON CONFLICT(profile_id) DO UPDATE SET active = excluded.active",
            params![id, active],
        )?;
        Ok(())
    }

    fn select_all(&mut self, active: bool) -> Result<(), StoreError> {
        self.conn
            .execute("UPDATE selection SET active = ?1", params![active])?;
        Ok(())
    }
}

fn encode_sample(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_sample(data: &[u8]) -> Result<Vec<f32>, StoreError> {
    if data.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "sample blob of {} bytes is not a whole number of f32 values",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

//! Schema versioning and migrations (spec §4.9 "Schema & migrations").

use rusqlite::Connection;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// One registered schema step. `up`/`down` may each contain multiple
/// semicolon-separated statements; trailing semicolons and `--`/`/* */`
/// comments are tolerated.
pub struct Migration {
    pub version: u32,
    pub up: &'static str,
    pub down: &'static str,
}

/// Split a multi-statement migration script into individual statements,
/// stripping `--` line comments and `/* */` block comments first so a
/// semicolon inside a comment never produces a spurious empty statement.
fn split_statements(sql: &str) -> Vec<String> {
    let mut without_comments = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('-', Some('-')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        without_comments.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => without_comments.push(c),
        }
    }

    without_comments
        .split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Registered migrations, ordered ascending by version, version 0 meaning
/// "no application schema applied yet".
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { migrations }
    }

    pub fn highest_version(&self) -> u32 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    fn current_version(&self, conn: &Connection) -> Result<u32, MigrationError> {
        conn.query_row("SELECT value FROM schema_meta WHERE key = 'schema_version'", [], |row| {
            row.get::<_, String>(0)
        })
        .map(|v| v.parse().unwrap_or(0))
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(0),
            other => Err(other.into()),
        })
    }

    fn set_version(&self, conn: &Connection, version: u32) -> Result<(), MigrationError> {
        conn.execute(
            "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [version.to_string()],
        )?;
        Ok(())
    }

    /// Idempotent: ensures `schema_meta` exists. Safe to call on every
    /// startup regardless of current version.
    pub fn initialize_schema(&self, conn: &Connection) -> Result<(), MigrationError> {
        conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);")?;
        Ok(())
    }

    /// Run `up`s or `down`s to bring the schema to exactly `target`.
    /// Targets above the highest registered version clamp down to it;
    /// `target = 0` runs every registered `down`. Running to the current
    /// version twice in a row is a no-op the second time. A failing step
    /// rolls back and leaves the recorded version unchanged.
    pub fn migrate_to_version(&self, conn: &mut Connection, target: u32) -> Result<u32, MigrationError> {
        self.initialize_schema(conn)?;
        let target = target.min(self.highest_version());
        let current = self.current_version(conn)?;

        if target == current {
            return Ok(current);
        }

        let tx = conn.transaction()?;
        if target > current {
            for migration in self.migrations.iter().filter(|m| m.version > current && m.version <= target) {
                for statement in split_statements(migration.up) {
                    tx.execute_batch(&statement)?;
                }
            }
        } else {
            for migration in self.migrations.iter().filter(|m| m.version <= current && m.version > target).rev() {
                for statement in split_statements(migration.down) {
                    tx.execute_batch(&statement)?;
                }
            }
        }
        tx.execute(
            "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [target.to_string()],
        )?;
        tx.commit()?;
        Ok(target)
    }
}

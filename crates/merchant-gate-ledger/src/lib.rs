//! Back-office ledger for merchant operators.
//!
//! Two small dictionaries keyed by customer address: a set of addresses hidden from
//! the admin view, and one free-text note per address. Nothing here participates in
//! authorization decisions.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::Address;
use dashmap::{DashMap, DashSet};
use rusqlite::OptionalExtension;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt address in ledger: {0}")]
    CorruptAddress(String),
}

/// Storage backend for hidden addresses and notes.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait AdminStore: Send + Sync {
    /// Hide `address`. Returns `false` if it was already hidden.
    fn hide(&self, address: Address) -> Result<bool, LedgerError>;

    /// Unhide `address`. Returns `false` if it was not hidden.
    fn unhide(&self, address: Address) -> Result<bool, LedgerError>;

    fn is_hidden(&self, address: Address) -> Result<bool, LedgerError>;

    /// All hidden addresses, sorted.
    fn hidden(&self) -> Result<Vec<Address>, LedgerError>;

    /// Set the note for `address`. Empty (or whitespace-only) text removes it.
    fn set_note(&self, address: Address, text: &str) -> Result<(), LedgerError>;

    fn note(&self, address: Address) -> Result<Option<String>, LedgerError>;

    /// All notes, sorted by address.
    fn notes(&self) -> Result<BTreeMap<Address, String>, LedgerError>;
}

/// Filter `customers` down to the ones not hidden, preserving order.
pub fn visible_addresses<S: AdminStore + ?Sized>(
    store: &S,
    customers: &[Address],
) -> Result<Vec<Address>, LedgerError> {
    let mut visible = Vec::with_capacity(customers.len());
    for address in customers {
        if !store.is_hidden(*address)? {
            visible.push(*address);
        }
    }
    Ok(visible)
}

/// In-memory store backed by DashMap. Lost on restart.
#[derive(Default)]
pub struct InMemoryAdminStore {
    hidden: DashSet<Address>,
    notes: DashMap<Address, String>,
}

impl InMemoryAdminStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdminStore for InMemoryAdminStore {
    fn hide(&self, address: Address) -> Result<bool, LedgerError> {
        Ok(self.hidden.insert(address))
    }

    fn unhide(&self, address: Address) -> Result<bool, LedgerError> {
        Ok(self.hidden.remove(&address).is_some())
    }

    fn is_hidden(&self, address: Address) -> Result<bool, LedgerError> {
        Ok(self.hidden.contains(&address))
    }

    fn hidden(&self) -> Result<Vec<Address>, LedgerError> {
        let mut all: Vec<Address> = self.hidden.iter().map(|a| *a).collect();
        all.sort();
        Ok(all)
    }

    fn set_note(&self, address: Address, text: &str) -> Result<(), LedgerError> {
        let text = text.trim();
        if text.is_empty() {
            self.notes.remove(&address);
        } else {
            self.notes.insert(address, text.to_string());
        }
        Ok(())
    }

    fn note(&self, address: Address) -> Result<Option<String>, LedgerError> {
        Ok(self.notes.get(&address).map(|n| n.value().clone()))
    }

    fn notes(&self) -> Result<BTreeMap<Address, String>, LedgerError> {
        Ok(self
            .notes
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect())
    }
}

/// Persistent store backed by SQLite. Survives restarts.
pub struct SqliteAdminStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteAdminStore {
    /// Open (or create) the ledger database at `path`.
    ///
    /// On Unix the file is restricted to 0600; customer notes are operator-private.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS hidden_addresses (
                address TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS notes (
                address TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set ledger database file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("ledger mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

// Stored as checksummed hex so the file stays readable with the sqlite3 shell.
fn key(address: Address) -> String {
    address.to_checksum(None)
}

fn parse(raw: String) -> Result<Address, LedgerError> {
    raw.parse().map_err(|_| LedgerError::CorruptAddress(raw))
}

impl AdminStore for SqliteAdminStore {
    fn hide(&self, address: Address) -> Result<bool, LedgerError> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO hidden_addresses (address) VALUES (?1)",
            [key(address)],
        )?;
        Ok(changed > 0)
    }

    fn unhide(&self, address: Address) -> Result<bool, LedgerError> {
        let changed = self
            .conn()
            .execute("DELETE FROM hidden_addresses WHERE address = ?1", [key(address)])?;
        Ok(changed > 0)
    }

    fn is_hidden(&self, address: Address) -> Result<bool, LedgerError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM hidden_addresses WHERE address = ?1",
            [key(address)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn hidden(&self) -> Result<Vec<Address>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT address FROM hidden_addresses")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut all = Vec::new();
        for raw in rows {
            all.push(parse(raw?)?);
        }
        all.sort();
        Ok(all)
    }

    fn set_note(&self, address: Address, text: &str) -> Result<(), LedgerError> {
        let text = text.trim();
        let conn = self.conn();
        if text.is_empty() {
            conn.execute("DELETE FROM notes WHERE address = ?1", [key(address)])?;
        } else {
            conn.execute(
                "INSERT INTO notes (address, body) VALUES (?1, ?2)
                 ON CONFLICT(address) DO UPDATE SET body = excluded.body",
                rusqlite::params![key(address), text],
            )?;
        }
        Ok(())
    }

    fn note(&self, address: Address) -> Result<Option<String>, LedgerError> {
        let body = self
            .conn()
            .query_row("SELECT body FROM notes WHERE address = ?1", [key(address)], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(body)
    }

    fn notes(&self) -> Result<BTreeMap<Address, String>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT address, body FROM notes")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut all = BTreeMap::new();
        for row in rows {
            let (raw, body) = row?;
            all.insert(parse(raw)?, body);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Address = Address::new([0x01; 20]);
    const B: Address = Address::new([0x02; 20]);
    const C: Address = Address::new([0x03; 20]);

    fn sqlite_store(dir: &tempfile::TempDir) -> SqliteAdminStore {
        let path = dir.path().join("ledger.db");
        SqliteAdminStore::open(path.to_str().unwrap()).unwrap()
    }

    fn exercise(store: &dyn AdminStore) {
        assert!(store.hide(B).unwrap());
        assert!(!store.hide(B).unwrap());
        assert!(store.is_hidden(B).unwrap());
        assert!(!store.is_hidden(A).unwrap());
        assert_eq!(store.hidden().unwrap(), vec![B]);

        assert_eq!(visible_addresses(store, &[C, B, A]).unwrap(), vec![C, A]);

        assert!(store.unhide(B).unwrap());
        assert!(!store.unhide(B).unwrap());
        assert!(store.hidden().unwrap().is_empty());

        store.set_note(A, "  paid by wire  ").unwrap();
        assert_eq!(store.note(A).unwrap().as_deref(), Some("paid by wire"));
        store.set_note(A, "refunded").unwrap();
        assert_eq!(store.note(A).unwrap().as_deref(), Some("refunded"));
        store.set_note(C, "vip").unwrap();
        assert_eq!(store.notes().unwrap().keys().copied().collect::<Vec<_>>(), vec![A, C]);

        store.set_note(A, "   ").unwrap();
        assert_eq!(store.note(A).unwrap(), None);
        assert_eq!(store.notes().unwrap().len(), 1);
    }

    #[test]
    fn test_in_memory_store() {
        exercise(&InMemoryAdminStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&sqlite_store(&dir));
    }

    #[test]
    fn test_sqlite_store_persists() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = sqlite_store(&dir);
            store.hide(A).unwrap();
            store.set_note(B, "follow up").unwrap();
        }

        {
            let store = sqlite_store(&dir);
            assert!(store.is_hidden(A).unwrap());
            assert_eq!(store.note(B).unwrap().as_deref(), Some("follow up"));
        }
    }

    #[test]
    fn test_sqlite_store_rejects_corrupt_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir);
        store
            .conn()
            .execute("INSERT INTO hidden_addresses (address) VALUES ('not-an-address')", [])
            .unwrap();

        assert!(matches!(store.hidden(), Err(LedgerError::CorruptAddress(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_sqlite_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let _store = sqlite_store(&dir);
        let mode = std::fs::metadata(dir.path().join("ledger.db"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

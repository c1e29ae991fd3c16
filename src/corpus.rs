//! SQLite-backed corpus access.
//!
//! Two read-only lookup surfaces ride on one connection pool: per-language
//! n-gram statistics ([`NgramCorpus`]) and per-user declared languages
//! ([`UserLanguageIndex`]). The corpus is produced offline by the
//! `build-corpus` tool; the service never writes to it.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OpenFlags};
use thiserror::Error;

/// Storage-level failure surfaced by corpus access.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open corpus database: {0}")]
    Open(#[source] rusqlite::Error),
    #[error("corpus query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// The n-gram sizes the corpus is built for, and the table each maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NgramSize {
    Two,
    Three,
    Five,
}

impl NgramSize {
    /// Window length in grapheme clusters.
    pub fn width(self) -> usize {
        match self {
            NgramSize::Two => 2,
            NgramSize::Three => 3,
            NgramSize::Five => 5,
        }
    }

    fn select_sql(self) -> &'static str {
        match self {
            NgramSize::Two => "SELECT lang, hit, percent FROM grams2 WHERE gram = ?1",
            NgramSize::Three => "SELECT lang, hit, percent FROM grams3 WHERE gram = ?1",
            NgramSize::Five => "SELECT lang, hit, percent FROM grams5 WHERE gram = ?1",
        }
    }
}

/// One per-language statistics row for a gram.
#[derive(Debug, Clone, PartialEq)]
pub struct GramEntry {
    /// ISO-639-3 code of the language.
    pub lang: String,
    /// Occurrences of the gram in this language's corpus portion.
    pub hit: u32,
    /// Share of the gram among all grams of its size in this language,
    /// in `[0, 1]`.
    pub percent: f32,
}

/// Fixed-size round-robin pool of SQLite connections.
///
/// The corpus is read-only in steady state, so every connection can serve
/// lookups concurrently; each sits behind its own mutex.
pub struct CorpusPool {
    connections: Vec<Arc<Mutex<Connection>>>,
    next: AtomicUsize,
}

impl CorpusPool {
    pub const DEFAULT_SIZE: usize = 4;

    /// Open the corpus database read-only with [`Self::DEFAULT_SIZE`]
    /// connections.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_sized(path, Self::DEFAULT_SIZE)
    }

    /// Open the corpus database read-only with `size` connections.
    pub fn open_sized(path: &Path, size: usize) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(path, flags).map_err(StoreError::Open)?;
            connections.push(Arc::new(Mutex::new(conn)));
        }
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    /// Single-connection read-write pool over a fresh in-memory database,
    /// for tests and seeding.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Open)?;
        Ok(Self {
            connections: vec![Arc::new(Mutex::new(conn))],
            next: AtomicUsize::new(0),
        })
    }

    /// Borrow a connection, round-robin.
    pub fn connection(&self) -> PooledConnection {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        PooledConnection {
            conn: Arc::clone(&self.connections[idx]),
        }
    }
}

/// A connection borrowed from the pool.
pub struct PooledConnection {
    conn: Arc<Mutex<Connection>>,
}

impl PooledConnection {
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Create the corpus tables.
///
/// The service opens the database read-only; this is for the `build-corpus`
/// tool and for tests that seed their own corpus.
pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS grams2 (
            gram TEXT NOT NULL,
            lang TEXT NOT NULL,
            hit INTEGER NOT NULL,
            percent REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (gram, lang)
        );
        CREATE TABLE IF NOT EXISTS grams3 (
            gram TEXT NOT NULL,
            lang TEXT NOT NULL,
            hit INTEGER NOT NULL,
            percent REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (gram, lang)
        );
        CREATE TABLE IF NOT EXISTS grams5 (
            gram TEXT NOT NULL,
            lang TEXT NOT NULL,
            hit INTEGER NOT NULL,
            percent REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (gram, lang)
        );
        CREATE TABLE IF NOT EXISTS users_langs (
            user TEXT NOT NULL,
            lang TEXT NOT NULL,
            total INTEGER NOT NULL DEFAULT 0
        );",
    )
}

/// Read-only lookup of per-language statistics for a gram of a given size.
#[derive(Clone)]
pub struct NgramCorpus {
    pool: Arc<CorpusPool>,
}

impl NgramCorpus {
    pub fn new(pool: Arc<CorpusPool>) -> Self {
        Self { pool }
    }

    /// All `(lang, hit, percent)` rows for `gram` at `size`.
    ///
    /// A gram absent from the corpus yields an empty vec, not an error.
    pub fn lookup(&self, size: NgramSize, gram: &str) -> Result<Vec<GramEntry>, StoreError> {
        let pooled = self.pool.connection();
        let conn = pooled.lock();
        let mut stmt = conn.prepare_cached(size.select_sql())?;
        let entries = stmt
            .query_map(params![gram], |row| {
                Ok(GramEntry {
                    lang: row.get(0)?,
                    hit: row.get(1)?,
                    percent: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Languages a user has declared, used to narrow detection candidates.
#[derive(Clone)]
pub struct UserLanguageIndex {
    pool: Arc<CorpusPool>,
}

impl UserLanguageIndex {
    pub fn new(pool: Arc<CorpusPool>) -> Self {
        Self { pool }
    }

    /// The set of languages declared by `user`; empty for the empty or an
    /// unknown user.
    ///
    /// Storage failures degrade to the empty set: the filter is a best-effort
    /// aid, never a correctness gate.
    pub fn langs(&self, user: &str) -> BTreeSet<String> {
        if user.is_empty() {
            return BTreeSet::new();
        }
        match self.query_langs(user) {
            Ok(langs) => langs,
            Err(err) => {
                tracing::warn!(user, error = %err, "user language lookup failed, detecting unfiltered");
                BTreeSet::new()
            }
        }
    }

    fn query_langs(&self, user: &str) -> Result<BTreeSet<String>, StoreError> {
        let pooled = self.pool.connection();
        let conn = pooled.lock();
        let mut stmt = conn.prepare_cached("SELECT lang FROM users_langs WHERE user = ?1")?;
        let langs = stmt
            .query_map(params![user], |row| row.get(0))?
            .collect::<Result<BTreeSet<String>, _>>()?;
        Ok(langs)
    }
}

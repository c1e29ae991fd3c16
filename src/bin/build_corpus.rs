//! Offline corpus builder.
//!
//! Reads a tab-separated sentence dump (`sentence id, language, text,
//! username` per line) and produces the corpus database the service serves
//! from: per-language n-gram hit counts and in-language frequencies for
//! sizes 2, 3 and 5, plus the per-user language table. Sentences are
//! segmented into grapheme clusters exactly the way the service segments
//! queries, so corpus and detector always agree on what a character is.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use rusqlite::{params, Connection};
use tracing_subscriber::EnvFilter;

use langid::corpus::create_schema;
use langid::segment;

/// Ideogram-based languages produce far more distinct n-grams, so their
/// grams clear a lower frequency floor.
const IDEOGRAM_LANGS: [&str; 3] = ["cmn", "wuu", "yue"];
const IDEOGRAM_FREQ_LIMIT: f64 = 0.000_005;
const FREQ_LIMIT: f64 = 0.000_01;

/// Minimum contribution weight before a user is recorded as writing a
/// language.
const MIN_USER_CONTRIB: i64 = 100;

const SIZED_TABLES: [(usize, &str); 3] = [(2, "grams2"), (3, "grams3"), (5, "grams5")];

/// Sentences carrying this tag are excluded from counting.
const CHANGE_FLAG_TAG: &str = "@change flag";

#[derive(Debug, Parser)]
#[command(name = "build-corpus", version, about)]
struct Args {
    /// Tab-separated sentence dump: id, lang, text, username.
    sentences: PathBuf,

    /// Output database (replaced if it already exists).
    database: PathBuf,

    /// Optional tag dump (id, tag per line); sentences tagged "@change flag"
    /// are skipped.
    #[arg(long)]
    tags: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "build_corpus=info".into()),
        )
        .init();

    run(&Args::parse())
}

fn run(args: &Args) -> anyhow::Result<()> {
    let blacklist = match &args.tags {
        Some(path) => flagged_sentences(path, CHANGE_FLAG_TAG)?,
        None => HashSet::new(),
    };
    if !blacklist.is_empty() {
        tracing::info!(sentences = blacklist.len(), "excluding flagged sentences");
    }

    if args.database.exists() {
        tracing::warn!(database = %args.database.display(), "replacing existing corpus database");
        std::fs::remove_file(&args.database)
            .with_context(|| format!("failed to remove {}", args.database.display()))?;
    }

    let mut conn = Connection::open(&args.database)
        .with_context(|| format!("failed to create {}", args.database.display()))?;
    conn.execute_batch("PRAGMA journal_mode=MEMORY; PRAGMA temp_store=MEMORY;")?;
    create_schema(&conn)?;

    for (size, table) in SIZED_TABLES {
        build_size(&mut conn, &args.sentences, size, table, &blacklist)?;
    }
    build_users(&mut conn, &args.sentences, &blacklist)?;

    tracing::info!(database = %args.database.display(), "corpus build complete");
    Ok(())
}

/// One pass over the dump for one n-gram size: count hits per language,
/// normalise to in-language frequencies, and keep the rows above the floor.
fn build_size(
    conn: &mut Connection,
    sentences: &Path,
    size: usize,
    table: &str,
    blacklist: &HashSet<i64>,
) -> anyhow::Result<()> {
    tracing::info!(size, "counting n-grams");

    let mut counts: HashMap<String, HashMap<String, i64>> = HashMap::new();
    for_each_sentence(sentences, blacklist, |sentence| {
        let clusters = segment::clusters(&sentence.text);
        let by_gram = counts.entry(sentence.lang.clone()).or_default();
        for gram in segment::ngrams(&clusters, size) {
            *by_gram.entry(gram).or_insert(0) += 1;
        }
    })?;

    let mut kept = 0i64;
    let mut dropped = 0i64;
    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare(&format!("INSERT INTO {table} VALUES (?1, ?2, ?3, ?4)"))?;
        for (lang, by_gram) in &counts {
            let total: i64 = by_gram.values().sum();
            let floor = freq_floor(lang);
            for (gram, hits) in by_gram {
                let percent = *hits as f64 / total as f64;
                if percent > floor {
                    insert.execute(params![gram, lang, hits, percent])?;
                    kept += 1;
                } else {
                    dropped += 1;
                }
            }
        }
    }
    tx.commit()?;

    tracing::info!(size, kept, dropped, "wrote n-gram table");
    Ok(())
}

/// Score user contributions per language and keep the pairs above the
/// threshold.
fn build_users(
    conn: &mut Connection,
    sentences: &Path,
    blacklist: &HashSet<i64>,
) -> anyhow::Result<()> {
    tracing::info!("scoring user contributions");

    let mut scores: HashMap<(String, String), i64> = HashMap::new();
    for_each_sentence(sentences, blacklist, |sentence| {
        if sentence.user.is_empty() || sentence.user == "\\N" {
            return;
        }
        let weight = segment::clusters(&sentence.text).len() as i64;
        *scores
            .entry((sentence.user.clone(), sentence.lang.clone()))
            .or_insert(0) += weight;
    })?;

    let mut kept = 0i64;
    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare("INSERT INTO users_langs VALUES (?1, ?2, ?3)")?;
        for ((user, lang), total) in &scores {
            if *total > MIN_USER_CONTRIB {
                insert.execute(params![user, lang, total])?;
                kept += 1;
            }
        }
    }
    tx.commit()?;

    tracing::info!(kept, "wrote user language table");
    Ok(())
}

fn freq_floor(lang: &str) -> f64 {
    if IDEOGRAM_LANGS.contains(&lang) {
        IDEOGRAM_FREQ_LIMIT
    } else {
        FREQ_LIMIT
    }
}

struct Sentence {
    id: i64,
    lang: String,
    text: String,
    user: String,
}

impl Sentence {
    /// Parse one dump line. Lines with too few fields or an unset language
    /// (`\N` or empty) yield `None`.
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        let id = fields.next()?.parse().ok()?;
        let lang = fields.next()?;
        let text = fields.next()?;
        let user = fields.next()?;
        if lang.is_empty() || lang == "\\N" {
            return None;
        }
        Some(Self {
            id,
            lang: lang.to_string(),
            text: text.to_string(),
            user: user.to_string(),
        })
    }
}

fn for_each_sentence(
    path: &Path,
    blacklist: &HashSet<i64>,
    mut visit: impl FnMut(&Sentence),
) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line
            .with_context(|| format!("failed reading {} at line {}", path.display(), line_no + 1))?;
        let Some(sentence) = Sentence::parse(&line) else {
            tracing::debug!(line = line_no + 1, "skipping unusable line");
            continue;
        };
        if blacklist.contains(&sentence.id) {
            continue;
        }
        visit(&sentence);
    }
    Ok(())
}

/// Sentence ids carrying `tag` in a (id, tag) tab-separated dump.
fn flagged_sentences(path: &Path, tag: &str) -> anyhow::Result<HashSet<i64>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut flagged = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let mut fields = line.split('\t');
        let (Some(id), Some(line_tag)) = (fields.next(), fields.next()) else {
            continue;
        };
        if line_tag == tag {
            if let Ok(id) = id.parse() {
                flagged.insert(id);
            }
        }
    }
    Ok(flagged)
}

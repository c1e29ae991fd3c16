//! The detection engine: per-size scoring and the size-fallback cascade.
//!
//! Scoring runs over one n-gram size at a time. Each gram found in the corpus
//! contributes its raw hit count to an absolute score and its in-language
//! frequency to a relative score; grams matched by exactly one candidate
//! language earn a heavily weighted bonus on both, since they are the
//! strongest evidence available. Larger n-grams discriminate better when they
//! match at all, so sizes are tried largest first.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::corpus::{NgramCorpus, NgramSize, StoreError, UserLanguageIndex};
use crate::segment;

/// Outcome of one detection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// ISO-639-3 code of the detected language.
    Lang(String),
    /// No usable n-gram evidence at any size.
    Unknown,
    /// A corpus lookup failed mid-detection.
    Error,
}

impl Detection {
    /// Wire representation: the lang code or one of the two sentinels.
    pub fn as_str(&self) -> &str {
        match self {
            Detection::Lang(code) => code,
            Detection::Unknown => "unknown",
            Detection::Error => "error",
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one scoring attempt at a single size.
enum SizeOutcome {
    Detected(String),
    Unknown,
}

/// Per-language accumulator for one scoring attempt.
#[derive(Debug, Default)]
struct LangScore {
    /// Raw hit counts, plus the quadratic bonus on unique grams.
    abs: u64,
    /// In-language frequencies, plus the bonus on unique grams.
    rel: f64,
    /// Grams matched by this language alone.
    unique_hits: u32,
}

/// Statistical language detector over the n-gram corpus.
pub struct Detector {
    corpus: NgramCorpus,
    users: UserLanguageIndex,
}

impl Detector {
    pub fn new(corpus: NgramCorpus, users: UserLanguageIndex) -> Self {
        Self { corpus, users }
    }

    /// Detect the most probable language of `query`.
    ///
    /// The user's declared languages filter the size-5 and size-3 attempts;
    /// the final size-2 attempt runs unfiltered to maximise recall on short
    /// or rare inputs. A storage failure at any point short-circuits to
    /// [`Detection::Error`].
    pub fn detect(&self, query: &str, user: &str) -> Detection {
        let filter = self.users.langs(user);

        for size in [NgramSize::Five, NgramSize::Three] {
            match self.score_at_size(query, size, &filter) {
                Ok(SizeOutcome::Detected(lang)) => return Detection::Lang(lang),
                Ok(SizeOutcome::Unknown) => {}
                Err(err) => {
                    tracing::error!(size = size.width(), error = %err, "corpus lookup failed");
                    return Detection::Error;
                }
            }
        }

        match self.score_at_size(query, NgramSize::Two, &BTreeSet::new()) {
            Ok(SizeOutcome::Detected(lang)) => Detection::Lang(lang),
            Ok(SizeOutcome::Unknown) => Detection::Unknown,
            Err(err) => {
                tracing::error!(size = 2, error = %err, "corpus lookup failed");
                Detection::Error
            }
        }
    }

    /// Score `query` at one n-gram size against the allowed languages.
    ///
    /// An empty `filter` allows every language.
    fn score_at_size(
        &self,
        query: &str,
        size: NgramSize,
        filter: &BTreeSet<String>,
    ) -> Result<SizeOutcome, StoreError> {
        let clusters = segment::clusters(query);
        let mut board: BTreeMap<String, LangScore> = BTreeMap::new();

        for gram in segment::ngrams(&clusters, size.width()) {
            let entries = self.corpus.lookup(size, &gram)?;
            let matched: Vec<_> = entries
                .iter()
                .filter(|entry| filter.is_empty() || filter.contains(&entry.lang))
                .collect();

            for entry in &matched {
                let score = board.entry(entry.lang.clone()).or_default();
                score.abs += u64::from(entry.hit);
                score.rel += f64::from(entry.percent);
            }

            // A gram seen in exactly one allowed language is the strongest
            // signal for that language.
            if let [only] = matched.as_slice() {
                let hit = u64::from(only.hit);
                let percent = f64::from(only.percent);
                let score = board.entry(only.lang.clone()).or_default();
                score.unique_hits += 1;
                score.abs += hit * hit * 100;
                score.rel += percent * (1.0 + percent) * 100.0;
            }
        }

        // If a single language holds all the unique-gram credit, it wins
        // outright.
        let mut with_unique = board.iter().filter(|(_, score)| score.unique_hits > 0);
        if let (Some((lang, _)), None) = (with_unique.next(), with_unique.next()) {
            return Ok(SizeOutcome::Detected(lang.clone()));
        }

        match cross_ratio_pick(&board) {
            Some(lang) => Ok(SizeOutcome::Detected(lang)),
            None => Ok(SizeOutcome::Unknown),
        }
    }
}

/// Cross-ratio tiebreak between the absolute and relative rankings.
///
/// Of the two front-runners, each is measured by how badly it trails in the
/// other metric; the one that loses less is kept. Argmax ties keep the first
/// language in lexicographic order. Returns `None` for an empty board.
fn cross_ratio_pick(board: &BTreeMap<String, LangScore>) -> Option<String> {
    let mut abs_best: Option<(&String, &LangScore)> = None;
    let mut rel_best: Option<(&String, &LangScore)> = None;
    for (lang, score) in board {
        match abs_best {
            Some((_, best)) if best.abs >= score.abs => {}
            _ => abs_best = Some((lang, score)),
        }
        match rel_best {
            Some((_, best)) if best.rel >= score.rel => {}
            _ => rel_best = Some((lang, score)),
        }
    }
    let (abs_lang, abs_score) = abs_best?;
    let (rel_lang, rel_score) = rel_best?;

    let ratio_abs = if rel_score.abs > 0 {
        abs_score.abs as f64 / rel_score.abs as f64
    } else {
        f64::INFINITY
    };
    let ratio_rel = if abs_score.rel > 0.0 {
        rel_score.rel / abs_score.rel
    } else {
        f64::INFINITY
    };

    if ratio_abs > ratio_rel {
        Some(abs_lang.clone())
    } else {
        Some(rel_lang.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{create_schema, CorpusPool};
    use rusqlite::params;
    use std::sync::Arc;

    /// Seed a detector from `(table, gram, lang, hit, percent)` rows and
    /// `(user, lang)` declarations.
    fn seeded(rows: &[(&str, &str, &str, u32, f64)], users: &[(&str, &str)]) -> Detector {
        let pool = CorpusPool::in_memory().expect("in-memory pool");
        {
            let pooled = pool.connection();
            let conn = pooled.lock();
            create_schema(&conn).expect("schema");
            for (table, gram, lang, hit, percent) in rows {
                conn.execute(
                    &format!("INSERT INTO {table} VALUES (?1, ?2, ?3, ?4)"),
                    params![gram, lang, hit, percent],
                )
                .expect("seed gram row");
            }
            for (user, lang) in users {
                conn.execute(
                    "INSERT INTO users_langs VALUES (?1, ?2, 1000)",
                    params![user, lang],
                )
                .expect("seed user row");
            }
        }
        let pool = Arc::new(pool);
        Detector::new(
            NgramCorpus::new(Arc::clone(&pool)),
            UserLanguageIndex::new(pool),
        )
    }

    #[test]
    fn unique_gram_shortcut_at_size_5() {
        let detector = seeded(&[("grams5", "hello", "eng", 10, 0.02)], &[]);
        assert_eq!(
            detector.detect("hello there", ""),
            Detection::Lang("eng".into())
        );
    }

    #[test]
    fn single_grapheme_query_is_unknown() {
        let detector = seeded(&[("grams2", "ab", "eng", 10, 0.5)], &[]);
        assert_eq!(detector.detect("a", ""), Detection::Unknown);
        assert_eq!(detector.detect("a", "anyone"), Detection::Unknown);
    }

    #[test]
    fn empty_query_is_unknown() {
        let detector = seeded(&[], &[]);
        assert_eq!(detector.detect("", ""), Detection::Unknown);
    }

    #[test]
    fn size_2_fallback_picks_dominant_language() {
        // Nothing at sizes 5 and 3; one shared bigram split 60/40.
        let detector = seeded(
            &[
                ("grams2", "bo", "fra", 60, 0.6),
                ("grams2", "bo", "ita", 40, 0.4),
            ],
            &[],
        );
        assert_eq!(detector.detect("bo", ""), Detection::Lang("fra".into()));
    }

    #[test]
    fn filtered_sizes_fall_through_to_unfiltered_size_2() {
        // The user only declares deu, which never matches; the size-2 pass
        // drops the filter and still finds eng.
        let detector = seeded(
            &[
                ("grams5", "hello", "eng", 10, 0.02),
                ("grams2", "he", "eng", 5, 0.1),
            ],
            &[("u", "deu")],
        );
        assert_eq!(
            detector.detect("hello there", "u"),
            Detection::Lang("eng".into())
        );
    }

    #[test]
    fn filter_narrows_unique_matches() {
        // Unfiltered, "hello" is ambiguous between eng and deu; for a user
        // who declares deu alone it becomes a unique match.
        let detector = seeded(
            &[
                ("grams5", "hello", "eng", 10, 0.02),
                ("grams5", "hello", "deu", 5, 0.01),
            ],
            &[("u", "deu")],
        );
        assert_eq!(
            detector.detect("hello there", "u"),
            Detection::Lang("deu".into())
        );
    }

    #[test]
    fn filter_keeps_language_the_engine_would_pick() {
        let detector = seeded(
            &[("grams5", "hello", "eng", 10, 0.02)],
            &[("u", "eng"), ("u", "fra")],
        );
        assert_eq!(
            detector.detect("hello there", "u"),
            Detection::Lang("eng".into())
        );
    }

    #[test]
    fn lookup_failure_is_error_and_stops_the_cascade() {
        // grams5 is missing entirely, so the very first size-5 lookup fails.
        // The matching grams3 rows must never be consulted.
        let pool = CorpusPool::in_memory().expect("in-memory pool");
        {
            let pooled = pool.connection();
            let conn = pooled.lock();
            conn.execute_batch(
                "CREATE TABLE grams3 (
                    gram TEXT NOT NULL,
                    lang TEXT NOT NULL,
                    hit INTEGER NOT NULL,
                    percent REAL NOT NULL DEFAULT 0,
                    PRIMARY KEY (gram, lang)
                );
                CREATE TABLE grams2 (
                    gram TEXT NOT NULL,
                    lang TEXT NOT NULL,
                    hit INTEGER NOT NULL,
                    percent REAL NOT NULL DEFAULT 0,
                    PRIMARY KEY (gram, lang)
                );
                CREATE TABLE users_langs (
                    user TEXT NOT NULL,
                    lang TEXT NOT NULL,
                    total INTEGER NOT NULL DEFAULT 0
                );
                INSERT INTO grams3 VALUES ('hel', 'eng', 50, 0.3);",
            )
            .expect("partial schema");
        }
        let pool = Arc::new(pool);
        let detector = Detector::new(
            NgramCorpus::new(Arc::clone(&pool)),
            UserLanguageIndex::new(pool),
        );
        assert_eq!(detector.detect("hello there", ""), Detection::Error);
    }

    #[test]
    fn cross_ratio_prefers_relative_winner_when_absolute_lead_is_smaller() {
        // abs: x=100, y=80; rel: x=0.3, y=0.5.
        // ratio_abs = 100/80 = 1.25, ratio_rel = 0.5/0.3 ~= 1.67 => y.
        let detector = seeded(
            &[
                ("grams2", "ab", "xxx", 100, 0.3),
                ("grams2", "ab", "yyy", 80, 0.5),
            ],
            &[],
        );
        assert_eq!(detector.detect("ab", ""), Detection::Lang("yyy".into()));
    }

    #[test]
    fn cross_ratio_prefers_absolute_winner_when_its_lead_is_bigger() {
        // ratio_abs = 100/80 = 1.25, ratio_rel = 0.45/0.4 = 1.125 => x.
        let detector = seeded(
            &[
                ("grams2", "ab", "xxx", 100, 0.4),
                ("grams2", "ab", "yyy", 80, 0.45),
            ],
            &[],
        );
        assert_eq!(detector.detect("ab", ""), Detection::Lang("xxx".into()));
    }

    #[test]
    fn exact_ties_resolve_to_lexicographically_first_language() {
        let detector = seeded(
            &[
                ("grams2", "ab", "bbb", 10, 0.2),
                ("grams2", "ab", "aaa", 10, 0.2),
            ],
            &[],
        );
        assert_eq!(detector.detect("ab", ""), Detection::Lang("aaa".into()));
    }

    #[test]
    fn unique_bonus_outweighs_shared_volume() {
        // eng has far more volume but only ever co-occurs with fra; the one
        // gram unique to fra gives it sole unique credit, so the shortcut
        // fires in fra's favour.
        let detector = seeded(
            &[
                ("grams2", "ab", "eng", 500, 0.4),
                ("grams2", "ab", "fra", 2, 0.1),
                ("grams2", "bc", "fra", 3, 0.1),
            ],
            &[],
        );
        assert_eq!(detector.detect("abc", ""), Detection::Lang("fra".into()));
    }

    #[test]
    fn two_unique_languages_disable_the_shortcut() {
        // Each language owns one gram outright, so the shortcut cannot fire
        // and the bonus-weighted scores decide.
        let detector = seeded(
            &[
                ("grams2", "ab", "fra", 2, 0.1),
                ("grams2", "cd", "ita", 100, 0.9),
            ],
            &[],
        );
        // ita: abs = 100 + 100*100*100, rel = 0.9 + 0.9*1.9*100; both maxima.
        assert_eq!(detector.detect("abcd", ""), Detection::Lang("ita".into()));
    }

    #[test]
    fn detection_is_repeatable() {
        let detector = seeded(
            &[
                ("grams2", "bo", "fra", 60, 0.6),
                ("grams2", "bo", "ita", 40, 0.4),
            ],
            &[],
        );
        let first = detector.detect("bonjour", "");
        for _ in 0..5 {
            assert_eq!(detector.detect("bonjour", ""), first);
        }
    }
}

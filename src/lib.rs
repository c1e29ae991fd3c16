//! # langid
//!
//! Statistical language identification over a corpus of character n-grams.
//!
//! Given a short piece of text, the service ranks languages by how well the
//! text's 2-, 3- and 5-grapheme n-grams match a precomputed multilingual
//! corpus held in SQLite, and answers with an ISO-639-3 code. A user's
//! declared languages can narrow the candidate set.
//!
//! ## Modules
//! - [`segment`]: grapheme-cluster segmentation and n-gram windows
//! - [`corpus`]: read-only SQLite lookup of the n-gram and user tables
//! - [`detector`]: scoring, the uniqueness shortcut, and the size cascade
//! - [`server`]: the axum HTTP binding
//! - [`config`]: TOML configuration

pub mod config;
pub mod corpus;
pub mod detector;
pub mod segment;
pub mod server;

pub use config::ServerConfig;
pub use corpus::{CorpusPool, GramEntry, NgramCorpus, NgramSize, StoreError, UserLanguageIndex};
pub use detector::{Detection, Detector};
pub use server::{build_router, serve, AppState};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Repairs and audits corrupted conversation logs: orphaned records,
/// duplicate tool replies, and side-thread branches.
#[derive(Debug, Parser)]
#[command(name = "chronicle", about, version)]
pub struct Cli {
    /// Path to a TOML config file (falls back to `CHRONICLE_CONFIG`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Persistence backend: `rewrite` (in-place JSONL) or `event_store`
    /// (append-only log, default).
    #[arg(long, global = true)]
    pub provider: Option<String>,

    #[arg(long, global = true)]
    pub min_similarity_score: Option<f64>,

    #[arg(long, global = true)]
    pub top_k_candidates: Option<usize>,

    #[arg(long, global = true)]
    pub undo_stack_depth: Option<usize>,

    #[arg(long, global = true)]
    pub oversize_record_bytes: Option<usize>,

    /// Directory containing `<session>.jsonl` session files.
    #[arg(long, global = true)]
    pub session_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub backup_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Root directory the event store writes `<session>.events.jsonl`
    /// under, when `--provider event_store` is active.
    #[arg(long, global = true)]
    pub event_store_endpoint: Option<PathBuf>,

    #[arg(long, global = true)]
    pub operator_id: Option<String>,

    /// Emit structured JSON instead of human-readable text.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Report orphans, duplicate tool replies, and corruption scores.
    Scan { #[arg(long)] session: String },

    /// List ranked repair proposals for every orphan in a session.
    ProposeFixes { #[arg(long)] session: String },

    /// Apply the top-ranked proposal for a single orphaned record.
    Apply {
        #[arg(long)]
        session: String,
        #[arg(long)]
        target: String,
    },

    /// Remove duplicate tool-reply blocks from every record in a session.
    Dedupe { #[arg(long)] session: String },

    /// Undo the most recently applied repair for a session.
    Undo { #[arg(long)] session: String },

    /// List applied repairs for a session.
    History { #[arg(long)] session: String },

    /// Recompute event digests and compare the materialized cache
    /// against a fresh replay.
    VerifyIntegrity { #[arg(long)] session: String },

    /// Print the current DAG view (roots, orphans, thread tags).
    CurrentView { #[arg(long)] session: String },
}

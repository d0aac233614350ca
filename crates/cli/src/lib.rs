//! vbox CLI -- generate and verify transactional histories.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use vbox_core::history::types::Transaction;
use vbox_core::options::{Construction, Options, Prune, Storage, Update};
use vbox_testgen::generator::GeneratedHistory;

#[derive(Debug, Parser)]
#[command(
    name = "vbox",
    about = "Offline strict serializability checking for transactional histories"
)]
pub struct App {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate random strictly serializable histories
    Generate(GenerateArgs),
    /// Verify histories stored as JSON
    Verify(VerifyArgs),
}

#[derive(Debug, Parser)]
pub struct GenerateArgs {
    /// Number of histories to generate
    #[arg(long)]
    pub n_hist: u64,
    /// Number of nodes (sessions)
    #[arg(long)]
    pub n_node: u64,
    /// Number of keys
    #[arg(long)]
    pub n_var: u64,
    /// Number of transactions per node
    #[arg(long)]
    pub n_txn: u64,
    /// Number of operations per transaction
    #[arg(long)]
    pub n_evt: u64,
    /// Number of distinct values written
    #[arg(long, default_value_t = 16)]
    pub n_value: u64,
    /// Output directory for generated history files
    #[arg(long)]
    pub output_dir: PathBuf,
}

#[derive(Debug, Parser)]
pub struct VerifyArgs {
    /// History JSON file, or a directory of them
    pub input: PathBuf,
    #[arg(long, value_enum, default_value_t = StorageArg::Interval)]
    pub storage: StorageArg,
    #[arg(long, value_enum, default_value_t = ConstructionArg::PurdomInterval)]
    pub construction: ConstructionArg,
    #[arg(long, value_enum, default_value_t = UpdateArg::ItalianoInterval)]
    pub update: UpdateArg,
    #[arg(long, value_enum, default_value_t = PruneArg::Incremental)]
    pub prune: PruneArg,
    /// Keep item constraints over the same pair of writers apart
    #[arg(long)]
    pub no_merge: bool,
    /// Print the serial order and statistics on PASS
    #[arg(long)]
    pub verbose: bool,
    /// Output results as JSON (one object per file)
    #[arg(long)]
    pub json: bool,
}

impl VerifyArgs {
    #[must_use]
    pub fn options(&self) -> Options {
        Options {
            storage: self.storage.into(),
            construction: self.construction.into(),
            update: self.update.into(),
            prune: self.prune.into(),
            merge: !self.no_merge,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StorageArg {
    Dense,
    Sparse,
    Interval,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConstructionArg {
    Warshall,
    Italiano,
    ItalianoInterval,
    Purdom,
    PurdomInterval,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UpdateArg {
    Warshall,
    Italiano,
    ItalianoInterval,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PruneArg {
    Incremental,
    Rescan,
    Disabled,
}

impl From<StorageArg> for Storage {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::Dense => Self::Dense,
            StorageArg::Sparse => Self::Sparse,
            StorageArg::Interval => Self::Interval,
        }
    }
}

impl From<ConstructionArg> for Construction {
    fn from(arg: ConstructionArg) -> Self {
        match arg {
            ConstructionArg::Warshall => Self::Warshall,
            ConstructionArg::Italiano => Self::Italiano,
            ConstructionArg::ItalianoInterval => Self::ItalianoInterval,
            ConstructionArg::Purdom => Self::Purdom,
            ConstructionArg::PurdomInterval => Self::PurdomInterval,
        }
    }
}

impl From<UpdateArg> for Update {
    fn from(arg: UpdateArg) -> Self {
        match arg {
            UpdateArg::Warshall => Self::Warshall,
            UpdateArg::Italiano => Self::Italiano,
            UpdateArg::ItalianoInterval => Self::ItalianoInterval,
        }
    }
}

impl From<PruneArg> for Prune {
    fn from(arg: PruneArg) -> Self {
        match arg {
            PruneArg::Incremental => Self::Incremental,
            PruneArg::Rescan => Self::Rescan,
            PruneArg::Disabled => Self::Disabled,
        }
    }
}

/// Accepted input files: a generator container or bare sessions.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Input {
    Generated(GeneratedHistory),
    Sessions(Vec<Vec<Transaction>>),
}

impl Input {
    #[must_use]
    pub fn into_sessions(self) -> Vec<Vec<Transaction>> {
        match self {
            Self::Generated(history) => history.into_data(),
            Self::Sessions(sessions) => sessions,
        }
    }
}

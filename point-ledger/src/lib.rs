//! StellForge Point Ledger
//!
//! STAR point accounting: minting from XLM, burns against token-launch
//! projects, referral/task/bonus awards and airdrop allocation.
//!
//! # Architecture
//!
//! - **Storage port**: The engine talks to [`LedgerStore`] / [`LedgerTx`];
//!   Postgres and in-memory backends implement it
//! - **Lock-then-mutate**: Every balance change is one unit of work holding
//!   row locks in a fixed order
//! - **Receipts**: Mints, burns, participations, referrals and task
//!   completions are immutable rows under uniqueness constraints
//!
//! # Invariants
//!
//! - `star_points == Σ(category credits) - points_burned` for every wallet
//! - `star_points >= 0` at every commit
//! - A request id, transaction hash or claim is applied at most once
//! - A project's burn total equals the sum of its burn receipts

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod amount;
pub mod config;
pub mod engine;
pub mod error;
pub mod issuer;
pub mod memory;
pub mod projects;
pub mod resolver;
pub mod store;
pub mod types;

// Re-exports
pub use config::EngineConfig;
pub use engine::{
    BonusReceipt, BurnReceipt, BurnRequest, MintReceipt, PointEngine, ReferralReceipt,
    TaskReceipt,
};
pub use error::{LedgerError, Result};
pub use issuer::{IssuedToken, MockTokenIssuer, TokenIssueParams, TokenIssuer};
pub use memory::MemoryStore;
pub use projects::{
    FinalizeReceipt, NewProject, ParticipantAllocation, ParticipateRequest, ParticipationReceipt,
    ProjectManager, ProjectStats,
};
pub use resolver::WalletResolver;
pub use store::{LedgerStore, LedgerTx};
pub use types::{
    Account, BurnRecord, MintRecord, MintStats, Participation, PlatformStats, PointBalance,
    PointCategory, Project, ProjectStatus, ReferralEvent, ReferralLink, Task, TaskCompletion,
    Wallet, WalletBurn, WalletParticipation,
};

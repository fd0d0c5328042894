//! Storage port
//!
//! The engine never touches a database directly. It talks to a
//! [`LedgerStore`] for reads and wallet upserts, and opens a [`LedgerTx`] for
//! every balance-mutating unit of work.
//!
//! # Unit of work contract
//!
//! - `lock_*` methods take a pessimistic row lock held until the unit of work
//!   ends, and return the row as currently committed.
//! - `save_*` methods require the row to be locked by the same unit of work.
//! - `insert_*` methods enforce the uniqueness constraints of the schema and
//!   fail with [`LedgerError::Duplicate`](crate::LedgerError::Duplicate).
//! - Nothing is visible to other callers until [`LedgerTx::commit`] returns.
//!   Dropping a unit of work without committing discards every write.
//! - Lock order: wallet accounts by ascending wallet id, then project, then
//!   referral link or task, then platform stats.
//! - Lock waits are bounded; exceeding the bound yields
//!   [`LedgerError::Retryable`](crate::LedgerError::Retryable).

use crate::error::Result;
use crate::types::{
    Account, BurnRecord, MintRecord, MintStats, Participation, PlatformStats, Project,
    ReferralEvent, ReferralLink, Task, TaskCompletion, Wallet, WalletBurn, WalletParticipation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Persistent ledger tables
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    /// Insert-if-absent the wallet and its zero balance, then fetch it.
    ///
    /// Must be a single conflict-tolerant upsert: concurrent first contact
    /// for one address yields exactly one wallet row and one balance row.
    async fn upsert_wallet(&self, address: &str) -> Result<Wallet>;

    /// Wallet by address
    async fn find_wallet(&self, address: &str) -> Result<Option<Wallet>>;

    /// Account (wallet + balance) by wallet id, unlocked
    async fn account(&self, wallet_id: Uuid) -> Result<Option<Account>>;

    /// Create a project
    async fn insert_project(&self, project: &Project) -> Result<()>;

    /// Project by id
    async fn project(&self, project_id: Uuid) -> Result<Option<Project>>;

    /// Active projects whose event ends after `now`, newest first
    async fn active_projects(&self, now: DateTime<Utc>) -> Result<Vec<Project>>;

    /// Burns against a project, newest first
    async fn project_burns(&self, project_id: Uuid) -> Result<Vec<BurnRecord>>;

    /// Burns by a wallet joined with project metadata, newest first
    async fn wallet_burns(&self, wallet_id: Uuid) -> Result<Vec<WalletBurn>>;

    /// Total burned per wallet address for a project
    async fn burn_totals_by_wallet(&self, project_id: Uuid) -> Result<Vec<(String, Decimal)>>;

    /// Participations in a project, newest first
    async fn project_participations(&self, project_id: Uuid) -> Result<Vec<Participation>>;

    /// Participations by a wallet joined with their project, newest first
    async fn wallet_participations(&self, wallet_id: Uuid) -> Result<Vec<WalletParticipation>>;

    /// Referral link owned by a wallet
    async fn referral_link_for_wallet(&self, wallet_id: Uuid) -> Result<Option<ReferralLink>>;

    /// Referral link by code
    async fn referral_link_by_code(&self, code: &str) -> Result<Option<ReferralLink>>;

    /// Create a referral link; `Duplicate` if the wallet or code is taken
    async fn insert_referral_link(&self, link: &ReferralLink) -> Result<()>;

    /// Insert a task unless one with the same `task_type` exists; returns
    /// whether it was inserted
    async fn seed_task(&self, task: &Task) -> Result<bool>;

    /// Task by id
    async fn task(&self, task_id: Uuid) -> Result<Option<Task>>;

    /// Active tasks
    async fn active_tasks(&self) -> Result<Vec<Task>>;

    /// Tasks completed by a wallet
    async fn task_completions(&self, wallet_id: Uuid) -> Result<Vec<TaskCompletion>>;

    /// Platform-wide aggregates
    async fn mint_stats(&self) -> Result<MintStats>;
}

/// A lock-then-mutate unit of work
#[async_trait]
pub trait LedgerTx: Send {
    /// Lock a wallet row and its balance row
    async fn lock_account(&mut self, wallet_id: Uuid) -> Result<Account>;

    /// Lock a project row
    async fn lock_project(&mut self, project_id: Uuid) -> Result<Option<Project>>;

    /// Lock a referral link row by code
    async fn lock_referral_link(&mut self, code: &str) -> Result<Option<ReferralLink>>;

    /// Lock a task row
    async fn lock_task(&mut self, task_id: Uuid) -> Result<Option<Task>>;

    /// Lock the platform stats row
    async fn lock_platform_stats(&mut self) -> Result<PlatformStats>;

    /// Burn receipt by idempotency key, including uncommitted writes of this
    /// unit of work
    async fn find_burn(&mut self, request_id: &str) -> Result<Option<BurnRecord>>;

    /// Write back a locked account
    async fn save_account(&mut self, account: &Account) -> Result<()>;

    /// Write back a locked project
    async fn save_project(&mut self, project: &Project) -> Result<()>;

    /// Write back a locked referral link
    async fn save_referral_link(&mut self, link: &ReferralLink) -> Result<()>;

    /// Write back a locked task
    async fn save_task(&mut self, task: &Task) -> Result<()>;

    /// Write back the locked platform stats
    async fn save_platform_stats(&mut self, stats: &PlatformStats) -> Result<()>;

    /// Record a mint; unique on transaction hash
    async fn insert_mint(&mut self, record: &MintRecord) -> Result<()>;

    /// Record a burn; unique on request id
    async fn insert_burn(&mut self, record: &BurnRecord) -> Result<()>;

    /// Record a participation; unique on transaction hash
    async fn insert_participation(&mut self, record: &Participation) -> Result<()>;

    /// Record a referral; unique on referee wallet
    async fn insert_referral_event(&mut self, record: &ReferralEvent) -> Result<()>;

    /// Record a task completion; unique on (task, wallet)
    async fn insert_task_completion(&mut self, record: &TaskCompletion) -> Result<()>;

    /// Make every write visible atomically
    async fn commit(self: Box<Self>) -> Result<()>;
}

//! In-memory implementation of the storage port
//!
//! Rows are guarded by per-row async mutexes that a unit of work holds until
//! it commits or is dropped, which gives the same lock-then-mutate semantics
//! as `SELECT ... FOR UPDATE`. Writes are buffered in the unit of work and
//! applied under the table mutex at commit, after the uniqueness indexes are
//! re-checked, so a commit is all-or-nothing.
//!
//! Used for tests (with an optional delay after each row lock to widen race
//! windows) and for running the service without PostgreSQL.

use crate::config::EngineConfig;
use crate::error::{LedgerError, Result};
use crate::store::{LedgerStore, LedgerTx};
use crate::types::{
    Account, BurnRecord, MintRecord, MintStats, Participation, PlatformStats, PointBalance,
    Project, ProjectStatus, ReferralEvent, ReferralLink, Task, TaskCompletion, Wallet, WalletBurn,
    WalletParticipation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Account(Uuid),
    Project(Uuid),
    ReferralLink(Uuid),
    Task(Uuid),
    PlatformStats,
}

#[derive(Default)]
struct Tables {
    wallets: HashMap<Uuid, Wallet>,
    wallet_ids: HashMap<String, Uuid>,
    balances: HashMap<Uuid, PointBalance>,
    projects: HashMap<Uuid, Project>,
    mints: Vec<MintRecord>,
    burns: Vec<BurnRecord>,
    participations: Vec<Participation>,
    referral_links: HashMap<Uuid, ReferralLink>,
    referral_events: Vec<ReferralEvent>,
    tasks: HashMap<Uuid, Task>,
    completions: Vec<TaskCompletion>,
    platform: PlatformStats,

    mint_hashes: HashSet<String>,
    burn_requests: HashSet<String>,
    participation_hashes: HashSet<String>,
    referees: HashSet<Uuid>,
    task_pairs: HashSet<(Uuid, Uuid)>,
}

impl Tables {
    fn link_id_by_code(&self, code: &str) -> Option<Uuid> {
        self.referral_links
            .values()
            .find(|l| l.referral_code == code)
            .map(|l| l.id)
    }
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
}

impl Inner {
    fn row_lock(&self, key: RowKey) -> Arc<RowMutex<()>> {
        self.row_locks.lock().entry(key).or_default().clone()
    }

    /// Forget row locks nobody holds or waits on. Every holder and waiter
    /// keeps a clone, so a count of one under the map lock means unused.
    fn prune_row_locks(&self, keys: impl IntoIterator<Item = RowKey>) {
        let mut row_locks = self.row_locks.lock();
        for key in keys {
            if row_locks.get(&key).map_or(false, |row| Arc::strong_count(row) == 1) {
                row_locks.remove(&key);
            }
        }
    }
}

/// In-memory ledger store
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    lock_timeout: Duration,
    lock_delay: Option<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with a 5 second lock timeout
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            lock_timeout: Duration::from_secs(5),
            lock_delay: None,
        }
    }

    /// Empty store using the engine's lock timeout
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new().with_lock_timeout(Duration::from_millis(config.lock_timeout_ms))
    }

    /// Bound on row lock waits
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sleep after every row lock is taken, to force interleaving in tests
    pub fn with_lock_delay(mut self, delay: Duration) -> Self {
        self.lock_delay = Some(delay);
        self
    }

    /// Number of wallet rows
    pub fn wallet_count(&self) -> usize {
        self.inner.tables.lock().wallets.len()
    }

    /// Number of balance rows
    pub fn balance_count(&self) -> usize {
        self.inner.tables.lock().balances.len()
    }

    #[cfg(test)]
    pub(crate) fn row_lock_count(&self) -> usize {
        self.inner.row_locks.lock().len()
    }
}

fn newest_first<T, F>(mut rows: Vec<T>, created_at: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    rows.reverse();
    rows.sort_by_key(|r| std::cmp::Reverse(created_at(r)));
    rows
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryTx::new(
            self.inner.clone(),
            self.lock_timeout,
            self.lock_delay,
        )))
    }

    async fn upsert_wallet(&self, address: &str) -> Result<Wallet> {
        let mut tables = self.inner.tables.lock();
        if let Some(id) = tables.wallet_ids.get(address) {
            if let Some(wallet) = tables.wallets.get(id) {
                return Ok(wallet.clone());
            }
        }

        let wallet = Wallet::new(address, Utc::now());
        tables.balances.insert(wallet.id, PointBalance::empty(&wallet));
        tables.wallet_ids.insert(address.to_string(), wallet.id);
        tables.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn find_wallet(&self, address: &str) -> Result<Option<Wallet>> {
        let tables = self.inner.tables.lock();
        Ok(tables
            .wallet_ids
            .get(address)
            .and_then(|id| tables.wallets.get(id))
            .cloned())
    }

    async fn account(&self, wallet_id: Uuid) -> Result<Option<Account>> {
        let tables = self.inner.tables.lock();
        Ok(tables.wallets.get(&wallet_id).and_then(|wallet| {
            tables.balances.get(&wallet_id).map(|balance| Account {
                wallet: wallet.clone(),
                balance: balance.clone(),
            })
        }))
    }

    async fn insert_project(&self, project: &Project) -> Result<()> {
        let mut tables = self.inner.tables.lock();
        if tables.projects.contains_key(&project.id) {
            return Err(LedgerError::Duplicate(format!("project {}", project.id)));
        }
        tables.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn project(&self, project_id: Uuid) -> Result<Option<Project>> {
        Ok(self.inner.tables.lock().projects.get(&project_id).cloned())
    }

    async fn active_projects(&self, now: DateTime<Utc>) -> Result<Vec<Project>> {
        let tables = self.inner.tables.lock();
        let mut projects: Vec<Project> = tables
            .projects
            .values()
            .filter(|p| p.status == ProjectStatus::Active && p.event_end_date > now)
            .cloned()
            .collect();
        projects.sort_by_key(|p| std::cmp::Reverse(p.created_at));
        Ok(projects)
    }

    async fn project_burns(&self, project_id: Uuid) -> Result<Vec<BurnRecord>> {
        let tables = self.inner.tables.lock();
        let burns = tables
            .burns
            .iter()
            .filter(|b| b.project_id == project_id)
            .cloned()
            .collect();
        Ok(newest_first(burns, |b| b.created_at))
    }

    async fn wallet_burns(&self, wallet_id: Uuid) -> Result<Vec<WalletBurn>> {
        let tables = self.inner.tables.lock();
        let burns = tables
            .burns
            .iter()
            .filter(|b| b.wallet_id == wallet_id)
            .map(|b| {
                let project = tables.projects.get(&b.project_id);
                WalletBurn {
                    id: b.id,
                    project_id: b.project_id,
                    project_name: project.map(|p| p.token_name.clone()),
                    project_symbol: project.map(|p| p.token_symbol.clone()),
                    star_burned: b.star_burned,
                    created_at: b.created_at,
                }
            })
            .collect();
        Ok(newest_first(burns, |b| b.created_at))
    }

    async fn burn_totals_by_wallet(&self, project_id: Uuid) -> Result<Vec<(String, Decimal)>> {
        let tables = self.inner.tables.lock();
        let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
        for burn in tables.burns.iter().filter(|b| b.project_id == project_id) {
            *totals.entry(burn.wallet_address.clone()).or_default() += burn.star_burned;
        }
        Ok(totals.into_iter().collect())
    }

    async fn project_participations(&self, project_id: Uuid) -> Result<Vec<Participation>> {
        let tables = self.inner.tables.lock();
        let rows = tables
            .participations
            .iter()
            .filter(|p| p.project_id == project_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |p| p.created_at))
    }

    async fn wallet_participations(&self, wallet_id: Uuid) -> Result<Vec<WalletParticipation>> {
        let tables = self.inner.tables.lock();
        let rows = tables
            .participations
            .iter()
            .filter(|p| p.participant_wallet_id == wallet_id)
            .map(|p| WalletParticipation {
                participation: p.clone(),
                project: tables.projects.get(&p.project_id).cloned(),
            })
            .collect();
        Ok(newest_first(rows, |r| r.participation.created_at))
    }

    async fn referral_link_for_wallet(&self, wallet_id: Uuid) -> Result<Option<ReferralLink>> {
        let tables = self.inner.tables.lock();
        Ok(tables
            .referral_links
            .values()
            .find(|l| l.wallet_id == wallet_id)
            .cloned())
    }

    async fn referral_link_by_code(&self, code: &str) -> Result<Option<ReferralLink>> {
        let tables = self.inner.tables.lock();
        Ok(tables
            .link_id_by_code(code)
            .and_then(|id| tables.referral_links.get(&id))
            .cloned())
    }

    async fn insert_referral_link(&self, link: &ReferralLink) -> Result<()> {
        let mut tables = self.inner.tables.lock();
        if tables
            .referral_links
            .values()
            .any(|l| l.wallet_id == link.wallet_id || l.referral_code == link.referral_code)
        {
            return Err(LedgerError::Duplicate("Referral link already exists".to_string()));
        }
        tables.referral_links.insert(link.id, link.clone());
        Ok(())
    }

    async fn seed_task(&self, task: &Task) -> Result<bool> {
        let mut tables = self.inner.tables.lock();
        if tables.tasks.values().any(|t| t.task_type == task.task_type) {
            return Ok(false);
        }
        tables.tasks.insert(task.id, task.clone());
        Ok(true)
    }

    async fn task(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.inner.tables.lock().tasks.get(&task_id).cloned())
    }

    async fn active_tasks(&self) -> Result<Vec<Task>> {
        let tables = self.inner.tables.lock();
        let mut tasks: Vec<Task> = tables.tasks.values().filter(|t| t.is_active).cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.task_type.cmp(&b.task_type)));
        Ok(tasks)
    }

    async fn task_completions(&self, wallet_id: Uuid) -> Result<Vec<TaskCompletion>> {
        let tables = self.inner.tables.lock();
        let rows = tables
            .completions
            .iter()
            .filter(|c| c.wallet_id == wallet_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |c| c.completed_at))
    }

    async fn mint_stats(&self) -> Result<MintStats> {
        let tables = self.inner.tables.lock();
        Ok(MintStats {
            total_xlm_received: tables.mints.iter().map(|m| m.xlm_amount).sum(),
            total_star_minted: tables.mints.iter().map(|m| m.star_points_awarded).sum(),
            total_users: tables.wallets.len() as i64,
            users_with_initial_bonus: tables.platform.users_with_initial_bonus,
            total_star_distributed: tables.balances.values().map(|b| b.total_credits()).sum(),
            minting_active: true,
        })
    }
}

/// Unit of work over a [`MemoryStore`]
pub struct MemoryTx {
    inner: Arc<Inner>,
    lock_timeout: Duration,
    lock_delay: Option<Duration>,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,

    accounts: HashMap<Uuid, Account>,
    projects: HashMap<Uuid, Project>,
    links: HashMap<Uuid, ReferralLink>,
    tasks: HashMap<Uuid, Task>,
    platform: Option<PlatformStats>,
    dirty: HashSet<RowKey>,

    mints: Vec<MintRecord>,
    burns: Vec<BurnRecord>,
    participations: Vec<Participation>,
    referral_events: Vec<ReferralEvent>,
    completions: Vec<TaskCompletion>,
}

impl MemoryTx {
    fn new(inner: Arc<Inner>, lock_timeout: Duration, lock_delay: Option<Duration>) -> Self {
        Self {
            inner,
            lock_timeout,
            lock_delay,
            guards: HashMap::new(),
            accounts: HashMap::new(),
            projects: HashMap::new(),
            links: HashMap::new(),
            tasks: HashMap::new(),
            platform: None,
            dirty: HashSet::new(),
            mints: Vec::new(),
            burns: Vec::new(),
            participations: Vec::new(),
            referral_events: Vec::new(),
            completions: Vec::new(),
        }
    }

    async fn acquire(&mut self, key: RowKey) -> Result<()> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }

        let row = self.inner.row_lock(key);
        let guard = match tokio::time::timeout(self.lock_timeout, row.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.inner.prune_row_locks([key]);
                return Err(LedgerError::Retryable(format!(
                    "lock wait timeout on {:?}",
                    key
                )));
            }
        };
        self.guards.insert(key, guard);

        if let Some(delay) = self.lock_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn ensure_locked(&self, key: RowKey) -> Result<()> {
        if self.guards.contains_key(&key) {
            Ok(())
        } else {
            Err(LedgerError::Storage(format!("{:?} written without a row lock", key)))
        }
    }

    /// Uniqueness of every buffered receipt against committed rows
    fn check_unique(&self, tables: &Tables) -> Result<()> {
        if self.mints.iter().any(|m| tables.mint_hashes.contains(&m.transaction_hash)) {
            return Err(duplicate_mint());
        }
        if self.burns.iter().any(|b| tables.burn_requests.contains(&b.request_id)) {
            return Err(duplicate_burn());
        }
        if self
            .participations
            .iter()
            .any(|p| tables.participation_hashes.contains(&p.transaction_hash))
        {
            return Err(duplicate_participation());
        }
        if self
            .referral_events
            .iter()
            .any(|r| tables.referees.contains(&r.referee_wallet_id))
        {
            return Err(duplicate_referral());
        }
        if self
            .completions
            .iter()
            .any(|c| tables.task_pairs.contains(&(c.task_id, c.wallet_id)))
        {
            return Err(duplicate_completion());
        }
        Ok(())
    }
}

fn duplicate_mint() -> LedgerError {
    LedgerError::Duplicate("Transaction already processed".to_string())
}

fn duplicate_burn() -> LedgerError {
    LedgerError::Duplicate("Burn already processed".to_string())
}

fn duplicate_participation() -> LedgerError {
    LedgerError::Duplicate("Participation transaction already processed".to_string())
}

fn duplicate_referral() -> LedgerError {
    LedgerError::Duplicate("Wallet has already been referred".to_string())
}

fn duplicate_completion() -> LedgerError {
    LedgerError::Duplicate("Task already completed".to_string())
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        let keys: Vec<RowKey> = self.guards.keys().copied().collect();
        self.guards.clear();
        self.inner.prune_row_locks(keys);
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_account(&mut self, wallet_id: Uuid) -> Result<Account> {
        self.acquire(RowKey::Account(wallet_id)).await?;
        if let Some(account) = self.accounts.get(&wallet_id) {
            return Ok(account.clone());
        }

        let account = {
            let tables = self.inner.tables.lock();
            match (tables.wallets.get(&wallet_id), tables.balances.get(&wallet_id)) {
                (Some(wallet), Some(balance)) => Account {
                    wallet: wallet.clone(),
                    balance: balance.clone(),
                },
                _ => return Err(LedgerError::not_found("Wallet balance")),
            }
        };
        self.accounts.insert(wallet_id, account.clone());
        Ok(account)
    }

    async fn lock_project(&mut self, project_id: Uuid) -> Result<Option<Project>> {
        self.acquire(RowKey::Project(project_id)).await?;
        if let Some(project) = self.projects.get(&project_id) {
            return Ok(Some(project.clone()));
        }

        let project = self.inner.tables.lock().projects.get(&project_id).cloned();
        if let Some(ref p) = project {
            self.projects.insert(project_id, p.clone());
        }
        Ok(project)
    }

    async fn lock_referral_link(&mut self, code: &str) -> Result<Option<ReferralLink>> {
        let link_id = match self.inner.tables.lock().link_id_by_code(code) {
            Some(id) => id,
            None => return Ok(None),
        };

        self.acquire(RowKey::ReferralLink(link_id)).await?;
        if let Some(link) = self.links.get(&link_id) {
            return Ok(Some(link.clone()));
        }

        let link = self.inner.tables.lock().referral_links.get(&link_id).cloned();
        if let Some(ref l) = link {
            self.links.insert(link_id, l.clone());
        }
        Ok(link)
    }

    async fn lock_task(&mut self, task_id: Uuid) -> Result<Option<Task>> {
        self.acquire(RowKey::Task(task_id)).await?;
        if let Some(task) = self.tasks.get(&task_id) {
            return Ok(Some(task.clone()));
        }

        let task = self.inner.tables.lock().tasks.get(&task_id).cloned();
        if let Some(ref t) = task {
            self.tasks.insert(task_id, t.clone());
        }
        Ok(task)
    }

    async fn lock_platform_stats(&mut self) -> Result<PlatformStats> {
        self.acquire(RowKey::PlatformStats).await?;
        if let Some(ref stats) = self.platform {
            return Ok(stats.clone());
        }

        let stats = self.inner.tables.lock().platform.clone();
        self.platform = Some(stats.clone());
        Ok(stats)
    }

    async fn find_burn(&mut self, request_id: &str) -> Result<Option<BurnRecord>> {
        if let Some(burn) = self.burns.iter().find(|b| b.request_id == request_id) {
            return Ok(Some(burn.clone()));
        }

        let tables = self.inner.tables.lock();
        Ok(tables
            .burns
            .iter()
            .find(|b| b.request_id == request_id)
            .cloned())
    }

    async fn save_account(&mut self, account: &Account) -> Result<()> {
        let key = RowKey::Account(account.id());
        self.ensure_locked(key)?;
        self.accounts.insert(account.id(), account.clone());
        self.dirty.insert(key);
        Ok(())
    }

    async fn save_project(&mut self, project: &Project) -> Result<()> {
        let key = RowKey::Project(project.id);
        self.ensure_locked(key)?;
        self.projects.insert(project.id, project.clone());
        self.dirty.insert(key);
        Ok(())
    }

    async fn save_referral_link(&mut self, link: &ReferralLink) -> Result<()> {
        let key = RowKey::ReferralLink(link.id);
        self.ensure_locked(key)?;
        self.links.insert(link.id, link.clone());
        self.dirty.insert(key);
        Ok(())
    }

    async fn save_task(&mut self, task: &Task) -> Result<()> {
        let key = RowKey::Task(task.id);
        self.ensure_locked(key)?;
        self.tasks.insert(task.id, task.clone());
        self.dirty.insert(key);
        Ok(())
    }

    async fn save_platform_stats(&mut self, stats: &PlatformStats) -> Result<()> {
        self.ensure_locked(RowKey::PlatformStats)?;
        self.platform = Some(stats.clone());
        self.dirty.insert(RowKey::PlatformStats);
        Ok(())
    }

    async fn insert_mint(&mut self, record: &MintRecord) -> Result<()> {
        let taken = self.mints.iter().any(|m| m.transaction_hash == record.transaction_hash)
            || self.inner.tables.lock().mint_hashes.contains(&record.transaction_hash);
        if taken {
            return Err(duplicate_mint());
        }
        self.mints.push(record.clone());
        Ok(())
    }

    async fn insert_burn(&mut self, record: &BurnRecord) -> Result<()> {
        let taken = self.burns.iter().any(|b| b.request_id == record.request_id)
            || self.inner.tables.lock().burn_requests.contains(&record.request_id);
        if taken {
            return Err(duplicate_burn());
        }
        self.burns.push(record.clone());
        Ok(())
    }

    async fn insert_participation(&mut self, record: &Participation) -> Result<()> {
        let taken = self
            .participations
            .iter()
            .any(|p| p.transaction_hash == record.transaction_hash)
            || self
                .inner
                .tables
                .lock()
                .participation_hashes
                .contains(&record.transaction_hash);
        if taken {
            return Err(duplicate_participation());
        }
        self.participations.push(record.clone());
        Ok(())
    }

    async fn insert_referral_event(&mut self, record: &ReferralEvent) -> Result<()> {
        let taken = self
            .referral_events
            .iter()
            .any(|r| r.referee_wallet_id == record.referee_wallet_id)
            || self.inner.tables.lock().referees.contains(&record.referee_wallet_id);
        if taken {
            return Err(duplicate_referral());
        }
        self.referral_events.push(record.clone());
        Ok(())
    }

    async fn insert_task_completion(&mut self, record: &TaskCompletion) -> Result<()> {
        let pair = (record.task_id, record.wallet_id);
        let taken = self.completions.iter().any(|c| (c.task_id, c.wallet_id) == pair)
            || self.inner.tables.lock().task_pairs.contains(&pair);
        if taken {
            return Err(duplicate_completion());
        }
        self.completions.push(record.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let inner = self.inner.clone();
        let mut tables = inner.tables.lock();
        self.check_unique(&tables)?;

        for key in self.dirty.drain() {
            match key {
                RowKey::Account(id) => {
                    if let Some(account) = self.accounts.remove(&id) {
                        tables.wallets.insert(id, account.wallet);
                        tables.balances.insert(id, account.balance);
                    }
                }
                RowKey::Project(id) => {
                    if let Some(project) = self.projects.remove(&id) {
                        tables.projects.insert(id, project);
                    }
                }
                RowKey::ReferralLink(id) => {
                    if let Some(link) = self.links.remove(&id) {
                        tables.referral_links.insert(id, link);
                    }
                }
                RowKey::Task(id) => {
                    if let Some(task) = self.tasks.remove(&id) {
                        tables.tasks.insert(id, task);
                    }
                }
                RowKey::PlatformStats => {
                    if let Some(stats) = self.platform.take() {
                        tables.platform = stats;
                    }
                }
            }
        }

        for mint in self.mints.drain(..) {
            tables.mint_hashes.insert(mint.transaction_hash.clone());
            tables.mints.push(mint);
        }
        for burn in self.burns.drain(..) {
            tables.burn_requests.insert(burn.request_id.clone());
            tables.burns.push(burn);
        }
        for participation in self.participations.drain(..) {
            tables
                .participation_hashes
                .insert(participation.transaction_hash.clone());
            tables.participations.push(participation);
        }
        for event in self.referral_events.drain(..) {
            tables.referees.insert(event.referee_wallet_id);
            tables.referral_events.push(event);
        }
        for completion in self.completions.drain(..) {
            tables
                .task_pairs
                .insert((completion.task_id, completion.wallet_id));
            tables.completions.push(completion);
        }

        // Row locks are released when `self` drops, after the table mutex.
        drop(tables);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointCategory;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.upsert_wallet("GAAA").await.unwrap();
        let b = store.upsert_wallet("GAAA").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.wallet_count(), 1);
        assert_eq!(store.balance_count(), 1);
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let wallet = store.upsert_wallet("GAAA").await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            let mut account = tx.lock_account(wallet.id).await.unwrap();
            account
                .credit(PointCategory::Minting, dec!(50), Utc::now())
                .unwrap();
            tx.save_account(&account).await.unwrap();
            // dropped without commit
        }

        let account = store.account(wallet.id).await.unwrap().unwrap();
        assert_eq!(account.balance.star_points, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_save_requires_lock() {
        let store = MemoryStore::new();
        let wallet = store.upsert_wallet("GAAA").await.unwrap();
        let account = store.account(wallet.id).await.unwrap().unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.save_account(&account).await.unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
    }

    #[tokio::test]
    async fn test_lock_wait_times_out_as_retryable() {
        let store = MemoryStore::new().with_lock_timeout(Duration::from_millis(20));
        let wallet = store.upsert_wallet("GAAA").await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_account(wallet.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_account(wallet.id).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_row_locks_released_after_unit_of_work() {
        let store = MemoryStore::new().with_lock_timeout(Duration::from_millis(20));
        let mut wallets = Vec::new();
        for i in 0..50 {
            wallets.push(store.upsert_wallet(&format!("GW{}", i)).await.unwrap());
        }

        for wallet in &wallets {
            let mut tx = store.begin().await.unwrap();
            let mut account = tx.lock_account(wallet.id).await.unwrap();
            account
                .credit(PointCategory::Minting, dec!(1), Utc::now())
                .unwrap();
            tx.save_account(&account).await.unwrap();
            tx.lock_platform_stats().await.unwrap();
            tx.commit().await.unwrap();
        }
        assert_eq!(store.row_lock_count(), 0);

        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_account(wallets[0].id).await.unwrap();
            assert_eq!(store.row_lock_count(), 1);
        }
        assert_eq!(store.row_lock_count(), 0);

        let mut holder = store.begin().await.unwrap();
        holder.lock_account(wallets[0].id).await.unwrap();
        let mut waiter = store.begin().await.unwrap();
        assert!(waiter.lock_account(wallets[0].id).await.is_err());
        assert_eq!(store.row_lock_count(), 1);
        drop(waiter);
        holder.commit().await.unwrap();
        assert_eq!(store.row_lock_count(), 0);

        let account = store.account(wallets[0].id).await.unwrap().unwrap();
        assert_eq!(account.balance.star_points, dec!(1));
    }

    #[tokio::test]
    async fn test_duplicate_detected_at_commit() {
        let store = MemoryStore::new();
        let wallet = store.upsert_wallet("GAAA").await.unwrap();
        let record = MintRecord {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            wallet_address: wallet.wallet_address.clone(),
            xlm_amount: dec!(1),
            star_points_awarded: dec!(10),
            transaction_hash: "abc".into(),
            status: "confirmed".into(),
            created_at: Utc::now(),
        };

        // Both insert before either commits
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.insert_mint(&record).await.unwrap();
        second.insert_mint(&record).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, LedgerError::Duplicate(_)));
    }
}

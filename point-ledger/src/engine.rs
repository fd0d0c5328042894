//! Point accounting engine
//!
//! Every balance-mutating operation is one unit of work on the storage port:
//! lock the affected rows, re-check the preconditions against the locked
//! state, write the balance together with its category counter, insert the
//! immutable receipt, commit. Input validation happens before the unit of
//! work is opened; anything detected inside it aborts the whole unit.

use crate::amount::{mint_points, split_burn, validate_burn_amount, validate_xlm_amount};
use crate::config::EngineConfig;
use crate::error::{LedgerError, Result};
use crate::resolver::WalletResolver;
use crate::store::{LedgerStore, LedgerTx};
use crate::types::{
    Account, BurnRecord, MintRecord, MintStats, PointBalance, PointCategory, ReferralEvent,
    ReferralLink, Task, TaskCompletion, WalletBurn,
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MAX_KEY_LEN: usize = 256;
const REFERRAL_CODE_LEN: usize = 8;
const REFERRAL_CODE_ATTEMPTS: usize = 5;

/// Validate a caller-supplied idempotency key or transaction hash
pub fn validate_key<'a>(key: &'a str, field: &str) -> Result<&'a str> {
    let key = key.trim();
    if key.is_empty() {
        return Err(LedgerError::Validation(format!("{} is required", field)));
    }
    if key.len() > MAX_KEY_LEN || key.chars().any(char::is_whitespace) {
        return Err(LedgerError::Validation(format!("Invalid {}", field)));
    }
    Ok(key)
}

/// Lock several accounts in ascending wallet id order.
///
/// Duplicated ids are locked once.
pub(crate) async fn lock_accounts(
    tx: &mut dyn LedgerTx,
    wallet_ids: &[Uuid],
) -> Result<BTreeMap<Uuid, Account>> {
    let mut ids = wallet_ids.to_vec();
    ids.sort();
    ids.dedup();

    let mut accounts = BTreeMap::new();
    for id in ids {
        let account = tx.lock_account(id).await?;
        accounts.insert(id, account);
    }
    Ok(accounts)
}

fn generate_referral_code() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Result of a mint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintReceipt {
    pub mint_id: Uuid,
    pub wallet_address: String,
    pub xlm_amount: Decimal,
    /// Points awarded by this mint
    pub star_points: Decimal,
    pub transaction_hash: String,
    pub new_balance: Decimal,
}

/// A burn request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRequest {
    pub wallet_address: String,
    pub project_id: Uuid,
    pub star_amount: Decimal,
    /// Idempotency key
    pub request_id: String,
}

/// Result of a burn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnReceipt {
    pub success: bool,
    pub burn_id: Uuid,
    pub star_burned: Decimal,
    pub star_destroyed: Decimal,
    pub star_to_creator: Decimal,
    pub new_balance: Decimal,
}

/// Result of an initial bonus claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusReceipt {
    pub points_awarded: Decimal,
    pub new_balance: Decimal,
}

/// Result of a referral claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralReceipt {
    pub referral_event_id: Uuid,
    pub referrer_wallet_address: String,
    pub points_awarded: Decimal,
}

/// Result of a task completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReceipt {
    pub completion_id: Uuid,
    pub task_id: Uuid,
    pub points_awarded: Decimal,
    pub new_balance: Decimal,
}

/// Tasks seeded at startup
pub fn default_tasks() -> Vec<Task> {
    vec![
        Task::new(
            "follow_twitter",
            "Follow StellForge on X",
            "Follow the official StellForge account",
            Decimal::from(20),
            None,
        ),
        Task::new(
            "join_telegram",
            "Join the Telegram community",
            "Join the StellForge Telegram group",
            Decimal::from(20),
            None,
        ),
        Task::new(
            "first_swap",
            "Make your first swap",
            "Complete a swap on the StellForge DEX",
            Decimal::from(50),
            None,
        ),
        Task::new(
            "provide_liquidity",
            "Provide liquidity",
            "Add liquidity to any StellForge pool",
            Decimal::from(100),
            None,
        ),
        Task::new(
            "launch_token",
            "Launch a token",
            "Create a token launch project",
            Decimal::from(100),
            None,
        ),
    ]
}

/// Applies mints, burns and awards to point balances
#[derive(Clone)]
pub struct PointEngine {
    store: Arc<dyn LedgerStore>,
    resolver: WalletResolver,
    config: EngineConfig,
}

impl PointEngine {
    /// Engine over `store`
    pub fn new(store: Arc<dyn LedgerStore>, config: EngineConfig) -> Self {
        Self {
            resolver: WalletResolver::new(store.clone()),
            store,
            config,
        }
    }

    /// Wallet resolver sharing this engine's store
    pub fn resolver(&self) -> &WalletResolver {
        &self.resolver
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Convert XLM to STAR at the configured rate.
    ///
    /// The transaction hash is recorded under a unique constraint; replaying
    /// it fails the whole unit of work with `Duplicate`.
    #[instrument(skip(self, xlm_amount))]
    pub async fn mint(
        &self,
        wallet_address: &str,
        xlm_amount: Decimal,
        transaction_hash: &str,
    ) -> Result<MintReceipt> {
        if !self.config.minting_active {
            return Err(LedgerError::State("Minting is not active".to_string()));
        }

        let xlm_amount = validate_xlm_amount(xlm_amount)?;
        let transaction_hash = validate_key(transaction_hash, "transactionHash")?;
        let points = mint_points(xlm_amount, self.config.mint_rate)?;
        if points <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "XLM amount too small to award points".to_string(),
            ));
        }

        let wallet = self.resolver.resolve(wallet_address).await?;

        let mut tx = self.store.begin().await?;
        let mut account = tx.lock_account(wallet.id).await?;
        let now = Utc::now();
        account.credit(PointCategory::Minting, points, now)?;

        let record = MintRecord {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            wallet_address: wallet.wallet_address.clone(),
            xlm_amount,
            star_points_awarded: points,
            transaction_hash: transaction_hash.to_string(),
            status: "confirmed".to_string(),
            created_at: now,
        };

        if let Err(e) = tx.insert_mint(&record).await {
            warn!("Mint rejected for {}: {}", wallet.wallet_address, e);
            return Err(e);
        }
        tx.save_account(&account).await?;
        tx.commit().await?;

        info!(
            "Minted {} STAR for {} XLM to {} (tx: {})",
            points, xlm_amount, wallet.wallet_address, transaction_hash
        );

        Ok(MintReceipt {
            mint_id: record.id,
            wallet_address: record.wallet_address,
            xlm_amount,
            star_points: points,
            transaction_hash: record.transaction_hash,
            new_balance: account.balance.star_points,
        })
    }

    /// Burn points against an active project.
    ///
    /// Under the wallet row lock: the idempotency key is re-checked, the
    /// balance is compared with the amount, then the wallet is debited, the
    /// project counters are credited and the receipt is inserted, all in one
    /// commit. Locks are taken wallet first, then project.
    #[instrument(skip(self, request), fields(wallet = %request.wallet_address, project = %request.project_id))]
    pub async fn burn(&self, request: BurnRequest) -> Result<BurnReceipt> {
        let amount = validate_burn_amount(request.star_amount)?;
        let request_id = validate_key(&request.request_id, "requestId")?;
        let wallet = self.resolver.resolve(&request.wallet_address).await?;

        let project = self
            .store
            .project(request.project_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Project"))?;
        project.ensure_open(Utc::now())?;

        let split = split_burn(amount, self.config.burn_destroy_share);

        let mut tx = self.store.begin().await?;
        let mut account = tx.lock_account(wallet.id).await?;

        if tx.find_burn(request_id).await?.is_some() {
            warn!("Duplicate burn request {}", request_id);
            return Err(LedgerError::Duplicate(
                "Duplicate request. Burn already processed".to_string(),
            ));
        }

        let mut project = tx
            .lock_project(request.project_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Project"))?;
        let now = Utc::now();
        project.ensure_open(now)?;

        if let Err(e) = account.burn(amount, now) {
            warn!("Burn rejected for {}: {}", wallet.wallet_address, e);
            return Err(e);
        }
        project.record_burn(amount, split.to_creator, now);

        let record = BurnRecord {
            id: Uuid::new_v4(),
            project_id: project.id,
            wallet_id: wallet.id,
            wallet_address: wallet.wallet_address.clone(),
            star_burned: amount,
            star_to_creator: split.to_creator,
            star_destroyed: split.destroyed,
            request_id: request_id.to_string(),
            created_at: now,
        };

        tx.save_account(&account).await?;
        tx.save_project(&project).await?;
        tx.insert_burn(&record).await?;
        tx.commit().await?;

        info!(
            "Burned {} STAR from {} for project {} (destroyed: {}, to creator: {})",
            amount, wallet.wallet_address, project.id, split.destroyed, split.to_creator
        );

        Ok(BurnReceipt {
            success: true,
            burn_id: record.id,
            star_burned: amount,
            star_destroyed: split.destroyed,
            star_to_creator: split.to_creator,
            new_balance: account.balance.star_points,
        })
    }

    /// Grant the one-time bonus to one of the first `initial_bonus_cap` wallets
    #[instrument(skip(self))]
    pub async fn claim_initial_bonus(&self, wallet_address: &str) -> Result<BonusReceipt> {
        let wallet = self.resolver.resolve(wallet_address).await?;
        if wallet.received_initial_bonus {
            return Err(LedgerError::Duplicate(
                "Initial bonus already claimed".to_string(),
            ));
        }

        let bonus = self.config.initial_bonus;
        let mut tx = self.store.begin().await?;
        let mut account = tx.lock_account(wallet.id).await?;
        if account.wallet.received_initial_bonus {
            return Err(LedgerError::Duplicate(
                "Initial bonus already claimed".to_string(),
            ));
        }

        let mut stats = tx.lock_platform_stats().await?;
        if stats.users_with_initial_bonus >= self.config.initial_bonus_cap {
            return Err(LedgerError::State(
                "Initial bonus allocation exhausted".to_string(),
            ));
        }

        account.credit(PointCategory::Platform, bonus, Utc::now())?;
        account.wallet.received_initial_bonus = true;
        account.balance.initial_bonus_received = true;
        stats.users_with_initial_bonus += 1;
        stats.total_bonus_distributed += bonus;

        tx.save_account(&account).await?;
        tx.save_platform_stats(&stats).await?;
        tx.commit().await?;

        info!(
            "Initial bonus of {} STAR granted to {} ({} of {})",
            bonus, wallet.wallet_address, stats.users_with_initial_bonus, self.config.initial_bonus_cap
        );

        Ok(BonusReceipt {
            points_awarded: bonus,
            new_balance: account.balance.star_points,
        })
    }

    /// The wallet's referral link, created on first request
    pub async fn referral_info(&self, wallet_address: &str) -> Result<ReferralLink> {
        let wallet = self.resolver.resolve(wallet_address).await?;
        if let Some(link) = self.store.referral_link_for_wallet(wallet.id).await? {
            return Ok(link);
        }

        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            let link = ReferralLink {
                id: Uuid::new_v4(),
                wallet_id: wallet.id,
                wallet_address: wallet.wallet_address.clone(),
                referral_code: generate_referral_code(),
                total_referrals: 0,
                successful_referrals: 0,
                created_at: Utc::now(),
            };

            match self.store.insert_referral_link(&link).await {
                Ok(()) => {
                    info!("Created referral code {} for {}", link.referral_code, wallet.wallet_address);
                    return Ok(link);
                }
                // Either a concurrent request created the wallet's link or the
                // code collided with another wallet's.
                Err(LedgerError::Duplicate(_)) => {
                    if let Some(existing) = self.store.referral_link_for_wallet(wallet.id).await? {
                        return Ok(existing);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::Storage(
            "Could not allocate a unique referral code".to_string(),
        ))
    }

    /// Credit the owner of `referral_code` for referring `referee_address`.
    ///
    /// A wallet can be referred once; the referee row is unique in the
    /// referral events table.
    #[instrument(skip(self))]
    pub async fn claim_referral(
        &self,
        referral_code: &str,
        referee_address: &str,
    ) -> Result<ReferralReceipt> {
        let code = referral_code.trim().to_uppercase();
        if code.is_empty() {
            return Err(LedgerError::Validation("Referral code is required".to_string()));
        }

        let referee = self.resolver.resolve(referee_address).await?;
        let link = self
            .store
            .referral_link_by_code(&code)
            .await?
            .ok_or_else(|| LedgerError::not_found("Referral code"))?;
        if link.wallet_id == referee.id {
            return Err(LedgerError::Validation(
                "Cannot use your own referral code".to_string(),
            ));
        }

        let reward = self.config.referral_reward;
        let mut tx = self.store.begin().await?;
        let mut referrer = tx.lock_account(link.wallet_id).await?;
        let mut link = tx
            .lock_referral_link(&code)
            .await?
            .ok_or_else(|| LedgerError::not_found("Referral code"))?;

        let now = Utc::now();
        referrer.credit(PointCategory::Referral, reward, now)?;
        link.total_referrals += 1;
        link.successful_referrals += 1;

        let event = ReferralEvent {
            id: Uuid::new_v4(),
            referrer_wallet_id: referrer.id(),
            referee_wallet_id: referee.id,
            referral_code: code.clone(),
            status: "completed".to_string(),
            points_awarded: reward,
            created_at: now,
        };

        if let Err(e) = tx.insert_referral_event(&event).await {
            warn!("Referral rejected for {}: {}", referee.wallet_address, e);
            return Err(e);
        }
        tx.save_account(&referrer).await?;
        tx.save_referral_link(&link).await?;
        tx.commit().await?;

        info!(
            "Referral {} claimed by {}: {} STAR to {}",
            code, referee.wallet_address, reward, referrer.wallet.wallet_address
        );

        Ok(ReferralReceipt {
            referral_event_id: event.id,
            referrer_wallet_address: referrer.wallet.wallet_address,
            points_awarded: reward,
        })
    }

    /// Award a task's reward once per (task, wallet)
    #[instrument(skip(self, proof_data))]
    pub async fn complete_task(
        &self,
        wallet_address: &str,
        task_id: Uuid,
        proof_data: Option<serde_json::Value>,
    ) -> Result<TaskReceipt> {
        let wallet = self.resolver.resolve(wallet_address).await?;
        let task = self
            .store
            .task(task_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Task"))?;
        if !task.is_active {
            return Err(LedgerError::State("Task is not active".to_string()));
        }

        let mut tx = self.store.begin().await?;
        let mut account = tx.lock_account(wallet.id).await?;
        let mut task = tx
            .lock_task(task_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Task"))?;

        if !task.is_active {
            return Err(LedgerError::State("Task is not active".to_string()));
        }
        if let Some(max) = task.max_completions {
            if task.completions >= max {
                return Err(LedgerError::State(
                    "Task completion limit reached".to_string(),
                ));
            }
        }

        let now = Utc::now();
        account.credit(PointCategory::Tasks, task.star_reward, now)?;
        task.completions += 1;

        let completion = TaskCompletion {
            id: Uuid::new_v4(),
            task_id,
            wallet_id: wallet.id,
            wallet_address: wallet.wallet_address.clone(),
            points_awarded: task.star_reward,
            proof_data,
            completed_at: now,
        };

        if let Err(e) = tx.insert_task_completion(&completion).await {
            warn!("Task {} rejected for {}: {}", task.task_type, wallet.wallet_address, e);
            return Err(e);
        }
        tx.save_account(&account).await?;
        tx.save_task(&task).await?;
        tx.commit().await?;

        info!(
            "Task {} completed by {}: {} STAR",
            task.task_type, wallet.wallet_address, task.star_reward
        );

        Ok(TaskReceipt {
            completion_id: completion.id,
            task_id,
            points_awarded: task.star_reward,
            new_balance: account.balance.star_points,
        })
    }

    /// Insert the default task catalogue; existing task types are left alone
    pub async fn seed_default_tasks(&self) -> Result<usize> {
        let mut inserted = 0;
        for task in default_tasks() {
            if self.store.seed_task(&task).await? {
                inserted += 1;
            }
        }
        info!("Task catalogue initialized ({} new)", inserted);
        Ok(inserted)
    }

    /// Current balance of a wallet, creating the wallet on first sight
    pub async fn balance(&self, wallet_address: &str) -> Result<PointBalance> {
        let wallet = self.resolver.resolve(wallet_address).await?;
        self.store
            .account(wallet.id)
            .await?
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::not_found("Wallet balance"))
    }

    /// Active task catalogue
    pub async fn tasks(&self) -> Result<Vec<Task>> {
        self.store.active_tasks().await
    }

    /// Tasks completed by a wallet
    pub async fn completed_tasks(&self, wallet_address: &str) -> Result<Vec<TaskCompletion>> {
        let wallet = self.resolver.resolve(wallet_address).await?;
        self.store.task_completions(wallet.id).await
    }

    /// Platform-wide minting statistics
    pub async fn mint_stats(&self) -> Result<MintStats> {
        let mut stats = self.store.mint_stats().await?;
        stats.minting_active = self.config.minting_active;
        Ok(stats)
    }

    /// Burns against a project, newest first
    pub async fn project_burns(&self, project_id: Uuid) -> Result<Vec<BurnRecord>> {
        self.store.project_burns(project_id).await
    }

    /// Burns made by a wallet, newest first
    pub async fn wallet_burns(&self, wallet_address: &str) -> Result<Vec<WalletBurn>> {
        let wallet = self.resolver.resolve(wallet_address).await?;
        self.store.wallet_burns(wallet.id).await
    }
}

//! PostgreSQL ledger store
//!
//! Every unit of work is one database transaction with `lock_timeout` and
//! `statement_timeout` set locally. Row locks are `SELECT ... FOR UPDATE`;
//! uniqueness is enforced by the schema's constraints and mapped to
//! `Duplicate`. Dropping a [`PgLedgerTx`] without committing rolls it back.

use crate::config::DatabaseConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use point_ledger::{
    Account, BurnRecord, LedgerError, LedgerStore, LedgerTx, MintRecord, MintStats,
    Participation, PlatformStats, PointBalance, Project, ProjectStatus, ReferralEvent,
    ReferralLink, Result, Task, TaskCompletion, Wallet, WalletBurn, WalletParticipation,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// Map a driver error onto the ledger taxonomy
pub fn db_err(err: sqlx::Error) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code();
            match code.as_deref() {
                Some("23505") => LedgerError::Duplicate(duplicate_message(db.constraint())),
                Some("23514") => LedgerError::State(format!(
                    "Constraint violated: {}",
                    db.constraint().unwrap_or("check")
                )),
                Some("22003") => LedgerError::Validation(format!(
                    "Amount is out of range: {}",
                    db.message()
                )),
                Some("55P03") | Some("57014") | Some("40001") | Some("40P01") => {
                    LedgerError::Retryable(db.message().to_string())
                }
                _ => {
                    error!("Database error: {}", err);
                    LedgerError::Storage(err.to_string())
                }
            }
        }
        sqlx::Error::PoolTimedOut => {
            LedgerError::Retryable("Timed out acquiring a database connection".to_string())
        }
        _ => {
            error!("Database error: {}", err);
            LedgerError::Storage(err.to_string())
        }
    }
}

fn duplicate_message(constraint: Option<&str>) -> String {
    match constraint {
        Some("uq_point_mints_tx_hash") => "Transaction already processed",
        Some("uq_star_burns_request_id") => "Burn already processed",
        Some("uq_participations_tx_hash") => "Participation transaction already processed",
        Some("uq_referral_events_referee") => "Wallet has already been referred",
        Some("uq_task_completions_task_wallet") => "Task already completed",
        Some("uq_referral_links_wallet") | Some("uq_referral_links_code") => {
            "Referral link already exists"
        }
        _ => "Record already exists",
    }
    .to_string()
}

// Rows

#[derive(Debug, FromRow)]
struct WalletRow {
    id: Uuid,
    wallet_address: String,
    created_at: DateTime<Utc>,
    received_initial_bonus: bool,
    total_points_earned: Decimal,
    last_activity_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            id: row.id,
            wallet_address: row.wallet_address,
            created_at: row.created_at,
            received_initial_bonus: row.received_initial_bonus,
            total_points_earned: row.total_points_earned,
            last_activity_at: row.last_activity_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    wallet_address: String,
    created_at: DateTime<Utc>,
    received_initial_bonus: bool,
    total_points_earned: Decimal,
    last_activity_at: DateTime<Utc>,
    star_points: Decimal,
    points_earned_from_minting: Decimal,
    points_earned_from_platform: Decimal,
    points_earned_from_referrals: Decimal,
    points_earned_from_tasks: Decimal,
    points_burned: Decimal,
    initial_bonus_received: bool,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            balance: PointBalance {
                wallet_id: row.id,
                wallet_address: row.wallet_address.clone(),
                star_points: row.star_points,
                points_earned_from_minting: row.points_earned_from_minting,
                points_earned_from_platform: row.points_earned_from_platform,
                points_earned_from_referrals: row.points_earned_from_referrals,
                points_earned_from_tasks: row.points_earned_from_tasks,
                points_burned: row.points_burned,
                initial_bonus_received: row.initial_bonus_received,
                updated_at: row.updated_at,
            },
            wallet: Wallet {
                id: row.id,
                wallet_address: row.wallet_address,
                created_at: row.created_at,
                received_initial_bonus: row.received_initial_bonus,
                total_points_earned: row.total_points_earned,
                last_activity_at: row.last_activity_at,
            },
        }
    }
}

#[derive(Debug, FromRow)]
struct ProjectRow {
    id: Uuid,
    creator_wallet_id: Uuid,
    creator_wallet_address: String,
    project_type: String,
    token_name: String,
    token_symbol: String,
    total_supply: Decimal,
    decimals: i32,
    description: String,
    logo_url: Option<String>,
    airdrop_percent: Decimal,
    liquidity_percent: Decimal,
    creator_percent: Decimal,
    initial_liquidity_xlm: Decimal,
    event_duration_days: i32,
    event_start_date: DateTime<Utc>,
    event_end_date: DateTime<Utc>,
    status: String,
    total_participations: i64,
    total_xlm_contributed: Decimal,
    total_star_distributed: Decimal,
    total_star_burned: Decimal,
    creator_star_earned: Decimal,
    token_created: bool,
    token_issuer: Option<String>,
    vesting_enabled: bool,
    vesting_months: Option<i32>,
    soroban_contract_id: Option<String>,
    asset_code: Option<String>,
    asset_issuer: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = LedgerError;

    fn try_from(row: ProjectRow) -> Result<Self> {
        let status = ProjectStatus::parse(&row.status).ok_or_else(|| {
            LedgerError::Storage(format!("Unknown project status '{}'", row.status))
        })?;

        Ok(Project {
            id: row.id,
            creator_wallet_id: row.creator_wallet_id,
            creator_wallet_address: row.creator_wallet_address,
            project_type: row.project_type,
            token_name: row.token_name,
            token_symbol: row.token_symbol,
            total_supply: row.total_supply,
            decimals: row.decimals,
            description: row.description,
            logo_url: row.logo_url,
            airdrop_percent: row.airdrop_percent,
            liquidity_percent: row.liquidity_percent,
            creator_percent: row.creator_percent,
            initial_liquidity_xlm: row.initial_liquidity_xlm,
            event_duration_days: row.event_duration_days,
            event_start_date: row.event_start_date,
            event_end_date: row.event_end_date,
            status,
            total_participations: row.total_participations,
            total_xlm_contributed: row.total_xlm_contributed,
            total_star_distributed: row.total_star_distributed,
            total_star_burned: row.total_star_burned,
            creator_star_earned: row.creator_star_earned,
            token_created: row.token_created,
            token_issuer: row.token_issuer,
            vesting_enabled: row.vesting_enabled,
            vesting_months: row.vesting_months,
            soroban_contract_id: row.soroban_contract_id,
            asset_code: row.asset_code,
            asset_issuer: row.asset_issuer,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn projects_from_rows(rows: Vec<ProjectRow>) -> Result<Vec<Project>> {
    rows.into_iter().map(Project::try_from).collect()
}

#[derive(Debug, FromRow)]
struct BurnRow {
    id: Uuid,
    project_id: Uuid,
    wallet_id: Uuid,
    wallet_address: String,
    star_burned: Decimal,
    star_to_creator: Decimal,
    star_destroyed: Decimal,
    request_id: String,
    created_at: DateTime<Utc>,
}

impl From<BurnRow> for BurnRecord {
    fn from(row: BurnRow) -> Self {
        BurnRecord {
            id: row.id,
            project_id: row.project_id,
            wallet_id: row.wallet_id,
            wallet_address: row.wallet_address,
            star_burned: row.star_burned,
            star_to_creator: row.star_to_creator,
            star_destroyed: row.star_destroyed,
            request_id: row.request_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct WalletBurnRow {
    id: Uuid,
    project_id: Uuid,
    project_name: Option<String>,
    project_symbol: Option<String>,
    star_burned: Decimal,
    created_at: DateTime<Utc>,
}

impl From<WalletBurnRow> for WalletBurn {
    fn from(row: WalletBurnRow) -> Self {
        WalletBurn {
            id: row.id,
            project_id: row.project_id,
            project_name: row.project_name,
            project_symbol: row.project_symbol,
            star_burned: row.star_burned,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ParticipationRow {
    id: Uuid,
    project_id: Uuid,
    participant_wallet_id: Uuid,
    participant_wallet_address: String,
    xlm_contributed: Decimal,
    participant_star_earned: Decimal,
    creator_star_earned: Decimal,
    transaction_hash: String,
    created_at: DateTime<Utc>,
}

impl From<ParticipationRow> for Participation {
    fn from(row: ParticipationRow) -> Self {
        Participation {
            id: row.id,
            project_id: row.project_id,
            participant_wallet_id: row.participant_wallet_id,
            participant_wallet_address: row.participant_wallet_address,
            xlm_contributed: row.xlm_contributed,
            participant_star_earned: row.participant_star_earned,
            creator_star_earned: row.creator_star_earned,
            transaction_hash: row.transaction_hash,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReferralLinkRow {
    id: Uuid,
    wallet_id: Uuid,
    wallet_address: String,
    referral_code: String,
    total_referrals: i64,
    successful_referrals: i64,
    created_at: DateTime<Utc>,
}

impl From<ReferralLinkRow> for ReferralLink {
    fn from(row: ReferralLinkRow) -> Self {
        ReferralLink {
            id: row.id,
            wallet_id: row.wallet_id,
            wallet_address: row.wallet_address,
            referral_code: row.referral_code,
            total_referrals: row.total_referrals,
            successful_referrals: row.successful_referrals,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    task_type: String,
    title: String,
    description: String,
    star_reward: Decimal,
    is_active: bool,
    max_completions: Option<i64>,
    completions: i64,
    created_at: DateTime<Utc>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            task_type: row.task_type,
            title: row.title,
            description: row.description,
            star_reward: row.star_reward,
            is_active: row.is_active,
            max_completions: row.max_completions,
            completions: row.completions,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TaskCompletionRow {
    id: Uuid,
    task_id: Uuid,
    wallet_id: Uuid,
    wallet_address: String,
    points_awarded: Decimal,
    proof_data: Option<serde_json::Value>,
    completed_at: DateTime<Utc>,
}

impl From<TaskCompletionRow> for TaskCompletion {
    fn from(row: TaskCompletionRow) -> Self {
        TaskCompletion {
            id: row.id,
            task_id: row.task_id,
            wallet_id: row.wallet_id,
            wallet_address: row.wallet_address,
            points_awarded: row.points_awarded,
            proof_data: row.proof_data,
            completed_at: row.completed_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PlatformStatsRow {
    users_with_initial_bonus: i64,
    total_bonus_distributed: Decimal,
}

#[derive(Debug, FromRow)]
struct MintStatsRow {
    total_xlm_received: Decimal,
    total_star_minted: Decimal,
    total_users: i64,
    users_with_initial_bonus: i64,
    total_star_distributed: Decimal,
}

const ACCOUNT_COLUMNS: &str = r#"
    w.id, w.wallet_address, w.created_at, w.received_initial_bonus,
    w.total_points_earned, w.last_activity_at,
    b.star_points, b.points_earned_from_minting, b.points_earned_from_platform,
    b.points_earned_from_referrals, b.points_earned_from_tasks, b.points_burned,
    b.initial_bonus_received, b.updated_at
"#;

/// Ledger tables in PostgreSQL
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout_ms: u64,
    statement_timeout_ms: u64,
}

impl PgLedgerStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(db_err)?;

        Ok(Self::with_pool(pool, config))
    }

    fn with_pool(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            lock_timeout_ms: config.lock_timeout_ms,
            statement_timeout_ms: config.statement_timeout_ms,
        }
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("Migration failed: {}", e)))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .bind(format!("{}ms", self.statement_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        Ok(Box::new(PgLedgerTx {
            tx,
            locked: HashSet::new(),
        }))
    }

    async fn upsert_wallet(&self, address: &str) -> Result<Wallet> {
        // Wallet and balance rows are created by one statement. When a
        // concurrent caller wins the insert, this statement's snapshot cannot
        // see its row, so fall through to a fresh read.
        let inserted = sqlx::query_as::<_, WalletRow>(
            r#"
            WITH inserted AS (
                INSERT INTO wallets (id, wallet_address, created_at, last_activity_at)
                VALUES ($1, $2, $3, $3)
                ON CONFLICT (wallet_address) DO NOTHING
                RETURNING *
            ), balance AS (
                INSERT INTO point_balances (wallet_id, wallet_address, updated_at)
                SELECT id, wallet_address, created_at FROM inserted
                ON CONFLICT (wallet_id) DO NOTHING
            )
            SELECT id, wallet_address, created_at, received_initial_bonus,
                   total_points_earned, last_activity_at
            FROM inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(address)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(row) = inserted {
            info!("Created wallet {} for {}", row.id, address);
            return Ok(row.into());
        }

        self.find_wallet(address)
            .await?
            .ok_or_else(|| LedgerError::Storage(format!("Wallet upsert lost for {}", address)))
    }

    async fn find_wallet(&self, address: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>("SELECT * FROM wallets WHERE wallet_address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Wallet::from))
    }

    async fn account(&self, wallet_id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM wallets w JOIN point_balances b ON b.wallet_id = w.id WHERE w.id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Account::from))
    }

    async fn insert_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (
                id, creator_wallet_id, creator_wallet_address, project_type, token_name,
                token_symbol, total_supply, decimals, description, logo_url,
                airdrop_percent, liquidity_percent, creator_percent, initial_liquidity_xlm,
                event_duration_days, event_start_date, event_end_date, status,
                total_participations, total_xlm_contributed, total_star_distributed,
                total_star_burned, creator_star_earned, token_created, token_issuer,
                vesting_enabled, vesting_months, soroban_contract_id, asset_code,
                asset_issuer, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29,
                    $30, $31, $32)
            "#,
        )
        .bind(project.id)
        .bind(project.creator_wallet_id)
        .bind(&project.creator_wallet_address)
        .bind(&project.project_type)
        .bind(&project.token_name)
        .bind(&project.token_symbol)
        .bind(project.total_supply)
        .bind(project.decimals)
        .bind(&project.description)
        .bind(&project.logo_url)
        .bind(project.airdrop_percent)
        .bind(project.liquidity_percent)
        .bind(project.creator_percent)
        .bind(project.initial_liquidity_xlm)
        .bind(project.event_duration_days)
        .bind(project.event_start_date)
        .bind(project.event_end_date)
        .bind(project.status.as_str())
        .bind(project.total_participations)
        .bind(project.total_xlm_contributed)
        .bind(project.total_star_distributed)
        .bind(project.total_star_burned)
        .bind(project.creator_star_earned)
        .bind(project.token_created)
        .bind(&project.token_issuer)
        .bind(project.vesting_enabled)
        .bind(project.vesting_months)
        .bind(&project.soroban_contract_id)
        .bind(&project.asset_code)
        .bind(&project.asset_issuer)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn project(&self, project_id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Project::try_from).transpose()
    }

    async fn active_projects(&self, now: DateTime<Utc>) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT * FROM projects
            WHERE status = 'active' AND event_end_date > $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        projects_from_rows(rows)
    }

    async fn project_burns(&self, project_id: Uuid) -> Result<Vec<BurnRecord>> {
        let rows = sqlx::query_as::<_, BurnRow>(
            "SELECT * FROM star_burns WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(BurnRecord::from).collect())
    }

    async fn wallet_burns(&self, wallet_id: Uuid) -> Result<Vec<WalletBurn>> {
        let rows = sqlx::query_as::<_, WalletBurnRow>(
            r#"
            SELECT b.id, b.project_id, p.token_name AS project_name,
                   p.token_symbol AS project_symbol, b.star_burned, b.created_at
            FROM star_burns b
            LEFT JOIN projects p ON p.id = b.project_id
            WHERE b.wallet_id = $1
            ORDER BY b.created_at DESC
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(WalletBurn::from).collect())
    }

    async fn burn_totals_by_wallet(&self, project_id: Uuid) -> Result<Vec<(String, Decimal)>> {
        sqlx::query_as::<_, (String, Decimal)>(
            r#"
            SELECT wallet_address, SUM(star_burned)
            FROM star_burns
            WHERE project_id = $1
            GROUP BY wallet_address
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn project_participations(&self, project_id: Uuid) -> Result<Vec<Participation>> {
        let rows = sqlx::query_as::<_, ParticipationRow>(
            "SELECT * FROM project_participations WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Participation::from).collect())
    }

    async fn wallet_participations(&self, wallet_id: Uuid) -> Result<Vec<WalletParticipation>> {
        let rows = sqlx::query_as::<_, ParticipationRow>(
            r#"
            SELECT * FROM project_participations
            WHERE participant_wallet_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let project_ids: Vec<Uuid> = rows.iter().map(|r| r.project_id).collect();
        let projects: HashMap<Uuid, Project> = projects_from_rows(
            sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ANY($1)")
                .bind(&project_ids)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?,
        )?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

        Ok(rows
            .into_iter()
            .map(|row| WalletParticipation {
                project: projects.get(&row.project_id).cloned(),
                participation: row.into(),
            })
            .collect())
    }

    async fn referral_link_for_wallet(&self, wallet_id: Uuid) -> Result<Option<ReferralLink>> {
        let row = sqlx::query_as::<_, ReferralLinkRow>(
            "SELECT * FROM referral_links WHERE wallet_id = $1",
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(ReferralLink::from))
    }

    async fn referral_link_by_code(&self, code: &str) -> Result<Option<ReferralLink>> {
        let row = sqlx::query_as::<_, ReferralLinkRow>(
            "SELECT * FROM referral_links WHERE referral_code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(ReferralLink::from))
    }

    async fn insert_referral_link(&self, link: &ReferralLink) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO referral_links
                (id, wallet_id, wallet_address, referral_code, total_referrals,
                 successful_referrals, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(link.id)
        .bind(link.wallet_id)
        .bind(&link.wallet_address)
        .bind(&link.referral_code)
        .bind(link.total_referrals)
        .bind(link.successful_referrals)
        .bind(link.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn seed_task(&self, task: &Task) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks
                (id, task_type, title, description, star_reward, is_active,
                 max_completions, completions, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (task_type) DO NOTHING
            "#,
        )
        .bind(task.id)
        .bind(&task.task_type)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.star_reward)
        .bind(task.is_active)
        .bind(task.max_completions)
        .bind(task.completions)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn task(&self, task_id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Task::from))
    }

    async fn active_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE is_active ORDER BY created_at, task_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    async fn task_completions(&self, wallet_id: Uuid) -> Result<Vec<TaskCompletion>> {
        let rows = sqlx::query_as::<_, TaskCompletionRow>(
            "SELECT * FROM task_completions WHERE wallet_id = $1 ORDER BY completed_at DESC",
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(TaskCompletion::from).collect())
    }

    async fn mint_stats(&self) -> Result<MintStats> {
        let row = sqlx::query_as::<_, MintStatsRow>(
            r#"
            SELECT
                (SELECT COALESCE(SUM(xlm_amount), 0) FROM point_mints) AS total_xlm_received,
                (SELECT COALESCE(SUM(star_points_awarded), 0) FROM point_mints) AS total_star_minted,
                (SELECT COUNT(*) FROM wallets) AS total_users,
                (SELECT COALESCE(MAX(users_with_initial_bonus), 0) FROM platform_stats)
                    AS users_with_initial_bonus,
                (SELECT COALESCE(SUM(points_earned_from_minting + points_earned_from_platform
                                     + points_earned_from_referrals + points_earned_from_tasks), 0)
                 FROM point_balances) AS total_star_distributed
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(MintStats {
            total_xlm_received: row.total_xlm_received,
            total_star_minted: row.total_star_minted,
            total_users: row.total_users,
            users_with_initial_bonus: row.users_with_initial_bonus,
            total_star_distributed: row.total_star_distributed,
            minting_active: true,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Locked {
    Account(Uuid),
    Project(Uuid),
    ReferralLink(Uuid),
    Task(Uuid),
    PlatformStats,
}

/// One database transaction
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
    locked: HashSet<Locked>,
}

impl PgLedgerTx {
    fn ensure_locked(&self, key: Locked) -> Result<()> {
        if self.locked.contains(&key) {
            Ok(())
        } else {
            Err(LedgerError::Storage(format!("{:?} written without a row lock", key)))
        }
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_account(&mut self, wallet_id: Uuid) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            SELECT {}
            FROM wallets w
            JOIN point_balances b ON b.wallet_id = w.id
            WHERE w.id = $1
            FOR UPDATE OF w, b
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LedgerError::NotFound("Wallet balance".to_string()))?;

        self.locked.insert(Locked::Account(wallet_id));
        Ok(row.into())
    }

    async fn lock_project(&mut self, project_id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1 FOR UPDATE")
            .bind(project_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;

        if row.is_some() {
            self.locked.insert(Locked::Project(project_id));
        }
        row.map(Project::try_from).transpose()
    }

    async fn lock_referral_link(&mut self, code: &str) -> Result<Option<ReferralLink>> {
        let row = sqlx::query_as::<_, ReferralLinkRow>(
            "SELECT * FROM referral_links WHERE referral_code = $1 FOR UPDATE",
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| {
            self.locked.insert(Locked::ReferralLink(r.id));
            r.into()
        }))
    }

    async fn lock_task(&mut self, task_id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;

        if row.is_some() {
            self.locked.insert(Locked::Task(task_id));
        }
        Ok(row.map(Task::from))
    }

    async fn lock_platform_stats(&mut self) -> Result<PlatformStats> {
        let row = sqlx::query_as::<_, PlatformStatsRow>(
            r#"
            SELECT users_with_initial_bonus, total_bonus_distributed
            FROM platform_stats WHERE id = 1
            FOR UPDATE
            "#,
        )
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LedgerError::Storage("platform_stats row missing".to_string()))?;

        self.locked.insert(Locked::PlatformStats);
        Ok(PlatformStats {
            users_with_initial_bonus: row.users_with_initial_bonus,
            total_bonus_distributed: row.total_bonus_distributed,
        })
    }

    async fn find_burn(&mut self, request_id: &str) -> Result<Option<BurnRecord>> {
        let row = sqlx::query_as::<_, BurnRow>("SELECT * FROM star_burns WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(row.map(BurnRecord::from))
    }

    async fn save_account(&mut self, account: &Account) -> Result<()> {
        self.ensure_locked(Locked::Account(account.id()))?;

        sqlx::query(
            r#"
            UPDATE wallets
            SET received_initial_bonus = $2, total_points_earned = $3, last_activity_at = $4
            WHERE id = $1
            "#,
        )
        .bind(account.wallet.id)
        .bind(account.wallet.received_initial_bonus)
        .bind(account.wallet.total_points_earned)
        .bind(account.wallet.last_activity_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let balance = &account.balance;
        sqlx::query(
            r#"
            UPDATE point_balances
            SET star_points = $2,
                points_earned_from_minting = $3,
                points_earned_from_platform = $4,
                points_earned_from_referrals = $5,
                points_earned_from_tasks = $6,
                points_burned = $7,
                initial_bonus_received = $8,
                updated_at = $9
            WHERE wallet_id = $1
            "#,
        )
        .bind(balance.wallet_id)
        .bind(balance.star_points)
        .bind(balance.points_earned_from_minting)
        .bind(balance.points_earned_from_platform)
        .bind(balance.points_earned_from_referrals)
        .bind(balance.points_earned_from_tasks)
        .bind(balance.points_burned)
        .bind(balance.initial_bonus_received)
        .bind(balance.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_project(&mut self, project: &Project) -> Result<()> {
        self.ensure_locked(Locked::Project(project.id))?;

        sqlx::query(
            r#"
            UPDATE projects
            SET status = $2,
                total_participations = $3,
                total_xlm_contributed = $4,
                total_star_distributed = $5,
                total_star_burned = $6,
                creator_star_earned = $7,
                token_created = $8,
                token_issuer = $9,
                event_end_date = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(project.id)
        .bind(project.status.as_str())
        .bind(project.total_participations)
        .bind(project.total_xlm_contributed)
        .bind(project.total_star_distributed)
        .bind(project.total_star_burned)
        .bind(project.creator_star_earned)
        .bind(project.token_created)
        .bind(&project.token_issuer)
        .bind(project.event_end_date)
        .bind(project.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_referral_link(&mut self, link: &ReferralLink) -> Result<()> {
        self.ensure_locked(Locked::ReferralLink(link.id))?;

        sqlx::query(
            r#"
            UPDATE referral_links
            SET total_referrals = $2, successful_referrals = $3
            WHERE id = $1
            "#,
        )
        .bind(link.id)
        .bind(link.total_referrals)
        .bind(link.successful_referrals)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_task(&mut self, task: &Task) -> Result<()> {
        self.ensure_locked(Locked::Task(task.id))?;

        sqlx::query("UPDATE tasks SET completions = $2, is_active = $3 WHERE id = $1")
            .bind(task.id)
            .bind(task.completions)
            .bind(task.is_active)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn save_platform_stats(&mut self, stats: &PlatformStats) -> Result<()> {
        self.ensure_locked(Locked::PlatformStats)?;

        sqlx::query(
            r#"
            UPDATE platform_stats
            SET users_with_initial_bonus = $1, total_bonus_distributed = $2
            WHERE id = 1
            "#,
        )
        .bind(stats.users_with_initial_bonus)
        .bind(stats.total_bonus_distributed)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_mint(&mut self, record: &MintRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO point_mints
                (id, wallet_id, wallet_address, xlm_amount, star_points_awarded,
                 transaction_hash, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.wallet_id)
        .bind(&record.wallet_address)
        .bind(record.xlm_amount)
        .bind(record.star_points_awarded)
        .bind(&record.transaction_hash)
        .bind(&record.status)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_burn(&mut self, record: &BurnRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO star_burns
                (id, project_id, wallet_id, wallet_address, star_burned,
                 star_to_creator, star_destroyed, request_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.project_id)
        .bind(record.wallet_id)
        .bind(&record.wallet_address)
        .bind(record.star_burned)
        .bind(record.star_to_creator)
        .bind(record.star_destroyed)
        .bind(&record.request_id)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_participation(&mut self, record: &Participation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_participations
                (id, project_id, participant_wallet_id, participant_wallet_address,
                 xlm_contributed, participant_star_earned, creator_star_earned,
                 transaction_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.project_id)
        .bind(record.participant_wallet_id)
        .bind(&record.participant_wallet_address)
        .bind(record.xlm_contributed)
        .bind(record.participant_star_earned)
        .bind(record.creator_star_earned)
        .bind(&record.transaction_hash)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_referral_event(&mut self, record: &ReferralEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO referral_events
                (id, referrer_wallet_id, referee_wallet_id, referral_code, status,
                 points_awarded, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.referrer_wallet_id)
        .bind(record.referee_wallet_id)
        .bind(&record.referral_code)
        .bind(&record.status)
        .bind(record.points_awarded)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_task_completion(&mut self, record: &TaskCompletion) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_completions
                (id, task_id, wallet_id, wallet_address, points_awarded, proof_data, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.task_id)
        .bind(record.wallet_id)
        .bind(&record.wallet_address)
        .bind(record.points_awarded)
        .bind(&record.proof_data)
        .bind(record.completed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_messages_follow_constraints() {
        assert_eq!(
            duplicate_message(Some("uq_star_burns_request_id")),
            "Burn already processed"
        );
        assert_eq!(
            duplicate_message(Some("uq_point_mints_tx_hash")),
            "Transaction already processed"
        );
        assert_eq!(duplicate_message(None), "Record already exists");
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        assert!(db_err(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(matches!(
            db_err(sqlx::Error::RowNotFound),
            LedgerError::Storage(_)
        ));
    }

    #[test]
    fn test_unknown_status_is_storage_error() {
        let now = Utc::now();
        let row = ProjectRow {
            id: Uuid::new_v4(),
            creator_wallet_id: Uuid::new_v4(),
            creator_wallet_address: "GCREATOR".into(),
            project_type: "token_launch".into(),
            token_name: "Nova".into(),
            token_symbol: "NOVA".into(),
            total_supply: Decimal::from(1_000_000),
            decimals: 7,
            description: String::new(),
            logo_url: None,
            airdrop_percent: Decimal::from(20),
            liquidity_percent: Decimal::from(20),
            creator_percent: Decimal::from(60),
            initial_liquidity_xlm: Decimal::from(1000),
            event_duration_days: 7,
            event_start_date: now,
            event_end_date: now,
            status: "paused".into(),
            total_participations: 0,
            total_xlm_contributed: Decimal::ZERO,
            total_star_distributed: Decimal::ZERO,
            total_star_burned: Decimal::ZERO,
            creator_star_earned: Decimal::ZERO,
            token_created: false,
            token_issuer: None,
            vesting_enabled: false,
            vesting_months: None,
            soroban_contract_id: None,
            asset_code: None,
            asset_issuer: None,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(Project::try_from(row), Err(LedgerError::Storage(_))));
    }
}

#[cfg(test)]
mod pg_tests {
    use super::*;
    use crate::config::StorageBackend;
    use point_ledger::{
        BurnRequest, EngineConfig, MockTokenIssuer, NewProject, PointEngine, ProjectManager,
    };
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        store: Arc<PgLedgerStore>,
        engine: PointEngine,
        projects: ProjectManager,
        run: String,
    }

    impl Fixture {
        fn address(&self, name: &str) -> String {
            format!("G{}{}", name, self.run)
        }

        fn key(&self, name: &str) -> String {
            format!("{}-{}", name, self.run)
        }
    }

    async fn fixture(lock_timeout_ms: u64) -> Fixture {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let config = DatabaseConfig {
            backend: StorageBackend::Postgres,
            url,
            max_connections: 10,
            min_connections: 2,
            acquire_timeout_secs: 5,
            statement_timeout_ms: 5000,
            lock_timeout_ms,
        };
        let store = Arc::new(PgLedgerStore::connect(&config).await.unwrap());
        store.migrate().await.unwrap();

        let engine_config = EngineConfig::default();
        Fixture {
            engine: PointEngine::new(store.clone(), engine_config.clone()),
            projects: ProjectManager::new(
                store.clone(),
                Arc::new(MockTokenIssuer::new()),
                engine_config,
            ),
            store,
            run: Uuid::new_v4().simple().to_string().to_uppercase(),
        }
    }

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn test_concurrent_burns_never_overdraw() {
        let f = fixture(3000).await;
        let user = f.address("USER");
        let project = f
            .projects
            .create_project(NewProject::for_creator(f.address("CREATOR")))
            .await
            .unwrap();
        f.engine.mint(&user, dec!(10), &f.key("mint")).await.unwrap();

        let burn = |request_id: String| BurnRequest {
            wallet_address: user.clone(),
            project_id: project.id,
            star_amount: dec!(60.00),
            request_id,
        };
        let (a, b) = tokio::join!(
            f.engine.burn(burn(f.key("burn-a"))),
            f.engine.burn(burn(f.key("burn-b")))
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().any(|r| matches!(
            r,
            Err(LedgerError::InsufficientBalance { .. })
        )));

        let balance = f.engine.balance(&user).await.unwrap();
        assert_eq!(balance.star_points, dec!(40.00));
        assert_eq!(balance.points_burned, dec!(60.00));
        assert!(balance.is_consistent());
    }

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn test_concurrent_first_contact_creates_one_wallet() {
        let f = fixture(3000).await;
        let address = f.address("NEW");

        let (a, b, c) = tokio::join!(
            f.store.upsert_wallet(&address),
            f.store.upsert_wallet(&address),
            f.store.upsert_wallet(&address)
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.id, b.id);
        assert_eq!(b.id, c.id);

        let account = f.store.account(a.id).await.unwrap().unwrap();
        assert_eq!(account.balance.star_points, Decimal::ZERO);
    }

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn test_mint_replay_is_duplicate() {
        let f = fixture(3000).await;
        let user = f.address("USER");
        let hash = f.key("hash");

        f.engine.mint(&user, dec!(10), &hash).await.unwrap();
        let err = f.engine.mint(&user, dec!(10), &hash).await.unwrap_err();
        assert!(matches!(err, LedgerError::Duplicate(_)), "{:?}", err);

        assert_eq!(f.engine.balance(&user).await.unwrap().star_points, dec!(100));
    }

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn test_schema_constraints_map_to_ledger_errors() {
        let f = fixture(3000).await;
        let wallet = f.store.upsert_wallet(&f.address("USER")).await.unwrap();

        let mut tx = f.store.begin().await.unwrap();
        let mut account = tx.lock_account(wallet.id).await.unwrap();
        account.balance.star_points = dec!(-1);
        let err = tx.save_account(&account).await.unwrap_err();
        assert!(matches!(err, LedgerError::State(_)), "{:?}", err);
        drop(tx);

        let mut tx = f.store.begin().await.unwrap();
        let mut account = tx.lock_account(wallet.id).await.unwrap();
        account.balance.star_points = dec!(1000000000000000000);
        let err = tx.save_account(&account).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "{:?}", err);
        drop(tx);

        let account = f.store.account(wallet.id).await.unwrap().unwrap();
        assert_eq!(account.balance.star_points, Decimal::ZERO);
    }

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn test_lock_wait_is_bounded() {
        let f = fixture(200).await;
        let wallet = f.store.upsert_wallet(&f.address("USER")).await.unwrap();

        let mut holder = f.store.begin().await.unwrap();
        holder.lock_account(wallet.id).await.unwrap();

        let mut waiter = f.store.begin().await.unwrap();
        let err = waiter.lock_account(wallet.id).await.unwrap_err();
        assert!(err.is_retryable(), "{:?}", err);

        drop(waiter);
        holder.commit().await.unwrap();
    }
}

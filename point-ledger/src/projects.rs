//! Project lifecycle: creation, participation, finalization and airdrop stats

use crate::amount::{
    airdrop_tokens, allocation, normalize_percents, round_xlm, validate_xlm_amount,
    MAX_TOKEN_SUPPLY, MAX_XLM_AMOUNT, XLM_SCALE,
};
use crate::config::EngineConfig;
use crate::engine::{lock_accounts, validate_key};
use crate::error::{LedgerError, Result};
use crate::issuer::{TokenIssueParams, TokenIssuer};
use crate::resolver::{normalize_address, WalletResolver};
use crate::store::LedgerStore;
use crate::types::{
    Participation, PointCategory, Project, ProjectStatus, WalletParticipation,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_PROJECT_TYPE: &str = "token_launch";
const DEFAULT_TOTAL_SUPPLY: i64 = 1_000_000;
const DEFAULT_INITIAL_LIQUIDITY_XLM: i64 = 1000;
const DEFAULT_EVENT_DURATION_DAYS: i32 = 7;
const MAX_EVENT_DURATION_DAYS: i32 = 365;
const MAX_SYMBOL_LEN: usize = 12;
const MAX_NAME_LEN: usize = 64;
const MAX_ASSET_CODE_LEN: usize = 12;

/// Parameters for a new project; omitted fields take the platform defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewProject {
    pub creator_wallet_address: String,
    pub project_type: Option<String>,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
    pub total_supply: Option<Decimal>,
    pub decimals: Option<i32>,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub airdrop_percent: Option<Decimal>,
    pub liquidity_percent: Option<Decimal>,
    #[serde(rename = "initialLiquidityXLM")]
    pub initial_liquidity_xlm: Option<Decimal>,
    pub event_duration_days: Option<i32>,
    pub vesting_enabled: Option<bool>,
    pub vesting_months: Option<i32>,
    pub soroban_contract_id: Option<String>,
    pub asset_code: Option<String>,
    pub asset_issuer: Option<String>,
}

impl NewProject {
    /// All-defaults project for `creator`
    pub fn for_creator(creator: impl Into<String>) -> Self {
        Self {
            creator_wallet_address: creator.into(),
            ..Self::default()
        }
    }
}

/// A participation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipateRequest {
    pub project_id: Uuid,
    pub participant_wallet_address: String,
    pub xlm_amount: Decimal,
    pub transaction_hash: String,
}

/// Result of a participation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationReceipt {
    pub participation: Participation,
    pub participant_new_balance: Decimal,
}

/// Result of finalizing a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeReceipt {
    pub issuer_public_key: String,
    pub asset_code: String,
    pub project: Project,
}

/// A wallet's share of the airdrop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAllocation {
    pub wallet_address: String,
    pub star_burned: Decimal,
    /// Share of all burns, percent
    pub percentage: Decimal,
    pub token_allocation: Decimal,
}

/// Airdrop statistics of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub project_id: Uuid,
    pub project_name: String,
    pub project_symbol: String,
    pub total_star_burned: Decimal,
    pub creator_star_earned: Decimal,
    pub total_participants: i64,
    pub airdrop_tokens: Decimal,
    /// Largest burners first
    pub participants: Vec<ParticipantAllocation>,
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_asset_code(code: Option<String>) -> Result<Option<String>> {
    match optional_text(code) {
        Some(code)
            if code.len() > MAX_ASSET_CODE_LEN
                || code.chars().any(|c| !c.is_ascii_alphanumeric()) =>
        {
            Err(LedgerError::Validation(format!(
                "Asset code must be 1 to {} alphanumeric characters",
                MAX_ASSET_CODE_LEN
            )))
        }
        code => Ok(code),
    }
}

fn validate_chain_id(value: Option<String>) -> Result<Option<String>> {
    optional_text(value)
        .map(|v| normalize_address(&v).map(str::to_string))
        .transpose()
}

fn validate_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty()
        || symbol.len() > MAX_SYMBOL_LEN
        || !symbol.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(LedgerError::Validation(format!(
            "Token symbol must be 1-{} alphanumeric characters",
            MAX_SYMBOL_LEN
        )));
    }
    Ok(symbol)
}

/// Creates and finalizes projects, records participations
#[derive(Clone)]
pub struct ProjectManager {
    store: Arc<dyn LedgerStore>,
    resolver: WalletResolver,
    issuer: Arc<dyn TokenIssuer>,
    config: EngineConfig,
}

impl ProjectManager {
    /// Manager over `store`, issuing tokens through `issuer`
    pub fn new(
        store: Arc<dyn LedgerStore>,
        issuer: Arc<dyn TokenIssuer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            resolver: WalletResolver::new(store.clone()),
            store,
            issuer,
            config,
        }
    }

    /// Create an active project.
    ///
    /// Airdrop and liquidity percentages summing past 100 are rescaled to sum
    /// to 80; the creator keeps the remainder.
    #[instrument(skip(self, params), fields(creator = %params.creator_wallet_address))]
    pub async fn create_project(&self, params: NewProject) -> Result<Project> {
        let duration = params
            .event_duration_days
            .unwrap_or(DEFAULT_EVENT_DURATION_DAYS);
        if !(1..=MAX_EVENT_DURATION_DAYS).contains(&duration) {
            return Err(LedgerError::Validation(format!(
                "Event duration must be between 1 and {} days",
                MAX_EVENT_DURATION_DAYS
            )));
        }

        let decimals = params.decimals.unwrap_or(XLM_SCALE as i32);
        if !(0..=XLM_SCALE as i32).contains(&decimals) {
            return Err(LedgerError::Validation(format!(
                "Decimals must be between 0 and {}",
                XLM_SCALE
            )));
        }

        let total_supply = params
            .total_supply
            .unwrap_or_else(|| Decimal::from(DEFAULT_TOTAL_SUPPLY));
        if total_supply <= Decimal::ZERO || round_xlm(total_supply) != total_supply {
            return Err(LedgerError::Validation(
                "Total supply must be a positive amount".to_string(),
            ));
        }
        if total_supply >= MAX_TOKEN_SUPPLY {
            return Err(LedgerError::Validation(
                "Total supply is out of range".to_string(),
            ));
        }

        let initial_liquidity_xlm = params
            .initial_liquidity_xlm
            .unwrap_or_else(|| Decimal::from(DEFAULT_INITIAL_LIQUIDITY_XLM));
        if initial_liquidity_xlm < Decimal::ZERO {
            return Err(LedgerError::Validation(
                "Initial liquidity cannot be negative".to_string(),
            ));
        }
        if initial_liquidity_xlm >= MAX_XLM_AMOUNT
            || round_xlm(initial_liquidity_xlm) != initial_liquidity_xlm
        {
            return Err(LedgerError::Validation(
                "Initial liquidity is out of range".to_string(),
            ));
        }

        if params.vesting_months.map_or(false, |m| m < 0) {
            return Err(LedgerError::Validation(
                "Vesting months cannot be negative".to_string(),
            ));
        }

        let percents = normalize_percents(
            params.airdrop_percent.unwrap_or_else(|| Decimal::from(20)),
            params.liquidity_percent.unwrap_or_else(|| Decimal::from(20)),
        )?;

        let token_symbol = validate_symbol(params.token_symbol.as_deref().unwrap_or("STAR"))?;
        let token_name = params
            .token_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{} Token", token_symbol));
        if token_name.len() > MAX_NAME_LEN {
            return Err(LedgerError::Validation(format!(
                "Token name must be at most {} characters",
                MAX_NAME_LEN
            )));
        }

        let soroban_contract_id = validate_chain_id(params.soroban_contract_id)?;
        let asset_code = validate_asset_code(params.asset_code)?;
        let asset_issuer = validate_chain_id(params.asset_issuer)?;

        let creator = self.resolver.resolve(&params.creator_wallet_address).await?;
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            creator_wallet_id: creator.id,
            creator_wallet_address: creator.wallet_address,
            project_type: params
                .project_type
                .unwrap_or_else(|| DEFAULT_PROJECT_TYPE.to_string()),
            token_name,
            token_symbol,
            total_supply,
            decimals,
            description: params.description.unwrap_or_default(),
            logo_url: params.logo_url,
            airdrop_percent: percents.airdrop,
            liquidity_percent: percents.liquidity,
            creator_percent: percents.creator,
            initial_liquidity_xlm,
            event_duration_days: duration,
            event_start_date: now,
            event_end_date: now + Duration::days(duration as i64),
            status: ProjectStatus::Active,
            total_participations: 0,
            total_xlm_contributed: Decimal::ZERO,
            total_star_distributed: Decimal::ZERO,
            total_star_burned: Decimal::ZERO,
            creator_star_earned: Decimal::ZERO,
            token_created: false,
            token_issuer: None,
            vesting_enabled: params.vesting_enabled.unwrap_or(false),
            vesting_months: params.vesting_months,
            soroban_contract_id,
            asset_code,
            asset_issuer,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_project(&project).await?;
        info!(
            "Created project {} ({}) ending {}",
            project.id, project.token_symbol, project.event_end_date
        );
        Ok(project)
    }

    /// Project by id
    pub async fn project(&self, project_id: Uuid) -> Result<Project> {
        self.store
            .project(project_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Project"))
    }

    /// Projects still accepting burns and participations, newest first
    pub async fn active_projects(&self) -> Result<Vec<Project>> {
        self.store.active_projects(Utc::now()).await
    }

    /// Record an XLM contribution and reward participant and creator.
    ///
    /// Both accounts are locked in ascending wallet id order before the
    /// project row. A creator participating in their own project gets both
    /// rewards on the one account.
    #[instrument(skip(self, request), fields(project = %request.project_id, participant = %request.participant_wallet_address))]
    pub async fn participate(&self, request: ParticipateRequest) -> Result<ParticipationReceipt> {
        let xlm_amount = validate_xlm_amount(request.xlm_amount)?;
        let transaction_hash = validate_key(&request.transaction_hash, "transactionHash")?;

        let project = self.project(request.project_id).await?;
        project.ensure_open(Utc::now())?;

        let participant = self
            .resolver
            .resolve(&request.participant_wallet_address)
            .await?;
        let participant_reward = self.config.participant_reward;
        let creator_reward = self.config.creator_reward;

        let mut tx = self.store.begin().await?;
        let mut accounts = lock_accounts(
            tx.as_mut(),
            &[participant.id, project.creator_wallet_id],
        )
        .await?;
        let mut project = tx
            .lock_project(request.project_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Project"))?;
        let now = Utc::now();
        project.ensure_open(now)?;

        if let Some(account) = accounts.get_mut(&participant.id) {
            account.credit(PointCategory::Platform, participant_reward, now)?;
        }
        if let Some(account) = accounts.get_mut(&project.creator_wallet_id) {
            account.credit(PointCategory::Platform, creator_reward, now)?;
        }
        project.record_participation(xlm_amount, participant_reward, creator_reward, now);

        let participation = Participation {
            id: Uuid::new_v4(),
            project_id: project.id,
            participant_wallet_id: participant.id,
            participant_wallet_address: participant.wallet_address.clone(),
            xlm_contributed: xlm_amount,
            participant_star_earned: participant_reward,
            creator_star_earned: creator_reward,
            transaction_hash: transaction_hash.to_string(),
            created_at: now,
        };

        if let Err(e) = tx.insert_participation(&participation).await {
            warn!("Participation rejected for {}: {}", participant.wallet_address, e);
            return Err(e);
        }
        for account in accounts.values() {
            tx.save_account(account).await?;
        }
        tx.save_project(&project).await?;
        tx.commit().await?;

        info!(
            "Participation of {} XLM in project {} by {}",
            xlm_amount, project.id, participant.wallet_address
        );

        let participant_new_balance = accounts
            .get(&participant.id)
            .map(|a| a.balance.star_points)
            .unwrap_or_default();

        Ok(ParticipationReceipt {
            participation,
            participant_new_balance,
        })
    }

    /// Issue the project's token once its event has ended.
    ///
    /// The issuer is called outside any lock; the project is then locked and
    /// re-checked so a concurrent finalization cannot mark it twice.
    #[instrument(skip(self))]
    pub async fn finalize(
        &self,
        project_id: Uuid,
        distributor_public_key: &str,
    ) -> Result<FinalizeReceipt> {
        let distributor = normalize_address(distributor_public_key)?;
        let project = self.project(project_id).await?;
        project.ensure_finalizable(Utc::now())?;

        let params = TokenIssueParams {
            name: project.token_name.clone(),
            symbol: project.token_symbol.clone(),
            decimals: project.decimals,
            total_supply: project.total_supply,
            mintable: true,
            burnable: false,
            distributor_public_key: distributor.to_string(),
        };

        let issued = match self.issuer.issue_token(&params).await {
            Ok(issued) => issued,
            Err(e) => {
                error!("Token issuance failed for project {}: {}", project_id, e);
                return Err(e);
            }
        };

        let mut tx = self.store.begin().await?;
        let mut project = tx
            .lock_project(project_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Project"))?;
        let now = Utc::now();
        if let Err(e) = project.ensure_finalizable(now) {
            warn!(
                "Project {} finalized concurrently; issued token {} left unrecorded",
                project_id, issued.issuer_public_key
            );
            return Err(e);
        }

        project.complete(issued.issuer_public_key.clone(), now);
        tx.save_project(&project).await?;
        tx.commit().await?;

        info!(
            "Project {} finalized, token {} issued by {}",
            project_id, issued.asset_code, issued.issuer_public_key
        );

        Ok(FinalizeReceipt {
            issuer_public_key: issued.issuer_public_key,
            asset_code: issued.asset_code,
            project,
        })
    }

    /// Airdrop allocation per burning wallet
    pub async fn project_stats(&self, project_id: Uuid) -> Result<ProjectStats> {
        let project = self.project(project_id).await?;
        let totals = self.store.burn_totals_by_wallet(project_id).await?;
        let airdrop = airdrop_tokens(project.total_supply, project.airdrop_percent)?;

        // Shares are taken against the same snapshot they are summed from,
        // never against the project counter which may have moved since.
        let total_burned: Decimal = totals.iter().map(|(_, burned)| *burned).sum();

        let mut participants = Vec::with_capacity(totals.len());
        for (wallet_address, burned) in totals {
            if let Some(a) = allocation(burned, total_burned, airdrop)? {
                participants.push(ParticipantAllocation {
                    wallet_address,
                    star_burned: burned,
                    percentage: a.percentage,
                    token_allocation: a.token_allocation,
                });
            }
        }
        participants.sort_by(|a, b| {
            b.star_burned
                .cmp(&a.star_burned)
                .then_with(|| a.wallet_address.cmp(&b.wallet_address))
        });

        Ok(ProjectStats {
            project_id: project.id,
            project_name: project.token_name,
            project_symbol: project.token_symbol,
            total_star_burned: total_burned,
            creator_star_earned: project.creator_star_earned,
            total_participants: project.total_participations,
            airdrop_tokens: airdrop,
            participants,
        })
    }

    /// Participations in a project, newest first
    pub async fn project_participations(&self, project_id: Uuid) -> Result<Vec<Participation>> {
        self.store.project_participations(project_id).await
    }

    /// Participations by a wallet, newest first
    pub async fn wallet_participations(
        &self,
        wallet_address: &str,
    ) -> Result<Vec<WalletParticipation>> {
        let wallet = self.resolver.resolve(wallet_address).await?;
        self.store.wallet_participations(wallet.id).await
    }
}

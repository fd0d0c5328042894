//! Core types for the point ledger
//!
//! All point and XLM quantities are exact decimals. Records (mints, burns,
//! participations, referral events, task completions) are immutable receipts;
//! balances and project counters are the only mutable rows.

use crate::amount::{round_points, MAX_POINT_AMOUNT};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Wallet identity keyed by an external address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    /// Internal identifier
    pub id: Uuid,
    /// External (Stellar) address, unique
    pub wallet_address: String,
    /// First sighting
    pub created_at: DateTime<Utc>,
    /// One-time bonus already granted
    pub received_initial_bonus: bool,
    /// Lifetime points earned, never decreases
    pub total_points_earned: Decimal,
    /// Last point-earning or spending activity
    pub last_activity_at: DateTime<Utc>,
}

impl Wallet {
    /// Fresh wallet for `address`
    pub fn new(address: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_address: address.into(),
            created_at: now,
            received_initial_bonus: false,
            total_points_earned: Decimal::ZERO,
            last_activity_at: now,
        }
    }
}

/// Category a credit is booked under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointCategory {
    /// XLM to STAR conversion
    Minting,
    /// Platform activity: initial bonus, project participation
    Platform,
    /// Referral rewards
    Referral,
    /// Task rewards
    Tasks,
}

impl PointCategory {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            PointCategory::Minting => "minting",
            PointCategory::Platform => "platform",
            PointCategory::Referral => "referral",
            PointCategory::Tasks => "tasks",
        }
    }
}

impl fmt::Display for PointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spendable balance and category breakdown of one wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointBalance {
    /// Owning wallet
    pub wallet_id: Uuid,
    /// Owning wallet address
    pub wallet_address: String,
    /// Current spendable balance
    pub star_points: Decimal,
    /// Credits from minting
    pub points_earned_from_minting: Decimal,
    /// Credits from platform activity
    pub points_earned_from_platform: Decimal,
    /// Credits from referrals
    pub points_earned_from_referrals: Decimal,
    /// Credits from tasks
    pub points_earned_from_tasks: Decimal,
    /// Cumulative points burned
    pub points_burned: Decimal,
    /// Initial bonus credited
    pub initial_bonus_received: bool,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl PointBalance {
    /// Zero balance for a new wallet
    pub fn empty(wallet: &Wallet) -> Self {
        Self {
            wallet_id: wallet.id,
            wallet_address: wallet.wallet_address.clone(),
            star_points: Decimal::ZERO,
            points_earned_from_minting: Decimal::ZERO,
            points_earned_from_platform: Decimal::ZERO,
            points_earned_from_referrals: Decimal::ZERO,
            points_earned_from_tasks: Decimal::ZERO,
            points_burned: Decimal::ZERO,
            initial_bonus_received: false,
            updated_at: wallet.created_at,
        }
    }

    /// Sum of all category credits
    pub fn total_credits(&self) -> Decimal {
        self.points_earned_from_minting
            + self.points_earned_from_platform
            + self.points_earned_from_referrals
            + self.points_earned_from_tasks
    }

    /// `balance == credits - burned` and `balance >= 0`
    pub fn is_consistent(&self) -> bool {
        self.star_points >= Decimal::ZERO
            && self.star_points == self.total_credits() - self.points_burned
    }

    fn category_mut(&mut self, category: PointCategory) -> &mut Decimal {
        match category {
            PointCategory::Minting => &mut self.points_earned_from_minting,
            PointCategory::Platform => &mut self.points_earned_from_platform,
            PointCategory::Referral => &mut self.points_earned_from_referrals,
            PointCategory::Tasks => &mut self.points_earned_from_tasks,
        }
    }
}

/// A wallet together with its balance row, as locked by a unit of work.
///
/// Every balance mutation goes through [`Account::credit`] or
/// [`Account::burn`], which move the balance and the matching counter together.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Wallet row
    pub wallet: Wallet,
    /// Balance row
    pub balance: PointBalance,
}

impl Account {
    /// Credit `amount` under `category`
    pub fn credit(&mut self, category: PointCategory, amount: Decimal, now: DateTime<Utc>) -> Result<()> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "Cannot credit negative amount {}",
                amount
            )));
        }

        let amount = round_points(amount);
        let earned = self
            .wallet
            .total_points_earned
            .checked_add(amount)
            .filter(|total| *total < MAX_POINT_AMOUNT)
            .ok_or_else(|| {
                LedgerError::Validation("Credit exceeds the supported point range".to_string())
            })?;

        *self.balance.category_mut(category) += amount;
        self.balance.star_points += amount;
        self.balance.updated_at = now;
        self.wallet.total_points_earned = earned;
        self.wallet.last_activity_at = now;
        Ok(())
    }

    /// Debit `amount` as a burn, rejecting if the balance would go negative
    pub fn burn(&mut self, amount: Decimal, now: DateTime<Utc>) -> Result<()> {
        if self.balance.star_points < amount {
            return Err(LedgerError::InsufficientBalance {
                required: format!("{:.2}", amount),
                available: format!("{:.2}", self.balance.star_points),
            });
        }

        self.balance.star_points -= amount;
        self.balance.points_burned += amount;
        self.balance.updated_at = now;
        self.wallet.last_activity_at = now;
        Ok(())
    }

    /// Wallet id
    pub fn id(&self) -> Uuid {
        self.wallet.id
    }
}

/// Receipt of an XLM to STAR conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRecord {
    /// Receipt id
    pub id: Uuid,
    /// Minting wallet
    pub wallet_id: Uuid,
    /// Minting wallet address
    pub wallet_address: String,
    /// XLM paid
    pub xlm_amount: Decimal,
    /// STAR credited
    pub star_points_awarded: Decimal,
    /// On-chain payment hash, unique
    pub transaction_hash: String,
    /// Always `confirmed` once recorded
    pub status: String,
    /// Recorded at
    pub created_at: DateTime<Utc>,
}

/// Receipt of a point burn against a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRecord {
    /// Receipt id
    pub id: Uuid,
    /// Project burned against
    pub project_id: Uuid,
    /// Burning wallet
    pub wallet_id: Uuid,
    /// Burning wallet address
    pub wallet_address: String,
    /// Points debited
    pub star_burned: Decimal,
    /// Points credited to the project's creator-earnings counter
    pub star_to_creator: Decimal,
    /// Points destroyed
    pub star_destroyed: Decimal,
    /// Caller idempotency key, unique
    pub request_id: String,
    /// Recorded at
    pub created_at: DateTime<Utc>,
}

/// A burn joined with the project it was made against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBurn {
    /// Receipt id
    pub id: Uuid,
    /// Project burned against
    pub project_id: Uuid,
    /// Project token name, if the project still resolves
    pub project_name: Option<String>,
    /// Project token symbol
    pub project_symbol: Option<String>,
    /// Points debited
    pub star_burned: Decimal,
    /// Recorded at
    pub created_at: DateTime<Utc>,
}

/// Project lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Accepting burns and participations until the event end
    Active,
    /// Finalized, token issued
    Completed,
}

impl ProjectStatus {
    /// Persisted form
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Completed => "completed",
        }
    }

    /// Parse persisted form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ProjectStatus::Active),
            "completed" => Some(ProjectStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token launch / airdrop campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub creator_wallet_id: Uuid,
    pub creator_wallet_address: String,
    pub project_type: String,
    pub token_name: String,
    pub token_symbol: String,
    pub total_supply: Decimal,
    pub decimals: i32,
    pub description: String,
    pub logo_url: Option<String>,
    pub airdrop_percent: Decimal,
    pub liquidity_percent: Decimal,
    pub creator_percent: Decimal,
    #[serde(rename = "initialLiquidityXLM")]
    pub initial_liquidity_xlm: Decimal,
    pub event_duration_days: i32,
    pub event_start_date: DateTime<Utc>,
    pub event_end_date: DateTime<Utc>,
    pub status: ProjectStatus,
    pub total_participations: i64,
    pub total_xlm_contributed: Decimal,
    pub total_star_distributed: Decimal,
    pub total_star_burned: Decimal,
    pub creator_star_earned: Decimal,
    pub token_created: bool,
    pub token_issuer: Option<String>,
    pub vesting_enabled: bool,
    pub vesting_months: Option<i32>,
    /// Soroban launch contract, when deployed ahead of finalization
    pub soroban_contract_id: Option<String>,
    /// Classic asset code of an existing token
    pub asset_code: Option<String>,
    /// Classic asset issuer of an existing token
    pub asset_issuer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Fails with `State` unless the project accepts burns and participations at `now`
    pub fn ensure_open(&self, now: DateTime<Utc>) -> Result<()> {
        if self.status != ProjectStatus::Active {
            return Err(LedgerError::State("Project is not active".to_string()));
        }

        if now > self.event_end_date {
            return Err(LedgerError::State(
                "Project participation period has ended".to_string(),
            ));
        }

        Ok(())
    }

    /// Fails with `State` unless the project can be finalized at `now`
    pub fn ensure_finalizable(&self, now: DateTime<Utc>) -> Result<()> {
        if self.token_created {
            return Err(LedgerError::State(
                "Token already created for this project".to_string(),
            ));
        }

        if now < self.event_end_date {
            return Err(LedgerError::State(
                "Project event period has not ended yet".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply a burn to the running totals
    pub fn record_burn(&mut self, burned: Decimal, to_creator: Decimal, now: DateTime<Utc>) {
        self.total_star_burned += burned;
        self.creator_star_earned += to_creator;
        self.total_participations += 1;
        self.updated_at = now;
    }

    /// Apply a participation to the running totals
    pub fn record_participation(
        &mut self,
        xlm_amount: Decimal,
        participant_star: Decimal,
        creator_star: Decimal,
        now: DateTime<Utc>,
    ) {
        self.total_participations += 1;
        self.total_xlm_contributed += xlm_amount;
        self.total_star_distributed += participant_star + creator_star;
        self.creator_star_earned += creator_star;
        self.updated_at = now;
    }

    /// Mark the token as issued
    pub fn complete(&mut self, issuer_public_key: String, now: DateTime<Utc>) {
        self.token_created = true;
        self.token_issuer = Some(issuer_public_key);
        self.status = ProjectStatus::Completed;
        self.updated_at = now;
    }
}

/// Participation receipt (XLM contributed to a project)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    pub id: Uuid,
    pub project_id: Uuid,
    pub participant_wallet_id: Uuid,
    pub participant_wallet_address: String,
    pub xlm_contributed: Decimal,
    pub participant_star_earned: Decimal,
    pub creator_star_earned: Decimal,
    pub transaction_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A participation joined with its project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletParticipation {
    /// Participation receipt
    pub participation: Participation,
    /// Project, if it still resolves
    pub project: Option<Project>,
}

/// A wallet's referral link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralLink {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub wallet_address: String,
    pub referral_code: String,
    pub total_referrals: i64,
    pub successful_referrals: i64,
    pub created_at: DateTime<Utc>,
}

/// Receipt of a claimed referral
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralEvent {
    pub id: Uuid,
    pub referrer_wallet_id: Uuid,
    /// Unique: a wallet can be referred once
    pub referee_wallet_id: Uuid,
    pub referral_code: String,
    pub status: String,
    pub points_awarded: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Task in the catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    /// Unique task type slug
    pub task_type: String,
    pub title: String,
    pub description: String,
    pub star_reward: Decimal,
    pub is_active: bool,
    pub max_completions: Option<i64>,
    /// Completions recorded so far
    pub completions: i64,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// New active task
    pub fn new(
        task_type: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        star_reward: Decimal,
        max_completions: Option<i64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            title: title.into(),
            description: description.into(),
            star_reward,
            is_active: true,
            max_completions,
            completions: 0,
            created_at: Utc::now(),
        }
    }
}

/// Receipt of a completed task, unique per (task, wallet)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub id: Uuid,
    pub task_id: Uuid,
    pub wallet_id: Uuid,
    pub wallet_address: String,
    pub points_awarded: Decimal,
    pub proof_data: Option<serde_json::Value>,
    pub completed_at: DateTime<Utc>,
}

/// Platform-wide counters guarded by a single row lock
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    /// Wallets that received the initial bonus
    pub users_with_initial_bonus: i64,
    /// Points granted through the initial bonus
    pub total_bonus_distributed: Decimal,
}

/// Aggregate minting statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintStats {
    pub total_xlm_received: Decimal,
    pub total_star_minted: Decimal,
    pub total_users: i64,
    pub users_with_initial_bonus: i64,
    /// All category credits across wallets
    pub total_star_distributed: Decimal,
    pub minting_active: bool,
}

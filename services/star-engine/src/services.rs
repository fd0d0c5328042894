use crate::metrics;
use point_ledger::{
    BonusReceipt, BurnReceipt, BurnRecord, EngineConfig, FinalizeReceipt, LedgerStore, MintReceipt,
    MintStats, NewProject, Participation, ParticipateRequest, ParticipationReceipt, PointBalance,
    PointEngine, Project, ProjectManager, ProjectStats, ReferralLink, ReferralReceipt, Result,
    Task, TaskCompletion, TaskReceipt, TokenIssuer, WalletBurn, WalletParticipation,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

async fn tracked<T, F>(operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::observe(operation, started, &result);
    result
}

/// Ledger operations exposed over HTTP
pub struct StarService {
    points: PointEngine,
    projects: ProjectManager,
}

impl StarService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        issuer: Arc<dyn TokenIssuer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            points: PointEngine::new(store.clone(), config.clone()),
            projects: ProjectManager::new(store, issuer, config),
        }
    }

    /// Seed the task catalogue
    pub async fn initialize(&self) -> Result<()> {
        let seeded = self.points.seed_default_tasks().await?;
        info!("Star service initialized ({} tasks seeded)", seeded);
        Ok(())
    }

    // Points

    pub async fn mint(
        &self,
        wallet_address: &str,
        xlm_amount: rust_decimal::Decimal,
        transaction_hash: &str,
    ) -> Result<MintReceipt> {
        tracked(
            "mint",
            self.points.mint(wallet_address, xlm_amount, transaction_hash),
        )
        .await
    }

    pub async fn claim_initial_bonus(&self, wallet_address: &str) -> Result<BonusReceipt> {
        tracked("initial_bonus", self.points.claim_initial_bonus(wallet_address)).await
    }

    pub async fn balance(&self, wallet_address: &str) -> Result<PointBalance> {
        self.points.balance(wallet_address).await
    }

    pub async fn mint_stats(&self) -> Result<MintStats> {
        self.points.mint_stats().await
    }

    pub async fn referral_info(&self, wallet_address: &str) -> Result<ReferralLink> {
        self.points.referral_info(wallet_address).await
    }

    pub async fn claim_referral(
        &self,
        referral_code: &str,
        referee_address: &str,
    ) -> Result<ReferralReceipt> {
        tracked(
            "referral",
            self.points.claim_referral(referral_code, referee_address),
        )
        .await
    }

    pub async fn tasks(&self) -> Result<Vec<Task>> {
        self.points.tasks().await
    }

    pub async fn completed_tasks(&self, wallet_address: &str) -> Result<Vec<TaskCompletion>> {
        self.points.completed_tasks(wallet_address).await
    }

    pub async fn complete_task(
        &self,
        wallet_address: &str,
        task_id: Uuid,
        proof_data: Option<serde_json::Value>,
    ) -> Result<TaskReceipt> {
        tracked(
            "task",
            self.points.complete_task(wallet_address, task_id, proof_data),
        )
        .await
    }

    // Burns

    pub async fn burn(&self, request: point_ledger::BurnRequest) -> Result<BurnReceipt> {
        tracked("burn", self.points.burn(request)).await
    }

    pub async fn project_burns(&self, project_id: Uuid) -> Result<Vec<BurnRecord>> {
        self.points.project_burns(project_id).await
    }

    pub async fn wallet_burns(&self, wallet_address: &str) -> Result<Vec<WalletBurn>> {
        self.points.wallet_burns(wallet_address).await
    }

    pub async fn project_stats(&self, project_id: Uuid) -> Result<ProjectStats> {
        self.projects.project_stats(project_id).await
    }

    // Projects

    pub async fn create_project(&self, params: NewProject) -> Result<Project> {
        tracked("create_project", self.projects.create_project(params)).await
    }

    pub async fn project(&self, project_id: Uuid) -> Result<Project> {
        self.projects.project(project_id).await
    }

    pub async fn active_projects(&self) -> Result<Vec<Project>> {
        self.projects.active_projects().await
    }

    pub async fn participate(&self, request: ParticipateRequest) -> Result<ParticipationReceipt> {
        tracked("participation", self.projects.participate(request)).await
    }

    pub async fn project_participations(&self, project_id: Uuid) -> Result<Vec<Participation>> {
        self.projects.project_participations(project_id).await
    }

    pub async fn wallet_participations(
        &self,
        wallet_address: &str,
    ) -> Result<Vec<WalletParticipation>> {
        self.projects.wallet_participations(wallet_address).await
    }

    pub async fn finalize(
        &self,
        project_id: Uuid,
        distributor_public_key: &str,
    ) -> Result<FinalizeReceipt> {
        tracked(
            "finalize",
            self.projects.finalize(project_id, distributor_public_key),
        )
        .await
    }
}

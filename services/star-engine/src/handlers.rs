use crate::errors::ApiError;
use crate::metrics;
use crate::models::{
    ApiResponse, BurnRequest, ClaimReferralRequest, CompleteTaskRequest, FinalizeRequest,
    HealthResponse, MintRequest, ParticipateRequest, WalletRequest,
};
use crate::services::StarService;
use actix_web::{web, HttpResponse};
use point_ledger::NewProject;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

type Service = web::Data<Arc<StarService>>;
type HandlerResult = Result<HttpResponse, ApiError>;

fn ok<T: Serialize>(data: T) -> HandlerResult {
    Ok(HttpResponse::Ok().json(ApiResponse::ok(data)))
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "star-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

// Points

/// Convert XLM to STAR
pub async fn mint(service: Service, request: web::Json<MintRequest>) -> HandlerResult {
    let request = request.into_inner();
    request.validate()?;
    ok(service
        .mint(&request.wallet_address, request.xlm_amount, &request.transaction_hash)
        .await?)
}

/// Claim the one-time initial bonus
pub async fn claim_bonus(service: Service, request: web::Json<WalletRequest>) -> HandlerResult {
    request.validate()?;
    ok(service.claim_initial_bonus(&request.wallet_address).await?)
}

/// Wallet balance
pub async fn get_balance(service: Service, wallet_address: web::Path<String>) -> HandlerResult {
    ok(service.balance(&wallet_address).await?)
}

/// Platform minting statistics
pub async fn mint_stats(service: Service) -> HandlerResult {
    ok(service.mint_stats().await?)
}

/// Wallet referral link, created on first request
pub async fn referral_info(service: Service, wallet_address: web::Path<String>) -> HandlerResult {
    ok(service.referral_info(&wallet_address).await?)
}

/// Claim a referral for the requesting wallet
pub async fn claim_referral(
    service: Service,
    request: web::Json<ClaimReferralRequest>,
) -> HandlerResult {
    request.validate()?;
    ok(service
        .claim_referral(&request.referral_code, &request.wallet_address)
        .await?)
}

/// Active task catalogue
pub async fn list_tasks(service: Service) -> HandlerResult {
    ok(service.tasks().await?)
}

/// Tasks completed by a wallet
pub async fn completed_tasks(service: Service, wallet_address: web::Path<String>) -> HandlerResult {
    ok(service.completed_tasks(&wallet_address).await?)
}

/// Complete a task
pub async fn complete_task(
    service: Service,
    request: web::Json<CompleteTaskRequest>,
) -> HandlerResult {
    let request = request.into_inner();
    request.validate()?;
    ok(service
        .complete_task(&request.wallet_address, request.task_id, request.proof_data)
        .await?)
}

// Burns

/// Burn points against a project
pub async fn burn(service: Service, request: web::Json<BurnRequest>) -> HandlerResult {
    let request = request.into_inner();
    request.validate()?;
    let receipt = service.burn(request.into()).await.map_err(ApiError::burn)?;
    ok(receipt)
}

/// Burns against a project
pub async fn project_burns(service: Service, project_id: web::Path<Uuid>) -> HandlerResult {
    ok(service.project_burns(*project_id).await?)
}

/// Airdrop allocation of a project
pub async fn project_stats(service: Service, project_id: web::Path<Uuid>) -> HandlerResult {
    ok(service.project_stats(*project_id).await?)
}

/// Burns made by a wallet
pub async fn wallet_burns(service: Service, wallet_address: web::Path<String>) -> HandlerResult {
    ok(service.wallet_burns(&wallet_address).await?)
}

// Projects

/// Create a project
pub async fn create_project(service: Service, request: web::Json<NewProject>) -> HandlerResult {
    ok(service.create_project(request.into_inner()).await?)
}

/// Projects open for participation
pub async fn active_projects(service: Service) -> HandlerResult {
    ok(service.active_projects().await?)
}

/// Project by id
pub async fn get_project(service: Service, project_id: web::Path<Uuid>) -> HandlerResult {
    ok(service.project(*project_id).await?)
}

/// Record an XLM contribution to a project
pub async fn participate(
    service: Service,
    project_id: web::Path<Uuid>,
    request: web::Json<ParticipateRequest>,
) -> HandlerResult {
    let request = request.into_inner();
    request.validate()?;
    ok(service
        .participate(point_ledger::ParticipateRequest {
            project_id: *project_id,
            participant_wallet_address: request.participant_wallet_address,
            xlm_amount: request.xlm_amount,
            transaction_hash: request.transaction_hash,
        })
        .await?)
}

/// Participations in a project
pub async fn project_participations(
    service: Service,
    project_id: web::Path<Uuid>,
) -> HandlerResult {
    ok(service.project_participations(*project_id).await?)
}

/// Participations by a wallet
pub async fn wallet_participations(
    service: Service,
    wallet_address: web::Path<String>,
) -> HandlerResult {
    ok(service.wallet_participations(&wallet_address).await?)
}

/// Issue the project token after the event ends
pub async fn finalize(
    service: Service,
    project_id: web::Path<Uuid>,
    request: web::Json<FinalizeRequest>,
) -> HandlerResult {
    request.validate()?;
    ok(service
        .finalize(*project_id, &request.distributor_public_key)
        .await?)
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::Validation(err.to_string()).into())
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| ApiError::Validation(err.to_string()).into())
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(path_config())
        .service(
            web::scope("/api")
                .service(
                    web::scope("/points")
                        .route("/mint", web::post().to(mint))
                        .route("/claim-bonus", web::post().to(claim_bonus))
                        .route("/balance/{wallet_address}", web::get().to(get_balance))
                        .route("/stats", web::get().to(mint_stats))
                        .route("/referral/claim", web::post().to(claim_referral))
                        .route("/referral/{wallet_address}", web::get().to(referral_info))
                        .route("/tasks", web::get().to(list_tasks))
                        .route(
                            "/tasks/completed/{wallet_address}",
                            web::get().to(completed_tasks),
                        )
                        .route("/tasks/complete", web::post().to(complete_task)),
                )
                .service(
                    web::scope("/star-burn")
                        .route("/burn", web::post().to(burn))
                        .route("/project/{project_id}/burns", web::get().to(project_burns))
                        .route("/project/{project_id}/stats", web::get().to(project_stats))
                        .route("/user/{wallet_address}/burns", web::get().to(wallet_burns)),
                )
                .service(
                    web::scope("/projects")
                        .route("/create", web::post().to(create_project))
                        .route("/active", web::get().to(active_projects))
                        .route(
                            "/user/{wallet_address}/participations",
                            web::get().to(wallet_participations),
                        )
                        .route("/{project_id}", web::get().to(get_project))
                        .route("/{project_id}/participate", web::post().to(participate))
                        .route(
                            "/{project_id}/participations",
                            web::get().to(project_participations),
                        )
                        .route("/{project_id}/finalize", web::post().to(finalize)),
                ),
        )
        .route("/metrics", web::get().to(metrics_endpoint))
        .route("/health", web::get().to(health_check));
}

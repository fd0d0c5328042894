//! Concurrency tests: interleaved units of work on the in-memory store
//!
//! The store sleeps after each row lock so competing requests overlap.

use futures_util::future::join_all;
use point_ledger::{
    BurnRequest, EngineConfig, LedgerError, MemoryStore, MockTokenIssuer, NewProject,
    ParticipateRequest, PointEngine, ProjectManager,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Fixture {
    engine: PointEngine,
    projects: ProjectManager,
}

fn fixture(store: MemoryStore) -> Fixture {
    let store = Arc::new(store);
    let config = EngineConfig::default();
    Fixture {
        engine: PointEngine::new(store.clone(), config.clone()),
        projects: ProjectManager::new(store, Arc::new(MockTokenIssuer::new()), config),
    }
}

fn interleaving() -> Fixture {
    fixture(MemoryStore::new().with_lock_delay(Duration::from_millis(20)))
}

async fn project(f: &Fixture) -> Uuid {
    f.projects
        .create_project(NewProject::for_creator("GCREATOR"))
        .await
        .unwrap()
        .id
}

fn burn(wallet: &str, project_id: Uuid, amount: Decimal, request_id: &str) -> BurnRequest {
    BurnRequest {
        wallet_address: wallet.to_string(),
        project_id,
        star_amount: amount,
        request_id: request_id.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_burns_never_overdraw() {
    let f = interleaving();
    let project_id = project(&f).await;
    f.engine.mint("GUSER", dec!(10), "mint-1").await.unwrap();

    let (a, b) = tokio::join!(
        f.engine.burn(burn("GUSER", project_id, dec!(60), "req-a")),
        f.engine.burn(burn("GUSER", project_id, dec!(60), "req-b")),
    );

    let outcomes = [a, b];
    let ok = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. }))));

    let balance = f.engine.balance("GUSER").await.unwrap();
    assert_eq!(balance.star_points, dec!(40));
    assert!(balance.is_consistent());
    let project = f.projects.project(project_id).await.unwrap();
    assert_eq!(project.total_star_burned, dec!(60));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_request_applies_once() {
    let f = interleaving();
    let project_id = project(&f).await;
    f.engine.mint("GUSER", dec!(10), "mint-1").await.unwrap();

    let results = join_all(
        (0..4).map(|_| f.engine.burn(burn("GUSER", project_id, dec!(10), "same-request"))),
    )
    .await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(LedgerError::Duplicate(_)))));

    let balance = f.engine.balance("GUSER").await.unwrap();
    assert_eq!(balance.star_points, dec!(90));
    assert_eq!(f.engine.project_burns(project_id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mint_replay() {
    let f = interleaving();
    let results = join_all((0..3).map(|_| f.engine.mint("GUSER", dec!(5), "hash-x"))).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(f.engine.balance("GUSER").await.unwrap().star_points, dec!(50));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_contact_creates_one_wallet() {
    let store = MemoryStore::new();
    let f = fixture(store.clone());

    let results = join_all((0..8).map(|_| f.engine.balance("GFRESH"))).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(store.wallet_count(), 1);
    assert_eq!(store.balance_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burns_from_many_wallets_sum_on_project() {
    let f = interleaving();
    let project_id = project(&f).await;
    let wallets: Vec<String> = (0..6).map(|i| format!("GWALLET{}", i)).collect();
    for (i, wallet) in wallets.iter().enumerate() {
        f.engine.mint(wallet, dec!(3), &format!("mint-{}", i)).await.unwrap();
    }

    let results = join_all(wallets.iter().enumerate().map(|(i, wallet)| {
        f.engine
            .burn(burn(wallet, project_id, dec!(12.50), &format!("req-{}", i)))
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let project = f.projects.project(project_id).await.unwrap();
    assert_eq!(project.total_star_burned, dec!(75.00));
    assert_eq!(project.creator_star_earned, dec!(37.50));
    assert_eq!(project.total_participations, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crossed_participations_do_not_deadlock() {
    let f = interleaving();
    let alpha = f
        .projects
        .create_project(NewProject::for_creator("GALPHA"))
        .await
        .unwrap();
    let bravo = f
        .projects
        .create_project(NewProject::for_creator("GBRAVO"))
        .await
        .unwrap();

    // Each participates in the other's project: wallet locks are requested
    // in opposite order by the two callers.
    let (a, b) = tokio::join!(
        f.projects.participate(ParticipateRequest {
            project_id: bravo.id,
            participant_wallet_address: "GALPHA".into(),
            xlm_amount: dec!(1),
            transaction_hash: "ptx-a".into(),
        }),
        f.projects.participate(ParticipateRequest {
            project_id: alpha.id,
            participant_wallet_address: "GBRAVO".into(),
            xlm_amount: dec!(1),
            transaction_hash: "ptx-b".into(),
        }),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(f.engine.balance("GALPHA").await.unwrap().star_points, dec!(2));
    assert_eq!(f.engine.balance("GBRAVO").await.unwrap().star_points, dec!(2));
}

#[tokio::test]
async fn test_lock_wait_is_bounded() {
    let store = MemoryStore::new()
        .with_lock_timeout(Duration::from_millis(50))
        .with_lock_delay(Duration::from_millis(200));
    let f = fixture(store);
    f.engine.mint("GUSER", dec!(1), "mint-1").await.unwrap();

    let (a, b) = tokio::join!(
        f.engine.mint("GUSER", dec!(1), "mint-2"),
        f.engine.mint("GUSER", dec!(1), "mint-3"),
    );
    let outcomes = [a, b];
    assert!(outcomes.iter().any(|r| r.is_ok()));
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(LedgerError::Retryable(_)))));
}

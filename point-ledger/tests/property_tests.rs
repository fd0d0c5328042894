//! Property-based tests for point ledger invariants
//!
//! - Balance identity: star_points == Σ(category credits) - points_burned
//! - Non-negativity: no sequence of operations drives a balance below zero
//! - Burn conservation: a project's burn total equals the sum of its receipts
//! - Cent amounts always validate; sub-cent noise beyond the epsilon never does

use point_ledger::amount::{split_burn, validate_burn_amount};
use point_ledger::{
    BurnRequest, EngineConfig, LedgerError, MemoryStore, MockTokenIssuer, NewProject,
    PointEngine, ProjectManager,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

const WALLETS: [&str; 3] = ["GALPHA", "GBRAVO", "GCHARLIE"];

#[derive(Debug, Clone)]
enum Op {
    Mint { wallet: usize, xlm_cents: i64 },
    Burn { wallet: usize, cents: i64 },
    Bonus { wallet: usize },
    Task { wallet: usize, task: usize },
    ReplayBurn { wallet: usize },
}

/// Strategy for generating cent amounts
fn cents_strategy() -> impl Strategy<Value = i64> {
    1i64..50_000i64
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..WALLETS.len(), cents_strategy()).prop_map(|(wallet, xlm_cents)| Op::Mint { wallet, xlm_cents }),
        (0..WALLETS.len(), cents_strategy()).prop_map(|(wallet, cents)| Op::Burn { wallet, cents }),
        (0..WALLETS.len()).prop_map(|wallet| Op::Bonus { wallet }),
        (0..WALLETS.len(), 0usize..5).prop_map(|(wallet, task)| Op::Task { wallet, task }),
        (0..WALLETS.len()).prop_map(|wallet| Op::ReplayBurn { wallet }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_balances_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..40)) {
        runtime().block_on(async move {
            let store = Arc::new(MemoryStore::new());
            let config = EngineConfig::default();
            let engine = PointEngine::new(store.clone(), config.clone());
            let projects = ProjectManager::new(store.clone(), Arc::new(MockTokenIssuer::new()), config);
            engine.seed_default_tasks().await.unwrap();
            let tasks = engine.tasks().await.unwrap();
            let project = projects
                .create_project(NewProject::for_creator("GCREATOR"))
                .await
                .unwrap();

            let mut burned_ok = Decimal::ZERO;
            let mut last_request: Vec<Option<String>> = vec![None; WALLETS.len()];

            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Mint { wallet, xlm_cents } => {
                        engine
                            .mint(WALLETS[wallet], Decimal::new(xlm_cents, 2), &format!("mint-{}", i))
                            .await
                            .unwrap();
                    }
                    Op::Burn { wallet, cents } => {
                        let request_id = format!("burn-{}", i);
                        let result = engine
                            .burn(BurnRequest {
                                wallet_address: WALLETS[wallet].to_string(),
                                project_id: project.id,
                                star_amount: Decimal::new(cents, 2),
                                request_id: request_id.clone(),
                            })
                            .await;
                        match result {
                            Ok(receipt) => {
                                burned_ok += receipt.star_burned;
                                last_request[wallet] = Some(request_id);
                            }
                            Err(LedgerError::InsufficientBalance { .. }) => {}
                            Err(e) => panic!("unexpected burn error: {}", e),
                        }
                    }
                    Op::Bonus { wallet } => {
                        match engine.claim_initial_bonus(WALLETS[wallet]).await {
                            Ok(_) | Err(LedgerError::Duplicate(_)) => {}
                            Err(e) => panic!("unexpected bonus error: {}", e),
                        }
                    }
                    Op::Task { wallet, task } => {
                        match engine.complete_task(WALLETS[wallet], tasks[task].id, None).await {
                            Ok(_) | Err(LedgerError::Duplicate(_)) => {}
                            Err(e) => panic!("unexpected task error: {}", e),
                        }
                    }
                    Op::ReplayBurn { wallet } => {
                        if let Some(request_id) = last_request[wallet].clone() {
                            let err = engine
                                .burn(BurnRequest {
                                    wallet_address: WALLETS[wallet].to_string(),
                                    project_id: project.id,
                                    star_amount: Decimal::new(1, 2),
                                    request_id,
                                })
                                .await
                                .unwrap_err();
                            assert!(matches!(err, LedgerError::Duplicate(_)));
                        }
                    }
                }
            }

            let mut burned_by_wallets = Decimal::ZERO;
            for wallet in WALLETS {
                let balance = engine.balance(wallet).await.unwrap();
                assert!(balance.is_consistent(), "inconsistent balance: {:?}", balance);
                burned_by_wallets += balance.points_burned;
            }

            let receipts: Decimal = engine
                .project_burns(project.id)
                .await
                .unwrap()
                .iter()
                .map(|b| b.star_burned)
                .sum();
            let project = projects.project(project.id).await.unwrap();

            assert_eq!(project.total_star_burned, burned_ok);
            assert_eq!(receipts, burned_ok);
            assert_eq!(burned_by_wallets, burned_ok);
        });
    }

    #[test]
    fn prop_cent_amounts_validate(cents in 1i64..10_000_000i64) {
        let amount = Decimal::new(cents, 2);
        prop_assert_eq!(validate_burn_amount(amount).unwrap(), amount);
    }

    #[test]
    fn prop_sub_cent_noise_rejected(cents in 1i64..1_000_000i64, noise in 2i64..9i64) {
        // noise in thousandths beyond the epsilon, e.g. 12.345 + 0.002
        let amount = Decimal::new(cents * 10 + noise, 3);
        let result = validate_burn_amount(amount);
        prop_assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn prop_split_halves_within_a_cent(cents in 1i64..10_000_000i64) {
        let amount = Decimal::new(cents, 2);
        let split = split_burn(amount, Decimal::new(5, 1));
        prop_assert!((split.destroyed + split.to_creator - amount).abs() <= Decimal::new(1, 2));
        prop_assert_eq!(split.destroyed, split.to_creator);
    }
}

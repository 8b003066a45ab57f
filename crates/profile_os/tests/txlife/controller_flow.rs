#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use profile_kernel_contracts::identity::AccountAddress;
use profile_kernel_contracts::profile::{ProfileDraft, ProfileRecord};
use profile_kernel_contracts::txlife::{TxPhase, TxStatusUpdate};
use profile_os::chain::{LoopbackChain, TransportError, LOOPBACK_DEFAULT_NAME};
use profile_os::identity::{IdentityProvider, LoopbackIdentityProvider};
use profile_os::profile_ctl::{
    ProfileActionError, ProfileController, ProfileControllerConfig, TrackingEnd,
    MESSAGE_CREATE_PROFILE, MESSAGE_GET_STARTED, MESSAGE_PROFILE_LIVES,
};

struct Harness {
    controller: Arc<ProfileController>,
    chain: Arc<LoopbackChain>,
    wallet: Arc<LoopbackIdentityProvider>,
}

fn user() -> AccountAddress {
    AccountAddress::new("0x01cf0e2f2f715450").unwrap()
}

fn other_user() -> AccountAddress {
    AccountAddress::new("0x179b6b1cb6755e31").unwrap()
}

fn harness() -> Harness {
    let chain = Arc::new(LoopbackChain::new());
    let wallet = Arc::new(LoopbackIdentityProvider::new(user()));
    let controller = ProfileController::new(
        ProfileControllerConfig::mvp_emulator_v1().unwrap(),
        chain.clone(),
        wallet.clone(),
    );
    Harness {
        controller,
        chain,
        wallet,
    }
}

async fn logged_in_with_profile() -> Harness {
    let h = harness();
    h.chain.seed_profile(ProfileRecord::v1(
        user(),
        "Anon".to_string(),
        "#000000".to_string(),
        String::new(),
    ));
    h.controller.log_in().await.unwrap();
    assert!(h.controller.profile().exists());
    h
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn at_controller_flow_01_update_round_trip_reloads_profile() {
    let h = logged_in_with_profile().await;
    let receipt = h
        .controller
        .update_profile(ProfileDraft::v1("A", "#fff", "B"))
        .await
        .unwrap();
    let outcome = receipt.tracking.await.unwrap();
    assert_eq!(outcome.end, TrackingEnd::Terminal);
    assert_eq!(outcome.final_phase, TxPhase::Sealed);
    assert!(outcome.reloaded);

    let record = h.controller.profile().current().unwrap();
    assert_eq!(
        (record.name.as_str(), record.color.as_str(), record.info.as_str()),
        ("A", "#fff", "B")
    );
    let view = h.controller.view_state();
    assert_eq!(view.transaction.phase, TxPhase::Sealed);
    assert_eq!(
        view.transaction.explorer_url,
        Some(format!(
            "https://testnet.flowscan.org/transaction/{}",
            receipt.transaction_id
        ))
    );
    assert_eq!(view.message, MESSAGE_PROFILE_LIVES);
}

#[tokio::test]
async fn at_controller_flow_02_create_twice_reloads_once_each() {
    let h = harness();
    h.controller.log_in().await.unwrap();
    assert_eq!(h.controller.view_state().message, MESSAGE_CREATE_PROFILE);
    let queries_after_login = h.chain.query_calls();

    let first = h.controller.create_profile().await.unwrap();
    let first = first.tracking.await.unwrap();
    assert!(first.reloaded);
    assert_eq!(h.chain.query_calls(), queries_after_login + 1);
    assert_eq!(
        h.controller.profile().current().unwrap().name,
        LOOPBACK_DEFAULT_NAME
    );

    h.controller.dismiss_transaction();
    let second = h.controller.create_profile().await.unwrap();
    let second = second.tracking.await.unwrap();
    assert!(second.reloaded);
    assert_ne!(first.ticket, second.ticket);
    assert_eq!(h.chain.query_calls(), queries_after_login + 2);
    assert_eq!(h.chain.mutate_calls(), 2);
}

#[tokio::test]
async fn at_controller_flow_03_oversized_info_fails_without_network_calls() {
    let h = logged_in_with_profile().await;
    let before = h.chain.network_calls();
    let err = h
        .controller
        .update_profile(ProfileDraft::v1("A", "#fff", "x".repeat(1000)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(h.chain.network_calls(), before);
    assert_eq!(h.controller.tracker().phase(), TxPhase::None);
}

#[tokio::test]
async fn at_controller_flow_04_second_submission_while_pending_is_busy() {
    let h = harness();
    h.controller.log_in().await.unwrap();
    h.chain.set_status_script(&[1]);
    h.chain.hold_streams_open(true);

    let receipt = h.controller.create_profile().await.unwrap();
    let before = h.controller.tracker().snapshot();
    let err = h.controller.create_profile().await.unwrap_err();
    assert_eq!(err, ProfileActionError::Busy);
    assert_eq!(h.controller.tracker().snapshot().ticket, before.ticket);
    assert_eq!(h.chain.mutate_calls(), 1);

    h.chain
        .push_status(&receipt.transaction_id, TxStatusUpdate::new(4));
    let outcome = receipt.tracking.await.unwrap();
    assert_eq!(outcome.end, TrackingEnd::Terminal);
    assert_eq!(outcome.updates_seen, 2);
    assert!(h.controller.create_profile().await.is_ok());
}

#[tokio::test]
async fn at_controller_flow_05_submit_failure_resets_tracker() {
    let h = harness();
    h.controller.log_in().await.unwrap();
    h.chain.reject_next_submission("user declined");
    let err = h.controller.create_profile().await.unwrap_err();
    assert_eq!(
        err,
        ProfileActionError::SubmitFailed(TransportError::Rejected("user declined".to_string()))
    );
    assert_eq!(h.controller.tracker().phase(), TxPhase::None);
    assert!(!h.controller.tracker().in_progress());
    assert!(h.controller.create_profile().await.is_ok());
}

#[tokio::test]
async fn at_controller_flow_06_preconditions_checked_in_order() {
    let h = harness();
    assert_eq!(
        h.controller.create_profile().await.unwrap_err(),
        ProfileActionError::AuthRequired
    );
    assert_eq!(
        h.controller
            .update_profile(ProfileDraft::v1("", "", "x".repeat(1000)))
            .await
            .unwrap_err(),
        ProfileActionError::AuthRequired
    );
    assert_eq!(
        h.controller.load_profile().await.unwrap_err(),
        ProfileActionError::AuthRequired
    );
    assert_eq!(h.chain.network_calls(), 0);

    h.controller.log_in().await.unwrap();
    assert_eq!(
        h.controller
            .update_profile(ProfileDraft::v1("", "", "x".repeat(1000)))
            .await
            .unwrap_err(),
        ProfileActionError::ProfileRequired
    );
}

#[tokio::test]
async fn at_controller_flow_07_dismiss_mid_flight_suppresses_reload() {
    let h = harness();
    h.controller.log_in().await.unwrap();
    h.chain.set_status_script(&[1]);
    h.chain.hold_streams_open(true);
    let queries = h.chain.query_calls();

    let receipt = h.controller.create_profile().await.unwrap();
    h.controller.dismiss_transaction();
    h.chain
        .push_status(&receipt.transaction_id, TxStatusUpdate::new(4));
    let outcome = receipt.tracking.await.unwrap();
    assert_eq!(outcome.end, TrackingEnd::Dismissed);
    assert!(!outcome.reloaded);
    assert_eq!(h.controller.tracker().phase(), TxPhase::None);
    assert_eq!(h.chain.query_calls(), queries);
}

#[tokio::test]
async fn at_controller_flow_08_repeated_sealed_pushes_reload_once() {
    let h = harness();
    h.controller.log_in().await.unwrap();
    h.chain.set_status_script(&[1, 4, 4, 4]);
    let queries = h.chain.query_calls();
    let receipt = h.controller.create_profile().await.unwrap();
    let outcome = receipt.tracking.await.unwrap();
    assert_eq!(outcome.updates_seen, 2);
    assert_eq!(h.chain.query_calls(), queries + 1);
}

#[tokio::test]
async fn at_controller_flow_09_logout_clears_profile_and_session() {
    let h = logged_in_with_profile().await;
    h.controller.log_out().await.unwrap();
    let view = h.controller.view_state();
    assert!(!view.identity.logged_in);
    assert!(view.profile.is_none());
    assert!(!view.profile_exists);
    assert_eq!(view.message, MESSAGE_GET_STARTED);
    assert!(h.wallet.subscribe_current_user().borrow().is_anonymous());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn at_controller_flow_10_identity_pump_follows_wallet() {
    let h = harness();
    h.chain.seed_profile(ProfileRecord::v1(
        other_user(),
        "Other".to_string(),
        "#123456".to_string(),
        String::new(),
    ));
    let pump = h.controller.spawn_identity_pump();

    h.wallet.log_in().await.unwrap();
    eventually(|| h.controller.session().current().logged_in).await;
    eventually(|| h.controller.profile().is_loaded()).await;
    assert!(!h.controller.profile().exists());

    h.wallet.switch_account(other_user());
    eventually(|| {
        h.controller
            .profile()
            .current()
            .is_some_and(|r| r.name == "Other")
    })
    .await;

    h.wallet.unauthenticate().await.unwrap();
    eventually(|| !h.controller.session().current().logged_in).await;
    assert!(h.controller.profile().current().is_none());
    pump.abort();
}

#[tokio::test]
async fn at_controller_flow_11_login_failure_surfaces_identity_error() {
    let h = harness();
    h.wallet.reject_next("wallet closed");
    let err = h.controller.log_in().await.unwrap_err();
    assert_eq!(err.code(), "IDENTITY_FAILED");
    assert!(!h.controller.session().current().logged_in);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn at_controller_flow_12_login_with_pump_queries_profile_once() {
    let h = harness();
    let pump = h.controller.spawn_identity_pump();
    h.controller.log_in().await.unwrap();
    eventually(|| h.controller.profile().is_loaded()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.chain.query_calls(), 1);
    assert!(h.controller.profile().is_loaded());
    pump.abort();
}

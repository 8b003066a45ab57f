#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use profile_kernel_contracts::identity::{AccountAddress, Identity};
use profile_kernel_contracts::profile::ProfileRecord;
use profile_storage::{bind_profile_to_session, IdentityChange, ProfileStore, SessionStore};

fn alice() -> AccountAddress {
    AccountAddress::new("0x01cf0e2f2f715450").unwrap()
}

fn bob() -> AccountAddress {
    AccountAddress::new("0x179b6b1cb6755e31").unwrap()
}

fn record_for(address: AccountAddress) -> ProfileRecord {
    ProfileRecord::v1(
        address,
        "Anon".to_string(),
        "#000000".to_string(),
        "hello".to_string(),
    )
}

fn bound_stores() -> (SessionStore, Arc<ProfileStore>) {
    let session = SessionStore::new();
    let profile = Arc::new(ProfileStore::new());
    bind_profile_to_session(&session, profile.clone());
    (session, profile)
}

#[test]
fn at_store_wiring_01_logout_clears_profile() {
    let (session, profile) = bound_stores();
    session.set_identity(Identity::logged_in(alice()));
    profile.set_from_query(Some(record_for(alice())));
    assert!(profile.exists());

    assert_eq!(session.log_out(), IdentityChange::LoggedOut);
    assert!(!profile.exists());
    assert!(!profile.is_loaded());
    assert_eq!(session.current(), Identity::anonymous());
}

#[test]
fn at_store_wiring_02_address_change_clears_profile() {
    let (session, profile) = bound_stores();
    session.set_identity(Identity::logged_in(alice()));
    profile.set_from_query(Some(record_for(alice())));

    assert_eq!(
        session.set_identity(Identity::logged_in(bob())),
        IdentityChange::AddressChanged
    );
    assert!(profile.current().is_none());
}

#[test]
fn at_store_wiring_03_repeated_identical_push_keeps_profile() {
    let (session, profile) = bound_stores();
    session.set_identity(Identity::logged_in(alice()));
    profile.set_from_query(Some(record_for(alice())));

    assert_eq!(
        session.set_identity(Identity::logged_in(alice())),
        IdentityChange::Unchanged
    );
    assert_eq!(profile.current(), Some(record_for(alice())));
}

#[test]
fn at_store_wiring_04_unbinding_stops_clearing() {
    let session = SessionStore::new();
    let profile = Arc::new(ProfileStore::new());
    let binding = bind_profile_to_session(&session, profile.clone());
    session.set_identity(Identity::logged_in(alice()));
    profile.set_from_query(Some(record_for(alice())));

    assert!(session.unsubscribe(binding));
    session.log_out();
    assert!(profile.exists());
}

#[test]
fn at_store_wiring_05_profile_listeners_see_every_load() {
    let profile = ProfileStore::new();
    let loads = Arc::new(AtomicUsize::new(0));
    let l = loads.clone();
    profile.subscribe(move |snapshot| {
        if snapshot.loaded {
            l.fetch_add(1, Ordering::SeqCst);
        }
    });
    profile.set_from_query(None);
    profile.set_from_query(Some(record_for(alice())));
    profile.clear();
    profile.clear();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn at_store_wiring_06_read_for_previous_identity_is_not_written() {
    let (session, profile) = bound_stores();
    let session = Arc::new(session);
    session.set_identity(Identity::logged_in(alice()));
    let requested = alice();
    session.set_identity(Identity::logged_in(bob()));

    let check = session.clone();
    let written = profile.set_from_query_if(Some(record_for(alice())), move || {
        check.current().active_address() == Some(&requested)
    });
    assert!(!written);
    assert!(!profile.is_loaded());
    assert!(profile.current().is_none());

    let check = session.clone();
    let written = profile.set_from_query_if(Some(record_for(bob())), move || {
        check.current().active_address() == Some(&bob())
    });
    assert!(written);
    assert_eq!(profile.current().unwrap().address, bob());
}

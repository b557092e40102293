//! End-to-end scenarios across the sync coordinator, migration flow, and
//! quota tracking, driven against the in-memory remote store.

use chrono::NaiveDate;
use tally_core::auth::Identity;
use tally_core::models::{Category, Receipt, ReceiptItem, Subscription};
use tally_core::scan::parse_scan_response;
use tally_core::store::{LocalStore, MemoryRemoteStore, Record, RemoteStore};
use tally_core::subscription::SubscriptionService;
use tally_core::sync::{CollectionSync, MigrationFlow, MigrationMarker, SyncStatus};

fn identity(uid: &str) -> Identity {
    Identity {
        user_id: uid.to_string(),
        email: None,
    }
}

fn receipt(store: &str, created_at: i64) -> Receipt {
    let mut receipt = Receipt::new(
        store,
        Category::Food,
        vec![ReceiptItem {
            name: "Item".to_string(),
            quantity: 1,
            price: 42.0,
        }],
        "cash",
    );
    receipt.created_at = created_at;
    receipt
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn wait_for<F: FnMut() -> bool>(mut condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Full first-sign-in path: add 3 records while signed out, sign in
/// against an empty remote, migrate after the prompt shows 3 items, and
/// verify the remote holds exactly those records with a durable
/// completion marker.
#[tokio::test(flavor = "multi_thread")]
async fn signed_out_data_migrates_once_and_never_reprompts() {
    let tmp = tempfile::tempdir().unwrap();
    let local = LocalStore::new(tmp.path());
    let remote = MemoryRemoteStore::new();
    let receipts: CollectionSync<Receipt, MemoryRemoteStore> =
        CollectionSync::new(local.clone(), remote.clone());

    // Signed out: three local receipts
    let local_receipts = [receipt("A", 1), receipt("B", 2), receipt("C", 3)];
    for record in &local_receipts {
        receipts.upsert(record.clone()).await.unwrap();
    }

    // First sign-in: the prompt reports exactly the local count
    let user = identity("u1");
    let flow = MigrationFlow::new(local.clone(), remote.clone(), user.clone());
    let prompt = flow.check().await.unwrap().expect("prompt expected");
    assert_eq!(prompt.receipt_count, 3);
    assert!(!prompt.remote_has_data);

    // Confirm migration
    let outcome = flow.migrate(|_| {}).await.unwrap();
    assert_eq!(outcome.migrated_receipts, 3);
    assert_eq!(flow.marker(), Some(MigrationMarker::Completed));

    // The remote collection holds exactly those ids
    let mut remote_ids: Vec<String> = remote
        .snapshot(&user, Receipt::COLLECTION)
        .await
        .unwrap()
        .iter()
        .map(|value| value["id"].as_str().unwrap().to_string())
        .collect();
    remote_ids.sort();
    let mut expected_ids: Vec<String> = local_receipts.iter().map(Record::id).collect();
    expected_ids.sort();
    assert_eq!(remote_ids, expected_ids);

    // Signing in again never re-prompts
    let again = MigrationFlow::new(local, remote, user);
    assert!(again.check().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn migration_is_idempotent_against_same_state() {
    let tmp = tempfile::tempdir().unwrap();
    let local = LocalStore::new(tmp.path());
    local.save_collection(&[receipt("A", 1), receipt("B", 2)]);
    let remote = MemoryRemoteStore::new();
    let user = identity("u1");

    let flow = MigrationFlow::new(local, remote.clone(), user.clone());
    flow.migrate(|_| {}).await.unwrap();
    let once = remote.snapshot(&user, Receipt::COLLECTION).await.unwrap();

    flow.migrate(|_| {}).await.unwrap();
    let twice = remote.snapshot(&user, Receipt::COLLECTION).await.unwrap();

    assert_eq!(once, twice);
}

/// Writes made while signed out stay on the device; writes made as one
/// identity never appear in another identity's collection.
#[tokio::test(flavor = "multi_thread")]
async fn identity_switch_isolation() {
    let tmp = tempfile::tempdir().unwrap();
    let local = LocalStore::new(tmp.path());
    let remote = MemoryRemoteStore::new();
    let receipts: CollectionSync<Receipt, MemoryRemoteStore> =
        CollectionSync::new(local, remote.clone());

    // Signed out
    receipts.upsert(receipt("Anonymous", 1)).await.unwrap();

    // Alice's writes
    receipts.sign_in(identity("alice"));
    wait_for(|| receipts.sync_state().status == SyncStatus::Success).await;
    receipts.upsert(receipt("Alice's cafe", 2)).await.unwrap();
    wait_for(|| receipts.records().len() == 1).await;

    // Bob sees neither the anonymous record nor Alice's
    receipts.sign_out();
    receipts.sign_in(identity("bob"));
    wait_for(|| receipts.sync_state().status == SyncStatus::Success).await;
    assert!(receipts.records().is_empty());

    let alice_remote = remote
        .snapshot(&identity("alice"), Receipt::COLLECTION)
        .await
        .unwrap();
    let bob_remote = remote
        .snapshot(&identity("bob"), Receipt::COLLECTION)
        .await
        .unwrap();
    assert_eq!(alice_remote.len(), 1);
    assert!(bob_remote.is_empty());

    // And the anonymous record is still local-only
    receipts.sign_out();
    assert_eq!(receipts.records().len(), 1);
    assert_eq!(receipts.records()[0].store_name, "Anonymous");
}

/// Two sequential writes to the same id settle on the later value for
/// every subscriber.
#[tokio::test(flavor = "multi_thread")]
async fn last_write_wins_convergence() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = MemoryRemoteStore::new();
    let receipts: CollectionSync<Receipt, MemoryRemoteStore> =
        CollectionSync::new(LocalStore::new(tmp.path()), remote.clone());
    receipts.sign_in(identity("u1"));

    let mut subscriber = receipts.subscribe();

    let mut record = receipt("v1", 1);
    receipts.upsert(record.clone()).await.unwrap();
    record.store_name = "v2".to_string();
    receipts.upsert(record.clone()).await.unwrap();

    // The subscriber settles on the second write
    wait_for(|| {
        let snapshot = subscriber.borrow_and_update();
        snapshot.len() == 1 && snapshot[0].store_name == "v2"
    })
    .await;

    // A late subscriber observes the same converged state
    let late = receipts.records();
    assert_eq!(late[0].store_name, "v2");
}

/// The imported total is always Σ quantity × price, not the upstream figure.
#[test]
fn scan_total_is_recomputed_from_items() {
    let result = parse_scan_response(
        r#"{
            "storeName": "Bakery",
            "category": "food",
            "items": [
                { "name": "Croissant", "quantity": 2, "price": 45 },
                { "name": "Coffee", "quantity": 1, "price": 80 }
            ],
            "paymentMethod": "cash",
            "total": 500
        }"#,
    )
    .unwrap();
    assert_eq!(result.total, 170.0);

    let receipt = result.into_receipt();
    assert_eq!(receipt.total, 170.0);
}

/// A stored quota from January read in February resets both counters and
/// advances the month stamp.
#[tokio::test(flavor = "multi_thread")]
async fn monthly_quota_resets_on_first_read() {
    let tmp = tempfile::tempdir().unwrap();
    let service = SubscriptionService::new(LocalStore::new(tmp.path()), MemoryRemoteStore::new());

    let stale = Subscription {
        receipt_count_this_month: 17,
        ai_scan_count_this_month: 9,
        last_reset_date: "2025-01".to_string(),
        ..Subscription::default()
    };
    service.doc().save(&stale).await.unwrap();

    let current = service.current(date(2025, 2, 10)).await.unwrap();
    assert_eq!(current.receipt_count_this_month, 0);
    assert_eq!(current.ai_scan_count_this_month, 0);
    assert_eq!(current.last_reset_date, "2025-02");
}

use taler_store::migration::{schema_version, set_schema_version};
use taler_store::record::{get, iter_index, put};
use taler_store::records::{ExchangeRecord, ExchangeUpdateStatus};
use taler_store::{run_read, run_write, Database, StoreError, StoreName, CURRENT_SCHEMA_VERSION};
use taler_store_lmdb::{LmdbDatabase, DEFAULT_MAP_SIZE};
use taler_types::Timestamp;

fn exchange(url: &str) -> ExchangeRecord {
    ExchangeRecord {
        base_url: url.to_string(),
        added_at: Timestamp::new(1_000),
        update_status: ExchangeUpdateStatus::Initial,
        last_update: None,
        next_update: Timestamp::new(1_000),
        master_pub: None,
        currency: None,
        last_error: None,
    }
}

fn open(dir: &tempfile::TempDir) -> LmdbDatabase {
    LmdbDatabase::open(dir.path(), DEFAULT_MAP_SIZE).unwrap()
}

#[test]
fn fresh_database_is_migrated() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    let version: u32 = run_read(&db, &[StoreName::Meta], |tx| schema_version(tx)).unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[test]
fn committed_write_is_visible_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(&dir);
        run_write::<_, StoreError, _>(&db, &[StoreName::Exchanges], |tx| {
            put(tx, &exchange("https://ex.example/"))
        })
        .unwrap();
    }
    let db = open(&dir);
    let rec: Option<ExchangeRecord> = run_read(&db, &[StoreName::Exchanges], |tx| {
        get(tx, b"https://ex.example/")
    })
    .unwrap();
    assert_eq!(rec, Some(exchange("https://ex.example/")));
}

#[test]
fn failed_closure_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    let result: Result<(), StoreError> = run_write(&db, &[StoreName::Exchanges], |tx| {
        put(tx, &exchange("https://ex.example/"))?;
        Err(StoreError::Backend("boom".into()))
    });
    assert!(result.is_err());
    let rec: Option<ExchangeRecord> = run_read(&db, &[StoreName::Exchanges], |tx| {
        get(tx, b"https://ex.example/")
    })
    .unwrap();
    assert_eq!(rec, None);
}

#[test]
fn dropped_transaction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    {
        let mut tx = db.begin_write(&[StoreName::Coins]).unwrap();
        tx.put(StoreName::Coins, b"k", b"v").unwrap();
    }
    let tx = db.begin_read(&[StoreName::Coins]).unwrap();
    assert_eq!(tx.get(StoreName::Coins, b"k").unwrap(), None);
}

#[test]
fn store_outside_scope_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    let mut tx = db.begin_write(&[StoreName::Coins]).unwrap();
    assert!(matches!(
        tx.put(StoreName::Reserves, b"k", b"v"),
        Err(StoreError::NotInScope(StoreName::Reserves))
    ));
    assert!(matches!(
        tx.get(StoreName::Reserves, b"k"),
        Err(StoreError::NotInScope(StoreName::Reserves))
    ));
}

#[test]
fn prefix_scan_is_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    let mut tx = db.begin_write(&[StoreName::Coins]).unwrap();
    tx.put(StoreName::Coins, b"ab2", b"2").unwrap();
    tx.put(StoreName::Coins, b"ab1", b"1").unwrap();
    tx.put(StoreName::Coins, b"b", b"x").unwrap();
    tx.commit().unwrap();

    let tx = db.begin_read(&[StoreName::Coins]).unwrap();
    let entries = tx.scan_prefix(StoreName::Coins, b"ab").unwrap();
    assert_eq!(
        entries,
        vec![(b"ab1".to_vec(), b"1".to_vec()), (b"ab2".to_vec(), b"2".to_vec())]
    );
}

#[test]
fn secondary_index_lookup() {
    use taler_store::records::ReserveRecord;
    use taler_store::records::ReserveStatus;
    use taler_types::{Amount, EddsaPrivateKey, EddsaPublicKey};

    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    let reserve = |n: u8, url: &str| ReserveRecord {
        reserve_pub: EddsaPublicKey([n; 32]),
        reserve_priv: EddsaPrivateKey([n; 32]),
        exchange_base_url: url.to_string(),
        instructed_amount: Amount::parse("KUDOS:5").unwrap(),
        status: ReserveStatus::WaitingForFunds,
        created_at: Timestamp::new(1),
        last_known_balance: None,
        withdrawal_group_ids: Vec::new(),
        bank_base_url: None,
        bank_credited: false,
        last_error: None,
    };
    run_write::<_, StoreError, _>(&db, &[StoreName::Reserves], |tx| {
        put(tx, &reserve(1, "https://a.example/"))?;
        put(tx, &reserve(2, "https://b.example/"))?;
        put(tx, &reserve(3, "https://a.example/"))
    })
    .unwrap();
    let found: Vec<ReserveRecord> = run_read(&db, &[StoreName::Reserves], |tx| {
        iter_index(tx, "exchange", b"https://a.example/")
    })
    .unwrap();
    let pubs: Vec<u8> = found.iter().map(|r| r.reserve_pub.0[0]).collect();
    assert_eq!(pubs, vec![1, 3]);
}

#[test]
fn newer_schema_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(&dir);
        run_write::<_, StoreError, _>(&db, &[StoreName::Meta], |tx| {
            set_schema_version(tx, CURRENT_SCHEMA_VERSION + 1)
        })
        .unwrap();
    }
    assert!(matches!(
        LmdbDatabase::open(dir.path(), DEFAULT_MAP_SIZE),
        Err(StoreError::Migration(_))
    ));
}

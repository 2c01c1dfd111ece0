//! Typed records on top of raw transactions.
//!
//! Key layout inside a store:
//!
//! ```text
//! 'r' ++ primary_key                                   -> bincode(record)
//! 'i' ++ index_name ++ 0x00 ++ len(u16 BE) ++ index_key ++ primary_key -> primary_key
//! ```
//!
//! Index entries live in the same store as their records, so any transaction
//! that may write a record can also maintain its indexes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::txn::{ReadTxn, WriteTxn};
use crate::{StoreError, StoreName};

const RECORD_TAG: u8 = b'r';
const INDEX_TAG: u8 = b'i';

pub trait Record: Serialize + DeserializeOwned {
    const STORE: StoreName;

    fn key(&self) -> Vec<u8>;

    /// Secondary index entries as `(index name, index key)` pairs.
    fn index_keys(&self) -> Vec<(&'static str, Vec<u8>)> {
        Vec::new()
    }
}

fn record_key(pk: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(pk.len() + 1);
    k.push(RECORD_TAG);
    k.extend_from_slice(pk);
    k
}

fn index_prefix(index: &str, index_key: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(index.len() + index_key.len() + 4);
    k.push(INDEX_TAG);
    k.extend_from_slice(index.as_bytes());
    k.push(0);
    k.extend_from_slice(&(index_key.len() as u16).to_be_bytes());
    k.extend_from_slice(index_key);
    k
}

fn index_entry_key(index: &str, index_key: &[u8], pk: &[u8]) -> Vec<u8> {
    let mut k = index_prefix(index, index_key);
    k.extend_from_slice(pk);
    k
}

fn decode<R: Record>(bytes: &[u8]) -> Result<R, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn get<R, T>(tx: &T, key: &[u8]) -> Result<Option<R>, StoreError>
where
    R: Record,
    T: ReadTxn + ?Sized,
{
    match tx.get(R::STORE, &record_key(key))? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Like [`get`], but a missing record is `StoreError::NotFound`.
pub fn get_required<R, T>(tx: &T, key: &[u8]) -> Result<R, StoreError>
where
    R: Record,
    T: ReadTxn + ?Sized,
{
    get(tx, key)?.ok_or_else(|| {
        StoreError::NotFound(format!("{}/{}", R::STORE, String::from_utf8_lossy(key)))
    })
}

/// Insert or replace a record and bring its index entries up to date.
pub fn put<R, T>(tx: &mut T, record: &R) -> Result<(), StoreError>
where
    R: Record,
    T: WriteTxn + ?Sized,
{
    let pk = record.key();
    if let Some(old) = get::<R, T>(tx, &pk)? {
        for (index, ik) in old.index_keys() {
            tx.delete(R::STORE, &index_entry_key(index, &ik, &pk))?;
        }
    }
    let bytes = bincode::serialize(record)?;
    tx.put(R::STORE, &record_key(&pk), &bytes)?;
    for (index, ik) in record.index_keys() {
        tx.put(R::STORE, &index_entry_key(index, &ik, &pk), &pk)?;
    }
    Ok(())
}

/// Insert a record, failing with `Duplicate` if the key is taken.
pub fn insert<R, T>(tx: &mut T, record: &R) -> Result<(), StoreError>
where
    R: Record,
    T: WriteTxn + ?Sized,
{
    let pk = record.key();
    if tx.get(R::STORE, &record_key(&pk))?.is_some() {
        return Err(StoreError::Duplicate(format!(
            "{}/{}",
            R::STORE,
            String::from_utf8_lossy(&pk)
        )));
    }
    put(tx, record)
}

/// Remove a record and its index entries. Removing a missing key is a no-op.
pub fn delete<R, T>(tx: &mut T, key: &[u8]) -> Result<(), StoreError>
where
    R: Record,
    T: WriteTxn + ?Sized,
{
    if let Some(old) = get::<R, T>(tx, key)? {
        for (index, ik) in old.index_keys() {
            tx.delete(R::STORE, &index_entry_key(index, &ik, key))?;
        }
        tx.delete(R::STORE, &record_key(key))?;
    }
    Ok(())
}

/// Every record of the store, in primary key order.
pub fn iter<R, T>(tx: &T) -> Result<Vec<R>, StoreError>
where
    R: Record,
    T: ReadTxn + ?Sized,
{
    iter_prefix(tx, &[])
}

/// Records whose primary key starts with `prefix`.
pub fn iter_prefix<R, T>(tx: &T, prefix: &[u8]) -> Result<Vec<R>, StoreError>
where
    R: Record,
    T: ReadTxn + ?Sized,
{
    tx.scan_prefix(R::STORE, &record_key(prefix))?
        .iter()
        .map(|(_, v)| decode(v))
        .collect()
}

/// Records whose `index` entry equals `index_key`.
pub fn iter_index<R, T>(tx: &T, index: &str, index_key: &[u8]) -> Result<Vec<R>, StoreError>
where
    R: Record,
    T: ReadTxn + ?Sized,
{
    let entries = tx.scan_prefix(R::STORE, &index_prefix(index, index_key))?;
    let mut out = Vec::with_capacity(entries.len());
    for (_, pk) in entries {
        match get(tx, &pk)? {
            Some(r) => out.push(r),
            None => {
                return Err(StoreError::Corruption(format!(
                    "dangling {} index entry in {}",
                    index,
                    R::STORE
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Entries;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MapTxn {
        data: BTreeMap<(StoreName, Vec<u8>), Vec<u8>>,
    }

    impl ReadTxn for MapTxn {
        fn get(&self, store: StoreName, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(self.data.get(&(store, key.to_vec())).cloned())
        }

        fn scan_prefix(&self, store: StoreName, prefix: &[u8]) -> Result<Entries, StoreError> {
            Ok(self
                .data
                .range((store, prefix.to_vec())..)
                .take_while(|((s, k), _)| *s == store && k.starts_with(prefix))
                .map(|((_, k), v)| (k.clone(), v.clone()))
                .collect())
        }
    }

    impl WriteTxn for MapTxn {
        fn put(&mut self, store: StoreName, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
            self.data.insert((store, key.to_vec()), value.to_vec());
            Ok(())
        }

        fn delete(&mut self, store: StoreName, key: &[u8]) -> Result<(), StoreError> {
            self.data.remove(&(store, key.to_vec()));
            Ok(())
        }

        fn commit(self: Box<Self>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        owner: String,
    }

    impl Record for Item {
        const STORE: StoreName = StoreName::Coins;

        fn key(&self) -> Vec<u8> {
            self.id.as_bytes().to_vec()
        }

        fn index_keys(&self) -> Vec<(&'static str, Vec<u8>)> {
            vec![("owner", self.owner.as_bytes().to_vec())]
        }
    }

    fn item(id: &str, owner: &str) -> Item {
        Item {
            id: id.into(),
            owner: owner.into(),
        }
    }

    #[test]
    fn put_then_get() {
        let mut tx = MapTxn::default();
        put(&mut tx, &item("a", "alice")).unwrap();
        assert_eq!(get::<Item, _>(&tx, b"a").unwrap(), Some(item("a", "alice")));
        assert_eq!(get::<Item, _>(&tx, b"b").unwrap(), None);
        assert!(matches!(
            get_required::<Item, _>(&tx, b"b"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn index_follows_updates() {
        let mut tx = MapTxn::default();
        put(&mut tx, &item("a", "alice")).unwrap();
        put(&mut tx, &item("b", "alice")).unwrap();
        assert_eq!(iter_index::<Item, _>(&tx, "owner", b"alice").unwrap().len(), 2);

        put(&mut tx, &item("a", "bob")).unwrap();
        assert_eq!(
            iter_index::<Item, _>(&tx, "owner", b"alice").unwrap(),
            vec![item("b", "alice")]
        );
        assert_eq!(
            iter_index::<Item, _>(&tx, "owner", b"bob").unwrap(),
            vec![item("a", "bob")]
        );
    }

    #[test]
    fn index_key_is_not_a_prefix_match() {
        let mut tx = MapTxn::default();
        put(&mut tx, &item("a", "al")).unwrap();
        put(&mut tx, &item("b", "alice")).unwrap();
        assert_eq!(iter_index::<Item, _>(&tx, "owner", b"al").unwrap(), vec![item("a", "al")]);
    }

    #[test]
    fn delete_removes_index_entries() {
        let mut tx = MapTxn::default();
        put(&mut tx, &item("a", "alice")).unwrap();
        delete::<Item, _>(&mut tx, b"a").unwrap();
        assert!(tx.data.is_empty());
        delete::<Item, _>(&mut tx, b"a").unwrap();
    }

    #[test]
    fn insert_refuses_duplicates() {
        let mut tx = MapTxn::default();
        insert(&mut tx, &item("a", "alice")).unwrap();
        assert!(matches!(
            insert(&mut tx, &item("a", "bob")),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn iter_skips_index_entries() {
        let mut tx = MapTxn::default();
        put(&mut tx, &item("b", "x")).unwrap();
        put(&mut tx, &item("a", "y")).unwrap();
        let all = iter::<Item, _>(&tx).unwrap();
        assert_eq!(all, vec![item("a", "y"), item("b", "x")]);
        assert_eq!(iter_prefix::<Item, _>(&tx, b"b").unwrap(), vec![item("b", "x")]);
    }
}

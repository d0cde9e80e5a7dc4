use lmdb_zero as lmdb;
use lmdb_zero::traits::CreateCursor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::sync::Arc;

use crate::common::{Error, ErrorKind, Result};

const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
const MAX_DBS: u32 = 8;

fn store_err<E: std::fmt::Display>(e: E) -> Error {
	ErrorKind::Store(format!("{}", e)).into()
}

fn is_not_found(err: &lmdb::error::Error) -> bool {
	match err {
		lmdb::error::Error::Code(code) => *code == lmdb::error::NOTFOUND,
		_ => false,
	}
}

/// Key/value store backing one database instance. A thin wrapper around a
/// single LMDB database; all writes go through an atomic [`Batch`].
pub struct Store {
	env: Arc<lmdb::Environment>,
	db: Arc<lmdb::Database<'static>>,
}

impl Store {
	/// Open (creating if necessary) the store under `root_path`.
	pub fn new(root_path: &str, name: &str) -> Result<Store> {
		fs::create_dir_all(root_path)
			.map_err(|e| ErrorKind::Store(format!("failed to create db directory: {}", e)))?;

		let env = unsafe {
			let mut builder = lmdb::EnvBuilder::new().map_err(store_err)?;
			builder.set_maxdbs(MAX_DBS).map_err(store_err)?;
			builder.set_mapsize(DEFAULT_MAP_SIZE).map_err(store_err)?;
			Arc::new(
				builder
					.open(root_path, lmdb::open::NOTLS, 0o600)
					.map_err(store_err)?,
			)
		};
		let db = Arc::new(
			lmdb::Database::open(
				env.clone(),
				Some(name),
				&lmdb::DatabaseOptions::new(lmdb::db::CREATE),
			)
			.map_err(store_err)?,
		);

		Ok(Store { env, db })
	}

	/// Get a raw value.
	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		let txn = lmdb::ReadTransaction::new(self.env.clone()).map_err(store_err)?;
		let access = txn.access();
		let res: std::result::Result<&[u8], lmdb::error::Error> = access.get(&self.db, key);
		match res {
			Ok(bytes) => Ok(Some(bytes.to_vec())),
			Err(ref e) if is_not_found(e) => Ok(None),
			Err(e) => Err(store_err(e)),
		}
	}

	/// Get a value deserialized from its stored blob.
	pub fn get_ser<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
		match self.get(key)? {
			Some(bytes) => {
				let value = serde_json::from_slice(&bytes)
					.map_err(|e| ErrorKind::Serialization(format!("{}", e)))?;
				Ok(Some(value))
			}
			None => Ok(None),
		}
	}

	/// Whether the key exists.
	pub fn exists(&self, key: &[u8]) -> Result<bool> {
		Ok(self.get(key)?.is_some())
	}

	/// Forward iterator over all records whose key starts with `prefix`, in
	/// byte-lexicographic key order. Yielded keys have the prefix stripped.
	pub fn iter(&self, prefix: &[u8]) -> Result<PrefixIterator> {
		let tx = Arc::new(lmdb::ReadTransaction::new(self.env.clone()).map_err(store_err)?);
		let cursor = Arc::new(tx.cursor(self.db.clone()).map_err(store_err)?);
		Ok(PrefixIterator {
			tx,
			cursor,
			seek: false,
			prefix: prefix.to_vec(),
		})
	}

	/// Open an atomic write batch. All edits staged on the batch become
	/// visible together on `commit`; dropping the batch discards them.
	pub fn batch(&self) -> Result<Batch> {
		let tx = lmdb::WriteTransaction::new(self.env.clone()).map_err(store_err)?;
		Ok(Batch { store: self, tx })
	}
}

/// An atomic batch in which all changes are committed at once or discarded
/// on drop.
pub struct Batch<'a> {
	store: &'a Store,
	tx: lmdb::WriteTransaction<'static>,
}

impl<'a> Batch<'a> {
	/// Stage a raw key/value pair, replacing any existing value.
	pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
		self.tx
			.access()
			.put(&self.store.db, key, value, lmdb::put::Flags::empty())
			.map_err(store_err)?;
		Ok(())
	}

	/// Stage a serialized value.
	pub fn put_ser<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
		let bytes =
			serde_json::to_vec(value).map_err(|e| ErrorKind::Serialization(format!("{}", e)))?;
		self.put(key, &bytes)
	}

	/// Stage a delete. Returns false when the key was not present.
	pub fn delete(&self, key: &[u8]) -> Result<bool> {
		match self.tx.access().del_key(&self.store.db, key) {
			Ok(()) => Ok(true),
			Err(ref e) if is_not_found(e) => Ok(false),
			Err(e) => Err(store_err(e)),
		}
	}

	/// Commit all staged changes.
	pub fn commit(self) -> Result<()> {
		self.tx.commit().map_err(store_err)
	}
}

/// Owning iterator over a key prefix. Holds its own read transaction, so a
/// snapshot view of the table as of iterator creation.
pub struct PrefixIterator {
	tx: Arc<lmdb::ReadTransaction<'static>>,
	cursor: Arc<lmdb::Cursor<'static, 'static>>,
	seek: bool,
	prefix: Vec<u8>,
}

impl Iterator for PrefixIterator {
	type Item = (Vec<u8>, Vec<u8>);

	fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
		let access = self.tx.access();
		let cursor = Arc::get_mut(&mut self.cursor).expect("cursor is never shared");
		let kv: std::result::Result<(&[u8], &[u8]), lmdb::error::Error> = if self.seek {
			cursor.next(&access)
		} else {
			self.seek = true;
			cursor.seek_range_k(&access, &self.prefix[..])
		};
		match kv {
			Ok((key, value)) if key.starts_with(&self.prefix) => {
				Some((key[self.prefix.len()..].to_vec(), value.to_vec()))
			}
			_ => None,
		}
	}
}

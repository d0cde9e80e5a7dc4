pub mod lmdb;

pub use self::lmdb::{Batch, PrefixIterator, Store};

/// Build a namespaced key: one table-prefix byte followed by the raw key
/// bytes. All tables share a single LMDB database; fixed-width axis keys
/// keep multi-value entries parseable under range scans.
pub fn to_key(prefix: u8, k: &[u8]) -> Vec<u8> {
	let mut res = Vec::with_capacity(k.len() + 1);
	res.push(prefix);
	res.extend_from_slice(k);
	res
}

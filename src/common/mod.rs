pub mod config;
mod error;

pub use self::config::{ChainTypes, DbConfig};
pub use self::error::ErrorKind;
pub use failure::Error;
pub use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use std::sync::Arc;
use std::result::Result as StdResult;

pub type Result<T> = StdResult<T, Error>;

/// Hex rendering for identifiers and hashes in log output.
pub fn to_hex(bytes: &[u8]) -> String {
	let mut out = String::with_capacity(bytes.len() * 2);
	for b in bytes {
		out.push_str(&format!("{:02x}", b));
	}
	out
}

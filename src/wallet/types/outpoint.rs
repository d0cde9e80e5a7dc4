use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{to_hex, ErrorKind, Result};

pub const TXID_LEN: usize = 32;
pub const OUTPOINT_LEN: usize = TXID_LEN + 4;

/// Transaction hash.
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct Txid(pub [u8; TXID_LEN]);

impl Txid {
	pub fn from_slice(bytes: &[u8]) -> Result<Txid> {
		if bytes.len() != TXID_LEN {
			return Err(ErrorKind::Serialization(format!(
				"invalid txid length {}",
				bytes.len()
			))
			.into());
		}
		let mut out = [0u8; TXID_LEN];
		out.copy_from_slice(bytes);
		Ok(Txid(out))
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Display for Txid {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", to_hex(&self.0))
	}
}

/// Canonical identity of a transaction output: txid plus output index.
/// A copyable value, never owned by any one component; ordering is
/// lexicographic on (txid, index).
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct Outpoint {
	pub txid: Txid,
	pub index: u32,
}

impl Outpoint {
	pub fn new(txid: Txid, index: u32) -> Outpoint {
		Outpoint { txid, index }
	}

	/// The sentinel previous-output of a generation (coinbase) input.
	pub fn null() -> Outpoint {
		Outpoint {
			txid: Txid::default(),
			index: u32::max_value(),
		}
	}

	pub fn is_null(&self) -> bool {
		*self == Outpoint::null()
	}

	/// 36-byte encoding: txid followed by the little-endian index.
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(OUTPOINT_LEN);
		out.extend_from_slice(&self.txid.0);
		out.extend_from_slice(&self.index.to_le_bytes());
		out
	}

	pub fn decode(bytes: &[u8]) -> Result<Outpoint> {
		if bytes.len() != OUTPOINT_LEN {
			return Err(ErrorKind::Serialization(format!(
				"invalid outpoint length {}",
				bytes.len()
			))
			.into());
		}
		let txid = Txid::from_slice(&bytes[..TXID_LEN])?;
		let mut index = [0u8; 4];
		index.copy_from_slice(&bytes[TXID_LEN..]);
		Ok(Outpoint {
			txid,
			index: u32::from_le_bytes(index),
		})
	}
}

impl fmt::Display for Outpoint {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}:{}", self.txid, self.index)
	}
}

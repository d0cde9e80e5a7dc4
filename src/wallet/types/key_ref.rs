use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{AccountId, ID_LEN};
use crate::common::{ErrorKind, Result};

pub const KEY_REF_LEN: usize = ID_LEN + 4 + 4;
pub const SUBCHAIN_ID_LEN: usize = ID_LEN + 4;

/// Path variant within a subaccount. The persisted discriminants are part
/// of the storage format; never renumber.
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum Subchain {
	/// Sentinel; never persisted on a live key
	Error,
	/// Change keys
	Internal,
	/// Receive keys
	External,
	/// Expected inbound via payment-code notification
	Incoming,
	/// Derived by us but controlled by the recipient of an authored payment
	Outgoing,
	/// Payment-code notification keys
	Notification,
}

impl Subchain {
	pub fn to_u32(self) -> u32 {
		match self {
			Subchain::Error => 0,
			Subchain::Internal => 1,
			Subchain::External => 2,
			Subchain::Incoming => 3,
			Subchain::Outgoing => 4,
			Subchain::Notification => 5,
		}
	}

	pub fn from_u32(value: u32) -> Result<Subchain> {
		match value {
			0 => Ok(Subchain::Error),
			1 => Ok(Subchain::Internal),
			2 => Ok(Subchain::External),
			3 => Ok(Subchain::Incoming),
			4 => Ok(Subchain::Outgoing),
			5 => Ok(Subchain::Notification),
			other => {
				Err(ErrorKind::Serialization(format!("unknown subchain {}", other)).into())
			}
		}
	}
}

impl fmt::Display for Subchain {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Subchain::Error => write!(f, "error"),
			Subchain::Internal => write!(f, "internal"),
			Subchain::External => write!(f, "external"),
			Subchain::Incoming => write!(f, "incoming"),
			Subchain::Outgoing => write!(f, "outgoing"),
			Subchain::Notification => write!(f, "notification"),
		}
	}
}

/// Addresses a single wallet key without requiring the key material:
/// (subaccount, subchain, derivation index).
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct KeyRef {
	pub subaccount: AccountId,
	pub subchain: Subchain,
	pub index: u32,
}

impl KeyRef {
	pub fn new(subaccount: AccountId, subchain: Subchain, index: u32) -> KeyRef {
		KeyRef {
			subaccount,
			subchain,
			index,
		}
	}

	/// The subchain axis this key belongs to.
	pub fn subchain_id(&self) -> SubchainId {
		SubchainId {
			account: self.subaccount,
			subchain: self.subchain,
		}
	}

	/// 40-byte encoding: subaccount, LE subchain, LE index.
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(KEY_REF_LEN);
		out.extend_from_slice(&self.subaccount.0);
		out.extend_from_slice(&self.subchain.to_u32().to_le_bytes());
		out.extend_from_slice(&self.index.to_le_bytes());
		out
	}

	pub fn decode(bytes: &[u8]) -> Result<KeyRef> {
		if bytes.len() != KEY_REF_LEN {
			return Err(ErrorKind::Serialization(format!(
				"invalid key reference length {}",
				bytes.len()
			))
			.into());
		}
		let subaccount = AccountId::from_slice(&bytes[..ID_LEN])?;
		let mut subchain = [0u8; 4];
		subchain.copy_from_slice(&bytes[ID_LEN..ID_LEN + 4]);
		let mut index = [0u8; 4];
		index.copy_from_slice(&bytes[ID_LEN + 4..]);
		Ok(KeyRef {
			subaccount,
			subchain: Subchain::from_u32(u32::from_le_bytes(subchain))?,
			index: u32::from_le_bytes(index),
		})
	}
}

impl fmt::Display for KeyRef {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}/{}/{}", self.subaccount, self.subchain, self.index)
	}
}

/// Axis key of the subchain index: subaccount plus subchain.
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct SubchainId {
	pub account: AccountId,
	pub subchain: Subchain,
}

impl SubchainId {
	pub fn new(account: AccountId, subchain: Subchain) -> SubchainId {
		SubchainId { account, subchain }
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(SUBCHAIN_ID_LEN);
		out.extend_from_slice(&self.account.0);
		out.extend_from_slice(&self.subchain.to_u32().to_le_bytes());
		out
	}

	pub fn decode(bytes: &[u8]) -> Result<SubchainId> {
		if bytes.len() != SUBCHAIN_ID_LEN {
			return Err(ErrorKind::Serialization(format!(
				"invalid subchain id length {}",
				bytes.len()
			))
			.into());
		}
		let account = AccountId::from_slice(&bytes[..ID_LEN])?;
		let mut subchain = [0u8; 4];
		subchain.copy_from_slice(&bytes[ID_LEN..]);
		Ok(SubchainId {
			account,
			subchain: Subchain::from_u32(u32::from_le_bytes(subchain))?,
		})
	}
}

impl fmt::Display for SubchainId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}/{}", self.account, self.subchain)
	}
}

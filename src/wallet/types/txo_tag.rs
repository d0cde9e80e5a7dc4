use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{ErrorKind, Result};

/// Classification tags carried by an output. An output may hold several:
/// a change output is both Normal and Change, a payment-code notification
/// receipt is additionally Notification.
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum TxoTag {
	Normal,
	/// Coinbase output
	Generation,
	/// Carries a payment-code notification
	Notification,
	/// Pays into one of our own change keys
	Change,
}

impl TxoTag {
	pub fn to_u32(self) -> u32 {
		match self {
			TxoTag::Normal => 0,
			TxoTag::Generation => 1,
			TxoTag::Notification => 2,
			TxoTag::Change => 3,
		}
	}

	pub fn from_u32(value: u32) -> Result<TxoTag> {
		match value {
			0 => Ok(TxoTag::Normal),
			1 => Ok(TxoTag::Generation),
			2 => Ok(TxoTag::Notification),
			3 => Ok(TxoTag::Change),
			other => Err(ErrorKind::Serialization(format!("unknown tag {}", other)).into()),
		}
	}
}

impl fmt::Display for TxoTag {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			TxoTag::Normal => write!(f, "normal"),
			TxoTag::Generation => write!(f, "generation"),
			TxoTag::Notification => write!(f, "notification"),
			TxoTag::Change => write!(f, "change"),
		}
	}
}

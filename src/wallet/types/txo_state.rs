use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{ErrorKind, Result};

/// Lifecycle state of a tracked output. The persisted discriminants
/// (`to_u32`) are used as storage keys; never renumber.
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum TxoState {
	/// Sentinel; never persisted
	Error,
	/// Received, not yet in a block
	UnconfirmedNew,
	/// Spent by a transaction not yet in a block
	UnconfirmedSpend,
	/// Received and matured (spendable)
	ConfirmedNew,
	/// Spent by a transaction in a block
	ConfirmedSpend,
	/// Previously confirmed receipt whose block was reorged out
	OrphanedNew,
	/// Previously confirmed spend whose block was reorged out
	OrphanedSpend,
	/// Coinbase output not yet enough confirmations deep
	Immature,
}

impl TxoState {
	/// Every persistable state, in discriminant order.
	pub const ALL: [TxoState; 7] = [
		TxoState::UnconfirmedNew,
		TxoState::UnconfirmedSpend,
		TxoState::ConfirmedNew,
		TxoState::ConfirmedSpend,
		TxoState::OrphanedNew,
		TxoState::OrphanedSpend,
		TxoState::Immature,
	];

	pub fn to_u32(self) -> u32 {
		match self {
			TxoState::Error => 0,
			TxoState::UnconfirmedNew => 1,
			TxoState::UnconfirmedSpend => 2,
			TxoState::ConfirmedNew => 3,
			TxoState::ConfirmedSpend => 4,
			TxoState::OrphanedNew => 5,
			TxoState::OrphanedSpend => 6,
			TxoState::Immature => 7,
		}
	}

	pub fn from_u32(value: u32) -> Result<TxoState> {
		match value {
			0 => Ok(TxoState::Error),
			1 => Ok(TxoState::UnconfirmedNew),
			2 => Ok(TxoState::UnconfirmedSpend),
			3 => Ok(TxoState::ConfirmedNew),
			4 => Ok(TxoState::ConfirmedSpend),
			5 => Ok(TxoState::OrphanedNew),
			6 => Ok(TxoState::OrphanedSpend),
			7 => Ok(TxoState::Immature),
			other => Err(ErrorKind::Serialization(format!("unknown state {}", other)).into()),
		}
	}

	/// States an output may be created in.
	pub fn can_create(self) -> bool {
		match self {
			TxoState::UnconfirmedNew | TxoState::ConfirmedNew | TxoState::Immature => true,
			_ => false,
		}
	}

	/// The complete legal transition set. Anything not listed here fails.
	pub fn can_transition_to(self, new_state: TxoState) -> bool {
		use TxoState::*;
		match (self, new_state) {
			(UnconfirmedNew, ConfirmedNew)
			| (UnconfirmedNew, Immature)
			| (UnconfirmedNew, UnconfirmedSpend)
			| (UnconfirmedNew, OrphanedNew) => true,
			(Immature, ConfirmedNew) | (Immature, OrphanedNew) => true,
			(ConfirmedNew, UnconfirmedSpend)
			| (ConfirmedNew, ConfirmedSpend)
			| (ConfirmedNew, OrphanedNew) => true,
			(UnconfirmedSpend, ConfirmedSpend)
			| (UnconfirmedSpend, ConfirmedNew)
			| (UnconfirmedSpend, OrphanedSpend) => true,
			(ConfirmedSpend, OrphanedSpend) => true,
			(OrphanedNew, UnconfirmedNew) | (OrphanedNew, ConfirmedNew) => true,
			(OrphanedSpend, UnconfirmedSpend) | (OrphanedSpend, ConfirmedSpend) => true,
			_ => false,
		}
	}
}

impl fmt::Display for TxoState {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			TxoState::Error => write!(f, "error"),
			TxoState::UnconfirmedNew => write!(f, "unconfirmed new"),
			TxoState::UnconfirmedSpend => write!(f, "unconfirmed spend"),
			TxoState::ConfirmedNew => write!(f, "confirmed new"),
			TxoState::ConfirmedSpend => write!(f, "confirmed spend"),
			TxoState::OrphanedNew => write!(f, "orphaned new"),
			TxoState::OrphanedSpend => write!(f, "orphaned spend"),
			TxoState::Immature => write!(f, "immature"),
		}
	}
}

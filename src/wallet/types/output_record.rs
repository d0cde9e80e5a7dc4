use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{Amount, BlockPosition, ContactId, KeyRef, NymId, Script, Subchain, TxoState, TxoTag};
use crate::common::{ErrorKind, Result};

/// The full tracked state of one output. The database's output store is the
/// exclusive owner of these records; every other component refers to them
/// by outpoint and borrows through the store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputRecord {
	/// Record format version
	pub version: u32,
	/// Output index within its transaction
	pub index: u32,
	/// Monetary value
	pub value: Amount,
	/// Locking script with its recognized pattern
	pub script: Script,
	/// Wallet keys this output is locked to
	pub keys: Vec<KeyRef>,
	/// Owner nyms resolved for those keys (empty for outputs we merely
	/// derived the key for, such as outgoing payments)
	pub owners: Vec<NymId>,
	/// Fingerprints of the script's data elements
	pub patterns: Vec<u64>,
	/// Fingerprint of the whole script, when the pattern is recognized
	pub script_hash: Option<u64>,
	/// Whether the fingerprints have been indexed
	pub indexed: bool,
	/// Mined position, or the unmined sentinel
	pub position: BlockPosition,
	/// Current lifecycle state
	pub state: TxoState,
	/// Classification tags
	pub tags: BTreeSet<TxoTag>,
	/// Contact that paid us, when known
	pub payer: Option<ContactId>,
	/// Contact we paid, when known
	pub payee: Option<ContactId>,
}

impl OutputRecord {
	pub const VERSION: u32 = 1;

	pub fn new(index: u32, value: Amount, script: Script, keys: Vec<KeyRef>) -> OutputRecord {
		let patterns = script.fingerprints();
		let script_hash = script.script_hash_fingerprint();
		OutputRecord {
			version: OutputRecord::VERSION,
			index,
			value,
			script,
			keys,
			owners: vec![],
			patterns,
			script_hash,
			indexed: true,
			position: BlockPosition::unmined(),
			state: TxoState::Error,
			tags: BTreeSet::new(),
			payer: None,
			payee: None,
		}
	}

	/// Keys excluding the outgoing subchain, i.e. the keys that actually
	/// attribute this output to us.
	pub fn owned_keys(&self) -> impl Iterator<Item = &KeyRef> {
		self.keys
			.iter()
			.filter(|key| key.subchain != Subchain::Outgoing)
	}

	/// Length-prefixed structured encoding, as stored in the outputs table.
	pub fn encode(&self) -> Result<Vec<u8>> {
		serde_json::to_vec(self).map_err(|e| ErrorKind::Serialization(format!("{}", e)).into())
	}

	pub fn decode(bytes: &[u8]) -> Result<OutputRecord> {
		serde_json::from_slice(bytes)
			.map_err(|e| ErrorKind::Serialization(format!("{}", e)).into())
	}
}

#[cfg(test)]
mod tests {
	use super::super::AccountId;
	use super::*;

	fn sample(state: TxoState) -> OutputRecord {
		let mut record = OutputRecord::new(
			2,
			Amount::from(5_000_000_000u64),
			Script::new(vec![0x6a, 2, 0xca, 0xfe]),
			vec![KeyRef::new(AccountId([8; 32]), Subchain::External, 4)],
		);
		record.owners = vec![NymId([9; 32])];
		record.state = state;
		record.position = BlockPosition::new(12, super::super::BlockHash([3; 32]));
		record.tags.insert(TxoTag::Normal);
		record.tags.insert(TxoTag::Change);
		record.payer = Some(ContactId([1; 32]));
		record
	}

	#[test]
	fn encode_decode_round_trip_for_every_state() {
		for state in TxoState::ALL.iter() {
			let record = sample(*state);
			let decoded = OutputRecord::decode(&record.encode().unwrap()).unwrap();
			assert_eq!(decoded, record);
		}
	}

	#[test]
	fn owned_keys_exclude_outgoing() {
		let mut record = sample(TxoState::ConfirmedNew);
		record
			.keys
			.push(KeyRef::new(AccountId([8; 32]), Subchain::Outgoing, 1));
		let owned: Vec<_> = record.owned_keys().collect();
		assert_eq!(owned.len(), 1);
		assert_eq!(owned[0].subchain, Subchain::External);
	}
}

use serde::{Deserialize, Serialize};

use super::{Amount, KeyRef, OutputRecord, Outpoint, Script, Txid};

/// One input of a parsed transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TxIn {
	pub previous_output: Outpoint,
	/// Filled in during ingest when the consumed output is ours, so
	/// downstream consumers see the input's provenance.
	pub spends: Option<Box<OutputRecord>>,
}

impl TxIn {
	pub fn new(previous_output: Outpoint) -> TxIn {
		TxIn {
			previous_output,
			spends: None,
		}
	}

	/// The generation (coinbase) input.
	pub fn generation() -> TxIn {
		TxIn::new(Outpoint::null())
	}
}

/// One output of a parsed transaction, annotated by the scanner with the
/// wallet keys it pays to (empty when the output is not ours).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TxOut {
	pub value: Amount,
	pub script: Script,
	pub keys: Vec<KeyRef>,
}

impl TxOut {
	pub fn new(value: Amount, script: Script, keys: Vec<KeyRef>) -> TxOut {
		TxOut {
			value,
			script,
			keys,
		}
	}
}

/// A parsed transaction as handed to the database by the block parser or
/// mempool scanner. Wire formats are out of scope; this object model is the
/// boundary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
	pub txid: Txid,
	pub inputs: Vec<TxIn>,
	pub outputs: Vec<TxOut>,
}

impl Transaction {
	pub fn new(txid: Txid, inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Transaction {
		Transaction {
			txid,
			inputs,
			outputs,
		}
	}

	/// Whether this is a generation (coinbase) transaction.
	pub fn is_generation(&self) -> bool {
		self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
	}
}

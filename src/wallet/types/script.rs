use blake2_rfc::blake2b::Blake2b;
use serde::{Deserialize, Serialize};
use std::fmt;

const OP_RETURN: u8 = 0x6a;
const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKMULTISIG: u8 = 0xae;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;

/// Recognized locking-script templates.
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum ScriptPattern {
	PayToPubkey,
	PayToPubkeyHash,
	PayToScriptHash,
	PayToMultisig,
	NullData,
	Unknown,
}

impl fmt::Display for ScriptPattern {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ScriptPattern::PayToPubkey => write!(f, "P2PK"),
			ScriptPattern::PayToPubkeyHash => write!(f, "P2PKH"),
			ScriptPattern::PayToScriptHash => write!(f, "P2SH"),
			ScriptPattern::PayToMultisig => write!(f, "P2MS"),
			ScriptPattern::NullData => write!(f, "null-data"),
			ScriptPattern::Unknown => write!(f, "unknown"),
		}
	}
}

/// A locking script as produced by the block parser: raw bytes plus the
/// recognized pattern. Fingerprints of the script's data elements feed the
/// pattern indices used by chain scanners.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Script {
	bytes: Vec<u8>,
	pattern: ScriptPattern,
}

/// 8-byte blake2b digest truncated to u64, the fingerprint used across the
/// pattern indices.
pub fn fingerprint(data: &[u8]) -> u64 {
	let mut hasher = Blake2b::new(8);
	hasher.update(data);
	let hash = hasher.finalize();
	let mut out = [0u8; 8];
	out.copy_from_slice(hash.as_bytes());
	u64::from_le_bytes(out)
}

impl Script {
	pub fn new(bytes: Vec<u8>) -> Script {
		let pattern = classify(&bytes);
		Script { bytes, pattern }
	}

	pub fn pattern(&self) -> ScriptPattern {
		self.pattern
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes
	}

	/// The data pushes that identify this script: pubkeys for P2PK/P2MS,
	/// hashes for P2PKH/P2SH, the payload for null-data outputs.
	pub fn data_elements(&self) -> Vec<&[u8]> {
		match self.pattern {
			ScriptPattern::PayToPubkeyHash => vec![&self.bytes[3..23]],
			ScriptPattern::PayToScriptHash => vec![&self.bytes[2..22]],
			ScriptPattern::PayToPubkey => {
				let len = self.bytes[0] as usize;
				vec![&self.bytes[1..1 + len]]
			}
			ScriptPattern::PayToMultisig => pushes(&self.bytes[1..self.bytes.len() - 2]),
			ScriptPattern::NullData => pushes(&self.bytes[1..]),
			ScriptPattern::Unknown => vec![],
		}
	}

	/// Fingerprints of every data element.
	pub fn fingerprints(&self) -> Vec<u64> {
		self.data_elements()
			.into_iter()
			.map(fingerprint)
			.collect()
	}

	/// Fingerprint of the full script, for P2SH-style matching. Absent for
	/// unrecognized scripts.
	pub fn script_hash_fingerprint(&self) -> Option<u64> {
		match self.pattern {
			ScriptPattern::Unknown => None,
			_ => Some(fingerprint(&self.bytes)),
		}
	}
}

fn classify(bytes: &[u8]) -> ScriptPattern {
	if bytes.is_empty() {
		return ScriptPattern::Unknown;
	}
	if bytes[0] == OP_RETURN {
		return ScriptPattern::NullData;
	}
	if bytes.len() == 25
		&& bytes[0] == OP_DUP
		&& bytes[1] == OP_HASH160
		&& bytes[2] == 20
		&& bytes[23] == OP_EQUALVERIFY
		&& bytes[24] == OP_CHECKSIG
	{
		return ScriptPattern::PayToPubkeyHash;
	}
	if bytes.len() == 23 && bytes[0] == OP_HASH160 && bytes[1] == 20 && bytes[22] == OP_EQUAL {
		return ScriptPattern::PayToScriptHash;
	}
	if ((bytes.len() == 35 && bytes[0] == 33) || (bytes.len() == 67 && bytes[0] == 65))
		&& bytes[bytes.len() - 1] == OP_CHECKSIG
	{
		return ScriptPattern::PayToPubkey;
	}
	if bytes.len() >= 4
		&& bytes[bytes.len() - 1] == OP_CHECKMULTISIG
		&& (OP_1..=OP_16).contains(&bytes[0])
		&& (OP_1..=OP_16).contains(&bytes[bytes.len() - 2])
	{
		return ScriptPattern::PayToMultisig;
	}
	ScriptPattern::Unknown
}

// Direct data pushes (0x01..=0x4b) only; anything else ends the walk.
fn pushes(bytes: &[u8]) -> Vec<&[u8]> {
	let mut out = Vec::new();
	let mut i = 0;
	while i < bytes.len() {
		let len = bytes[i] as usize;
		if len == 0 || len > 75 || i + 1 + len > bytes.len() {
			break;
		}
		out.push(&bytes[i + 1..i + 1 + len]);
		i += 1 + len;
	}
	out
}

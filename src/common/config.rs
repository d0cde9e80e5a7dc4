use serde::{Deserialize, Serialize};
use std::fmt;

/// Which chain flavour a database instance tracks. The variant decides the
/// coinbase maturation interval; everything else about the chain lives
/// outside this crate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainTypes {
	/// Single-confirmation maturity, for tests and regtest-style harnesses
	AutomatedTesting,
	/// Public test network
	Testnet,
	/// Main network
	Mainnet,
}

impl ChainTypes {
	/// Number of confirmations a generation (coinbase) output must
	/// accumulate before it is spendable.
	pub fn maturation_interval(&self) -> i64 {
		match self {
			ChainTypes::AutomatedTesting => 1,
			ChainTypes::Testnet | ChainTypes::Mainnet => 100,
		}
	}
}

impl Default for ChainTypes {
	fn default() -> ChainTypes {
		ChainTypes::Mainnet
	}
}

impl fmt::Display for ChainTypes {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ChainTypes::AutomatedTesting => write!(f, "automated_testing"),
			ChainTypes::Testnet => write!(f, "testnet"),
			ChainTypes::Mainnet => write!(f, "mainnet"),
		}
	}
}

/// Filesystem and chain parameters for one database instance.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbConfig {
	/// Directory holding the LMDB environment
	pub data_dir: String,
	/// Chain flavour
	pub chain_type: ChainTypes,
}

impl DbConfig {
	pub fn new(data_dir: &str, chain_type: ChainTypes) -> DbConfig {
		DbConfig {
			data_dir: data_dir.to_owned(),
			chain_type,
		}
	}
}

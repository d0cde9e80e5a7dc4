use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{to_hex, ErrorKind, Result};

pub const BLOCK_HASH_LEN: usize = 32;
pub const POSITION_LEN: usize = 8 + BLOCK_HASH_LEN;

/// Block hash.
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct BlockHash(pub [u8; BLOCK_HASH_LEN]);

impl BlockHash {
	pub fn from_slice(bytes: &[u8]) -> Result<BlockHash> {
		if bytes.len() != BLOCK_HASH_LEN {
			return Err(ErrorKind::Serialization(format!(
				"invalid block hash length {}",
				bytes.len()
			))
			.into());
		}
		let mut out = [0u8; BLOCK_HASH_LEN];
		out.copy_from_slice(bytes);
		Ok(BlockHash(out))
	}
}

impl fmt::Display for BlockHash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", to_hex(&self.0))
	}
}

/// Where an output was mined: height plus block hash. The unmined sentinel
/// uses height -1 and the blank hash. Ordering is (height, hash).
#[derive(
	Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct BlockPosition {
	pub height: i64,
	pub hash: BlockHash,
}

impl BlockPosition {
	pub fn new(height: i64, hash: BlockHash) -> BlockPosition {
		BlockPosition { height, hash }
	}

	/// The sentinel position of outputs not (yet) in any block.
	pub fn unmined() -> BlockPosition {
		BlockPosition {
			height: -1,
			hash: BlockHash::default(),
		}
	}

	pub fn is_unmined(&self) -> bool {
		self.height < 0
	}

	/// 40-byte encoding: little-endian height followed by the hash.
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(POSITION_LEN);
		out.extend_from_slice(&self.height.to_le_bytes());
		out.extend_from_slice(&self.hash.0);
		out
	}

	pub fn decode(bytes: &[u8]) -> Result<BlockPosition> {
		if bytes.len() != POSITION_LEN {
			return Err(ErrorKind::Serialization(format!(
				"invalid position length {}",
				bytes.len()
			))
			.into());
		}
		let mut height = [0u8; 8];
		height.copy_from_slice(&bytes[..8]);
		Ok(BlockPosition {
			height: i64::from_le_bytes(height),
			hash: BlockHash::from_slice(&bytes[8..])?,
		})
	}
}

impl Default for BlockPosition {
	fn default() -> BlockPosition {
		BlockPosition::unmined()
	}
}

impl fmt::Display for BlockPosition {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}@{}", self.height, self.hash)
	}
}

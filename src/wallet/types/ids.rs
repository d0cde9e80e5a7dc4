use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{to_hex, ErrorKind, Result};

pub const ID_LEN: usize = 32;

macro_rules! opaque_id {
	($doc:expr, $name:ident) => {
		#[doc = $doc]
		#[derive(
			Serialize,
			Deserialize,
			Debug,
			Clone,
			Copy,
			PartialEq,
			Eq,
			PartialOrd,
			Ord,
			Hash,
			Default,
		)]
		pub struct $name(pub [u8; ID_LEN]);

		impl $name {
			pub fn from_slice(bytes: &[u8]) -> Result<$name> {
				if bytes.len() != ID_LEN {
					return Err(ErrorKind::Serialization(format!(
						"invalid identifier length {}",
						bytes.len()
					))
					.into());
				}
				let mut out = [0u8; ID_LEN];
				out.copy_from_slice(bytes);
				Ok($name(out))
			}

			pub fn as_bytes(&self) -> &[u8] {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
				write!(f, "{}", to_hex(&self.0))
			}
		}
	};
}

opaque_id!(
	"Derivation root of a group of keys (BIP-44 account, payment-code subaccount).",
	AccountId
);
opaque_id!("Owner identity attached to keys by the key registry.", NymId);
opaque_id!("Contact book entry referenced by payer/payee provenance.", ContactId);

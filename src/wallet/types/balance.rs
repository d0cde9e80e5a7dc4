use serde::{Deserialize, Serialize};

/// Monetary value. Signed and arbitrary precision so a single type covers
/// every supported chain's supply and intermediate sums.
pub type Amount = num_bigint::BigInt;

/// Aggregate value of a group of outputs. `confirmed` counts spendable
/// confirmed value (including value reserved by in-flight authored spends);
/// `unconfirmed` is the projected balance once the mempool settles.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Balance {
	pub confirmed: Amount,
	pub unconfirmed: Amount,
}

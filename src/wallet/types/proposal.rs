use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an authored-but-not-broadcast spend that has reserved
/// outputs. The proposal itself is persisted by the proposal engine; the
/// database only tracks the reservation indices.
pub type ProposalId = Uuid;

/// What a proposal is allowed to reserve beyond confirmed outputs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpendPolicy {
	/// May reserve unconfirmed incoming outputs
	pub unconfirmed_incoming: bool,
	/// May reserve unconfirmed change outputs
	pub unconfirmed_change: bool,
}

use crate::common::{ChainTypes, Result};
use crate::wallet::types::{ContactId, KeyRef, NymId, ProposalId, Transaction, Txid};

/// The external blockchain key registry: the component that derived the
/// wallet's keys and knows who owns each of them. Invoked only from
/// mutators, under the exclusive lock.
pub trait KeyRegistry: Send + Sync {
	/// The nym that controls the given key, if any. Keys on the outgoing
	/// subchain have no owner here; the recipient controls them.
	fn owner(&self, key: &KeyRef) -> Option<NymId>;

	/// Payer and payee contacts for an outgoing-subchain key, when the
	/// registry can attribute the counterparty.
	fn outgoing_contacts(&self, key: &KeyRef) -> (Option<ContactId>, Option<ContactId>);

	/// Roll back the last-use record of a key whose confirming block was
	/// reorged out.
	fn unconfirm(&self, key: &KeyRef, txid: &Txid) -> Result<()>;

	/// Let the registry learn about newly used keys in an ingested
	/// transaction. Called once per ingest, before commit.
	fn process_transaction(&self, chain: ChainTypes, tx: &Transaction) -> Result<()>;
}

/// The external spend-proposal store. The database owns the reservation
/// indices; the proposal engine owns the proposals themselves.
pub trait ProposalRegistry: Send + Sync {
	/// Mark a proposal finished because a confirmed transaction superseded
	/// or fulfilled it.
	fn finish_proposal(&self, proposal: &ProposalId) -> Result<()>;

	/// Mark a proposal cancelled.
	fn cancel_proposal(&self, proposal: &ProposalId) -> Result<()>;
}

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::common::{ChainTypes, DbConfig, ErrorKind, Result, RwLock, RwLockReadGuard, RwLockWriteGuard};
use crate::storage::{Batch, Store};
use crate::wallet::cache::OutputCache;
use crate::wallet::events::{EventPublisher, WalletEvent};
use crate::wallet::registry::{KeyRegistry, ProposalRegistry};
use crate::wallet::types::{
	AccountId, Amount, Balance, BlockPosition, KeyRef, NymId, OutputRecord, Outpoint, ProposalId,
	SpendPolicy, Subchain, SubchainId, Transaction, TxOut, TxoState, TxoTag, Txid,
};

pub const DB_DIR: &str = "db";

type StateChanges = Vec<(Outpoint, TxoState)>;

fn effective_position(
	state: TxoState,
	old_position: BlockPosition,
	new_position: BlockPosition,
) -> BlockPosition {
	// unconfirmed edits never advance the mined position
	match state {
		TxoState::UnconfirmedNew | TxoState::UnconfirmedSpend => old_position,
		_ => new_position,
	}
}

/// The transactional UTXO database: single source of truth for every
/// output the wallet owns, reconciling confirmed chain state, mempool
/// state and authored spend proposals under one readers-writer lock.
///
/// All mutators stage their edits into one atomic KV batch; any failure
/// aborts the batch, drops the in-memory indices (they repopulate lazily
/// from LMDB) and surfaces the error.
pub struct OutputDatabase<R, P>
where
	R: KeyRegistry,
	P: ProposalRegistry,
{
	store: Store,
	chain: ChainTypes,
	registry: R,
	proposals: P,
	events: EventPublisher,
	blank: BlockPosition,
	maturation_target: i64,
	cache: RwLock<OutputCache>,
}

impl<R, P> OutputDatabase<R, P>
where
	R: KeyRegistry,
	P: ProposalRegistry,
{
	/// Open (creating if necessary) the database under the configured data
	/// directory and populate the in-memory indices.
	pub fn open(config: &DbConfig, registry: R, proposals: P) -> Result<OutputDatabase<R, P>> {
		let store = Store::new(&format!("{}/{}", config.data_dir, DB_DIR), DB_DIR)?;
		let blank = BlockPosition::unmined();
		let db = OutputDatabase {
			store,
			chain: config.chain_type,
			registry,
			proposals,
			events: EventPublisher::new(),
			blank,
			maturation_target: config.chain_type.maturation_interval(),
			cache: RwLock::new(OutputCache::new(blank)),
		};
		db.cache_write()?;
		Ok(db)
	}

	/// Subscribe to balance and state-change events.
	pub fn subscribe(&self) -> broadcast::Receiver<Arc<WalletEvent>> {
		self.events.subscribe()
	}

	/// Open a write batch on the backing store, for callers coordinating a
	/// reorg across several databases.
	pub fn batch(&self) -> Result<Batch> {
		self.store.batch()
	}

	// ---- queries ---------------------------------------------------------

	/// Wallet-level balance for the chain.
	pub fn get_balance(&self) -> Result<Balance> {
		let cache = self.cache_read()?;
		Ok(self.balance_filtered(&cache, None, None, None))
	}

	/// Balance of one nym.
	pub fn get_balance_for_nym(&self, owner: &NymId) -> Result<Balance> {
		let cache = self.cache_read()?;
		Ok(self.balance_filtered(&cache, Some(owner), None, None))
	}

	/// Balance of one subaccount of a nym.
	pub fn get_balance_for_account(&self, owner: &NymId, account: &AccountId) -> Result<Balance> {
		let cache = self.cache_read()?;
		Ok(self.balance_filtered(&cache, Some(owner), Some(account), None))
	}

	/// Balance attributable to a single key.
	pub fn get_balance_for_key(&self, key: &KeyRef) -> Result<Balance> {
		let cache = self.cache_read()?;
		Ok(self.balance_filtered(&cache, None, None, Some(key)))
	}

	/// Snapshot of one output record.
	pub fn get_output(&self, outpoint: &Outpoint) -> Result<Option<OutputRecord>> {
		let cache = self.cache_read()?;
		Ok(cache.get(outpoint).ok().cloned())
	}

	/// Outputs in any of the given states.
	pub fn get_outputs(&self, states: &[TxoState]) -> Result<Vec<(Outpoint, OutputRecord)>> {
		let cache = self.cache_read()?;
		Ok(self.collect_outputs(&cache, states, None, None, None, None))
	}

	/// Outputs of one nym in any of the given states.
	pub fn get_outputs_for_nym(
		&self,
		owner: &NymId,
		states: &[TxoState],
	) -> Result<Vec<(Outpoint, OutputRecord)>> {
		let cache = self.cache_read()?;
		Ok(self.collect_outputs(&cache, states, Some(owner), None, None, None))
	}

	/// Outputs of one subaccount of a nym in any of the given states.
	pub fn get_outputs_for_account(
		&self,
		owner: &NymId,
		account: &AccountId,
		states: &[TxoState],
	) -> Result<Vec<(Outpoint, OutputRecord)>> {
		let cache = self.cache_read()?;
		Ok(self.collect_outputs(&cache, states, Some(owner), Some(account), None, None))
	}

	/// Outputs locked to one key in any of the given states.
	pub fn get_outputs_for_key(
		&self,
		key: &KeyRef,
		states: &[TxoState],
	) -> Result<Vec<(Outpoint, OutputRecord)>> {
		let cache = self.cache_read()?;
		Ok(self.collect_outputs(&cache, states, None, None, None, Some(key)))
	}

	/// Outputs that are spendable or on their way to being spendable,
	/// optionally restricted to one subchain.
	pub fn get_unspent_outputs(
		&self,
		subchain: Option<&SubchainId>,
	) -> Result<Vec<(Outpoint, OutputRecord)>> {
		let cache = self.cache_read()?;
		Ok(self.collect_outputs(
			&cache,
			&[
				TxoState::UnconfirmedNew,
				TxoState::ConfirmedNew,
				TxoState::UnconfirmedSpend,
			],
			None,
			None,
			subchain,
			None,
		))
	}

	/// The proposal currently claiming an output, if any.
	pub fn get_output_proposal(&self, outpoint: &Outpoint) -> Result<Option<ProposalId>> {
		let cache = self.cache_read()?;
		Ok(cache.output_proposal(outpoint).cloned())
	}

	/// Outpoints a proposal has reserved and created: (spent, created).
	pub fn get_proposal_reservations(
		&self,
		proposal: &ProposalId,
	) -> Result<(Vec<Outpoint>, Vec<Outpoint>)> {
		let cache = self.cache_read()?;
		let mut spent: Vec<Outpoint> = cache.proposal_spent(proposal).iter().cloned().collect();
		let mut created: Vec<Outpoint> =
			cache.proposal_created(proposal).iter().cloned().collect();
		spent.sort();
		created.sort();
		Ok((spent, created))
	}

	/// Tags of one output; empty when the output is unknown.
	pub fn get_output_tags(&self, outpoint: &Outpoint) -> Result<BTreeSet<TxoTag>> {
		let cache = self.cache_read()?;
		Ok(cache
			.get(outpoint)
			.map(|record| record.tags.clone())
			.unwrap_or_default())
	}

	/// Every transaction the database has outputs for.
	pub fn get_transactions(&self) -> Result<Vec<Txid>> {
		let cache = self.cache_read()?;
		let mut txids = BTreeSet::new();
		for (outpoint, _) in cache.outputs() {
			txids.insert(outpoint.txid);
		}
		Ok(txids.into_iter().collect())
	}

	/// Every transaction with outputs owned by the given nym.
	pub fn get_transactions_for_nym(&self, owner: &NymId) -> Result<Vec<Txid>> {
		let cache = self.cache_read()?;
		let mut txids = BTreeSet::new();
		for outpoint in cache.get_nym(owner) {
			txids.insert(outpoint.txid);
		}
		Ok(txids.into_iter().collect())
	}

	/// Transactions with outputs still waiting for a block.
	pub fn get_unconfirmed_transactions(&self) -> Result<BTreeSet<Txid>> {
		let cache = self.cache_read()?;
		let mut txids = BTreeSet::new();
		for outpoint in cache.get_state(TxoState::UnconfirmedNew) {
			txids.insert(outpoint.txid);
		}
		Ok(txids)
	}

	/// Height of the wallet tip; -1 before the first advance.
	pub fn get_wallet_height(&self) -> Result<i64> {
		let cache = self.cache_read()?;
		Ok(cache.height())
	}

	/// Wallet tip position.
	pub fn get_wallet_position(&self) -> Result<BlockPosition> {
		let cache = self.cache_read()?;
		Ok(cache.position())
	}

	/// Log a summary of the database contents. Observability only; the
	/// format is not stable.
	pub fn log_contents(&self) -> Result<()> {
		let cache = self.cache_read()?;
		let mut by_state: BTreeMap<u32, (usize, Amount)> = BTreeMap::new();
		for (_, record) in cache.outputs() {
			let entry = by_state
				.entry(record.state.to_u32())
				.or_insert((0, Amount::default()));
			entry.0 += 1;
			entry.1 += record.value.clone();
		}
		debug!("txo database contents at tip {}:", cache.position());
		for (state, (count, total)) in by_state {
			debug!(
				"  {}: {} outputs, total value {}",
				TxoState::from_u32(state)?,
				count,
				total
			);
		}
		Ok(())
	}

	// ---- mutators --------------------------------------------------------

	/// Ingest a transaction mined at `block`. Consumed inputs become
	/// ConfirmedSpend, owned outputs ConfirmedNew (or Immature for not yet
	/// matured generation outputs).
	pub fn add_confirmed_transaction(
		&self,
		account: &AccountId,
		subchain: Subchain,
		block: &BlockPosition,
		output_indices: &[u32],
		tx: &Transaction,
	) -> Result<()> {
		self.add_transaction(
			account,
			subchain,
			block,
			output_indices,
			tx,
			TxoState::ConfirmedSpend,
			TxoState::ConfirmedNew,
		)
	}

	/// Ingest a transaction observed in the mempool. Consumed inputs become
	/// UnconfirmedSpend, owned outputs UnconfirmedNew.
	pub fn add_mempool_transaction(
		&self,
		account: &AccountId,
		subchain: Subchain,
		output_indices: &[u32],
		tx: &Transaction,
	) -> Result<()> {
		let block = self.blank;
		self.add_transaction(
			account,
			subchain,
			&block,
			output_indices,
			tx,
			TxoState::UnconfirmedSpend,
			TxoState::UnconfirmedNew,
		)
	}

	/// Record a transaction authored under a spend proposal. Its inputs
	/// must already be reserved by that proposal; its owned outputs are
	/// created UnconfirmedNew at the unmined position and indexed as
	/// proposal-created.
	pub fn add_outgoing_transaction(&self, proposal: &ProposalId, tx: &Transaction) -> Result<()> {
		let mut cache = self.cache_write()?;
		match self.add_outgoing_inner(&mut cache, proposal, tx) {
			Ok(changes) => {
				self.publish_balance(&cache);
				self.publish_changes(changes);
				Ok(())
			}
			Err(e) => {
				error!("failed to add outgoing transaction {}: {}", tx.txid, e);
				cache.clear();
				Err(e)
			}
		}
	}

	/// Reserve one spendable output for a proposal. Deterministic given the
	/// database state: confirmed outputs first, oldest position first, then
	/// unconfirmed outputs as far as the policy allows. Returns the
	/// post-reservation snapshot, or None when nothing is spendable.
	pub fn reserve_utxo(
		&self,
		spender: &NymId,
		proposal: &ProposalId,
		policy: &SpendPolicy,
	) -> Option<(Outpoint, OutputRecord)> {
		let mut cache = match self.cache_write() {
			Ok(cache) => cache,
			Err(e) => {
				error!("failed to load output cache: {}", e);
				return None;
			}
		};
		match self.reserve_utxo_inner(&mut cache, spender, proposal, policy) {
			Ok(Some((outpoint, record, changes))) => {
				self.publish_changes(changes);
				Some((outpoint, record))
			}
			Ok(None) => {
				debug!("no spendable outputs for nym {}", spender);
				None
			}
			Err(e) => {
				error!("failed to reserve output: {}", e);
				cache.clear();
				None
			}
		}
	}

	/// Release a proposal's reservations: consumed outputs return to
	/// ConfirmedNew with unchanged position, created outputs are orphaned,
	/// both proposal indices are dropped and the proposal store is told.
	pub fn cancel_proposal(&self, proposal: &ProposalId) -> Result<()> {
		let mut cache = self.cache_write()?;
		match self.cancel_proposal_inner(&mut cache, proposal) {
			Ok(changes) => {
				self.publish_balance(&cache);
				self.publish_changes(changes);
				Ok(())
			}
			Err(e) => {
				error!("failed to cancel proposal {}: {}", proposal, e);
				cache.clear();
				Err(e)
			}
		}
	}

	/// Roll back every output of `subchain` mined at `position`: received
	/// outputs return to UnconfirmedNew, spends to UnconfirmedSpend, and
	/// the key registry unconfirms their keys. Stages into the caller's
	/// batch; the caller commits.
	pub fn start_reorg(
		&self,
		batch: &Batch,
		subchain: &SubchainId,
		position: &BlockPosition,
	) -> Result<()> {
		trace!("rolling back block {}", position);
		let mut cache = self.cache_write()?;
		match self.start_reorg_inner(&mut cache, batch, subchain, position) {
			Ok(changes) => {
				self.publish_changes(changes);
				Ok(())
			}
			Err(e) => {
				error!("failed to start reorg at {}: {}", position, e);
				cache.clear();
				Err(e)
			}
		}
	}

	/// Orphan generation outputs above the new tip and persist it. Stages
	/// into the caller's batch; the in-memory cache is dropped either way
	/// and repopulates after the caller commits.
	pub fn finalize_reorg(&self, batch: &Batch, position: &BlockPosition) -> Result<()> {
		let mut cache = self.cache_write()?;
		let res = self.finalize_reorg_inner(&mut cache, batch, position);
		if let Err(e) = &res {
			error!("failed to finalize reorg at {}: {}", position, e);
		}
		cache.clear();
		res
	}

	/// Move the wallet tip forward without a reorg, maturing generation
	/// outputs that now have enough confirmations.
	pub fn advance_to(&self, position: &BlockPosition) -> Result<()> {
		let mut cache = self.cache_write()?;
		match self.advance_to_inner(&mut cache, position) {
			Ok(changes) => {
				if !changes.is_empty() {
					self.publish_balance(&cache);
				}
				self.publish_changes(changes);
				Ok(())
			}
			Err(e) => {
				error!("failed to advance to {}: {}", position, e);
				cache.clear();
				Err(e)
			}
		}
	}

	// ---- shared pipeline -------------------------------------------------

	fn add_transaction(
		&self,
		account: &AccountId,
		subchain: Subchain,
		block: &BlockPosition,
		output_indices: &[u32],
		tx: &Transaction,
		consumed: TxoState,
		created: TxoState,
	) -> Result<()> {
		let subchain_id = SubchainId::new(*account, subchain);
		let mut cache = self.cache_write()?;
		match self.add_transaction_inner(
			&mut cache,
			account,
			&subchain_id,
			block,
			output_indices,
			tx,
			consumed,
			created,
		) {
			Ok(changes) => {
				self.publish_balance(&cache);
				self.publish_changes(changes);
				Ok(())
			}
			Err(e) => {
				error!("failed to add transaction {}: {}", tx.txid, e);
				cache.clear();
				Err(e)
			}
		}
	}

	fn add_transaction_inner(
		&self,
		cache: &mut OutputCache,
		account: &AccountId,
		subchain_id: &SubchainId,
		block: &BlockPosition,
		output_indices: &[u32],
		tx: &Transaction,
		consumed: TxoState,
		created: TxoState,
	) -> Result<StateChanges> {
		let is_generation = tx.is_generation();
		let mut copy = tx.clone();
		let mut changes = Vec::new();
		let mut finished = HashSet::new();
		let batch = self.store.batch()?;

		// inputs before outputs, so chained self-spends in one call see the
		// prior state
		for input in copy.inputs.iter_mut() {
			let outpoint = input.previous_output;
			if outpoint.is_null() {
				continue;
			}
			self.check_proposals(cache, &batch, &outpoint, block, &tx.txid, &mut finished, &mut changes)?;
			if cache.exists_in_subchain(subchain_id, &outpoint) {
				input.spends = Some(Box::new(cache.get(&outpoint)?.clone()));
				self.change_state(cache, &batch, &outpoint, consumed, block, &mut changes)?;
				trace!("output {} marked as {}", outpoint, consumed);
			} else {
				// a parallel scanner for another subchain may pick this
				// input up later
				debug!("outpoint {} does not belong to this subchain", outpoint);
			}
		}

		for index in output_indices {
			let outpoint = Outpoint::new(tx.txid, *index);
			let output = copy
				.outputs
				.get(*index as usize)
				.ok_or_else(|| {
					ErrorKind::Transaction(format!(
						"transaction {} has no output at index {}",
						tx.txid, index
					))
				})?
				.clone();
			if output.keys.is_empty() {
				return Err(ErrorKind::Transaction(format!(
					"owned output {} carries no keys",
					outpoint
				))
				.into());
			}
			if cache.exists(&outpoint) {
				self.change_state(cache, &batch, &outpoint, created, block, &mut changes)?;
			} else {
				self.create_state(
					cache,
					&batch,
					is_generation,
					&outpoint,
					created,
					block,
					&output,
					&mut changes,
				)?;
			}
			self.associate(cache, &batch, &outpoint, account, subchain_id)?;
			self.associate_keys(cache, &batch, &outpoint, &output.keys)?;
		}

		self.registry.process_transaction(self.chain, &copy)?;
		batch.commit()?;
		Ok(changes)
	}

	fn add_outgoing_inner(
		&self,
		cache: &mut OutputCache,
		proposal: &ProposalId,
		tx: &Transaction,
	) -> Result<StateChanges> {
		if tx.is_generation() {
			return Err(ErrorKind::Transaction(
				"generation transactions cannot be outgoing".to_owned(),
			)
			.into());
		}

		// the consumed outputs changed state when they were reserved; here
		// we only verify the reservations belong to this proposal
		for input in &tx.inputs {
			let outpoint = &input.previous_output;
			match cache.output_proposal(outpoint) {
				Some(registered) if registered == proposal => {}
				Some(registered) => {
					return Err(ErrorKind::Proposal(format!(
						"input spending {} is registered with proposal {}",
						outpoint, registered
					))
					.into());
				}
				None => {
					return Err(ErrorKind::Proposal(format!(
						"input spending {} is not registered with a proposal",
						outpoint
					))
					.into());
				}
			}
		}

		let mut changes = Vec::new();
		let mut pending = Vec::new();
		let batch = self.store.batch()?;

		for (index, output) in tx.outputs.iter().enumerate() {
			if output.keys.is_empty() {
				trace!("output {} belongs to someone else", index);
				continue;
			}
			trace!("output {} belongs to me", index);
			let outpoint = Outpoint::new(tx.txid, index as u32);
			if cache.exists(&outpoint) {
				self.change_state(
					cache,
					&batch,
					&outpoint,
					TxoState::UnconfirmedNew,
					&self.blank,
					&mut changes,
				)?;
			} else {
				self.create_state(
					cache,
					&batch,
					false,
					&outpoint,
					TxoState::UnconfirmedNew,
					&self.blank,
					output,
					&mut changes,
				)?;
			}
			for key in &output.keys {
				self.associate(cache, &batch, &outpoint, &key.subaccount, &key.subchain_id())?;
			}
			self.associate_keys(cache, &batch, &outpoint, &output.keys)?;
			pending.push(outpoint);
		}

		for outpoint in &pending {
			debug!("proposal {} created outpoint {}", proposal, outpoint);
			cache.add_proposal_created(proposal, outpoint, &batch)?;
			cache.set_output_proposal(outpoint, proposal, &batch)?;
		}

		self.registry.process_transaction(self.chain, tx)?;
		batch.commit()?;
		Ok(changes)
	}

	fn reserve_utxo_inner(
		&self,
		cache: &mut OutputCache,
		spender: &NymId,
		proposal: &ProposalId,
		policy: &SpendPolicy,
	) -> Result<Option<(Outpoint, OutputRecord, StateChanges)>> {
		let batch = self.store.batch()?;
		let mut changes = Vec::new();
		let mut utxo = self.reserve_from_group(
			cache,
			&batch,
			spender,
			proposal,
			TxoState::ConfirmedNew,
			false,
			&mut changes,
		)?;
		if utxo.is_none() && (policy.unconfirmed_incoming || policy.unconfirmed_change) {
			let change_only = !policy.unconfirmed_incoming;
			utxo = self.reserve_from_group(
				cache,
				&batch,
				spender,
				proposal,
				TxoState::UnconfirmedNew,
				change_only,
				&mut changes,
			)?;
		}
		match utxo {
			Some((outpoint, record)) => {
				batch.commit()?;
				Ok(Some((outpoint, record, changes)))
			}
			None => Ok(None),
		}
	}

	fn reserve_from_group(
		&self,
		cache: &mut OutputCache,
		batch: &Batch,
		spender: &NymId,
		proposal: &ProposalId,
		state: TxoState,
		change_only: bool,
		changes: &mut StateChanges,
	) -> Result<Option<(Outpoint, OutputRecord)>> {
		let group = cache.get_state(state).clone();
		for outpoint in fifo(cache, &group) {
			if change_only && !cache.get(&outpoint)?.tags.contains(&TxoTag::Change) {
				continue;
			}
			if !cache.get_nym(spender).contains(&outpoint) {
				continue;
			}
			if let Some(claimed) = cache.output_proposal(&outpoint) {
				debug!("output {} already reserved by proposal {}", outpoint, claimed);
				continue;
			}
			self.change_state(
				cache,
				batch,
				&outpoint,
				TxoState::UnconfirmedSpend,
				&self.blank,
				changes,
			)?;
			cache.add_proposal_spent(proposal, &outpoint, batch)?;
			cache.set_output_proposal(&outpoint, proposal, batch)?;
			debug!("proposal {} consumed outpoint {}", proposal, outpoint);
			let record = cache.get(&outpoint)?.clone();
			return Ok(Some((outpoint, record)));
		}
		trace!("no spendable outputs in state {}", state);
		Ok(None)
	}

	fn cancel_proposal_inner(
		&self,
		cache: &mut OutputCache,
		proposal: &ProposalId,
	) -> Result<StateChanges> {
		let reserved: Vec<Outpoint> = cache.proposal_spent(proposal).iter().cloned().collect();
		let created: Vec<Outpoint> = cache.proposal_created(proposal).iter().cloned().collect();
		let batch = self.store.batch()?;
		let mut changes = Vec::new();

		for outpoint in &reserved {
			self.change_state_expected(
				cache,
				&batch,
				outpoint,
				TxoState::UnconfirmedSpend,
				TxoState::ConfirmedNew,
				&mut changes,
			)?;
			cache.delete_output_proposal(outpoint, &batch)?;
		}
		for outpoint in &created {
			// the output record survives, orphaned, so history is kept
			self.change_state_expected(
				cache,
				&batch,
				outpoint,
				TxoState::UnconfirmedNew,
				TxoState::OrphanedNew,
				&mut changes,
			)?;
			cache.delete_output_proposal(outpoint, &batch)?;
		}

		if !cache.delete_proposal_spent_all(proposal, &batch)? {
			warn!("spent index for {} already removed", proposal);
		}
		if !cache.delete_proposal_created_all(proposal, &batch)? {
			warn!("created index for {} already removed", proposal);
		}
		self.proposals.cancel_proposal(proposal)?;
		batch.commit()?;
		Ok(changes)
	}

	fn start_reorg_inner(
		&self,
		cache: &mut OutputCache,
		batch: &Batch,
		subchain: &SubchainId,
		position: &BlockPosition,
	) -> Result<StateChanges> {
		let outpoints: Vec<Outpoint> = cache
			.get_position_set(position)
			.iter()
			.filter(|outpoint| cache.exists_in_subchain(subchain, outpoint))
			.cloned()
			.collect();
		trace!("{} affected outpoints", outpoints.len());
		let mut changes = Vec::new();

		for outpoint in outpoints {
			let (state, keys) = {
				let record = cache.get(&outpoint)?;
				(record.state, record.keys.clone())
			};
			// confirmed outputs pass through their orphaned counterpart on
			// the way back to unconfirmed
			match state {
				TxoState::ConfirmedNew => {
					self.change_state(cache, batch, &outpoint, TxoState::OrphanedNew, position, &mut changes)?;
					self.change_state(cache, batch, &outpoint, TxoState::UnconfirmedNew, position, &mut changes)?;
				}
				TxoState::OrphanedNew => {
					self.change_state(cache, batch, &outpoint, TxoState::UnconfirmedNew, position, &mut changes)?;
				}
				TxoState::ConfirmedSpend => {
					self.change_state(cache, batch, &outpoint, TxoState::OrphanedSpend, position, &mut changes)?;
					self.change_state(cache, batch, &outpoint, TxoState::UnconfirmedSpend, position, &mut changes)?;
				}
				TxoState::OrphanedSpend => {
					self.change_state(cache, batch, &outpoint, TxoState::UnconfirmedSpend, position, &mut changes)?;
				}
				_ => continue,
			}
			for key in &keys {
				self.registry.unconfirm(key, &outpoint.txid)?;
			}
		}
		Ok(changes)
	}

	fn finalize_reorg_inner(
		&self,
		cache: &mut OutputCache,
		batch: &Batch,
		position: &BlockPosition,
	) -> Result<()> {
		if cache.position() == *position {
			return Ok(());
		}
		let heights: Vec<i64> = cache
			.generation()
			.range(position.height..)
			.map(|(height, _)| *height)
			.collect();
		let mut changes = Vec::new();

		for height in heights {
			let outpoints: Vec<Outpoint> = cache
				.generation()
				.get(&height)
				.map(|set| set.iter().cloned().collect())
				.unwrap_or_default();
			for outpoint in outpoints {
				let state = cache.get(&outpoint)?.state;
				match state {
					TxoState::Immature | TxoState::ConfirmedNew | TxoState::UnconfirmedNew => {
						self.change_state(
							cache,
							batch,
							&outpoint,
							TxoState::OrphanedNew,
							position,
							&mut changes,
						)?;
					}
					other => {
						debug!(
							"generation output {} in state {} has no orphan path",
							outpoint, other
						);
					}
				}
			}
			cache.remove_generation_height(height, batch)?;
		}

		cache.update_position(position, batch)?;
		self.publish_changes(changes);
		Ok(())
	}

	fn advance_to_inner(
		&self,
		cache: &mut OutputCache,
		position: &BlockPosition,
	) -> Result<StateChanges> {
		let current = cache.position();
		if *position == current || position.height < current.height {
			return Ok(Vec::new());
		}

		let stop = std::cmp::max(0, current.height - self.maturation_target - 1);
		let mut matured = Vec::new();
		for (height, outpoints) in cache.generation().range(stop..) {
			if position.height - height >= self.maturation_target {
				matured.extend(outpoints.iter().cloned());
			}
		}

		let batch = self.store.batch()?;
		let mut changes = Vec::new();
		for outpoint in matured {
			let (state, mined) = {
				let record = cache.get(&outpoint)?;
				(record.state, record.position)
			};
			if state != TxoState::Immature {
				continue;
			}
			// maturation is a state change only; the mined position stays
			self.change_state(cache, &batch, &outpoint, TxoState::ConfirmedNew, &mined, &mut changes)?;
		}
		cache.update_position(position, &batch)?;
		batch.commit()?;
		Ok(changes)
	}

	// ---- helpers ---------------------------------------------------------

	fn cache_read(&self) -> Result<RwLockReadGuard<OutputCache>> {
		{
			let cache = self.cache.read();
			if cache.populated() {
				return Ok(cache);
			}
		}
		{
			let mut cache = self.cache.write();
			if !cache.populated() {
				cache.populate(&self.store)?;
			}
		}
		Ok(self.cache.read())
	}

	fn cache_write(&self) -> Result<RwLockWriteGuard<OutputCache>> {
		let mut cache = self.cache.write();
		if !cache.populated() {
			cache.populate(&self.store)?;
		}
		Ok(cache)
	}

	fn is_mature(&self, height: i64, at: &BlockPosition) -> bool {
		at.height - height >= self.maturation_target
	}

	fn change_state(
		&self,
		cache: &mut OutputCache,
		batch: &Batch,
		outpoint: &Outpoint,
		new_state: TxoState,
		new_position: &BlockPosition,
		changes: &mut StateChanges,
	) -> Result<()> {
		let (old_state, old_position) = {
			let record = cache.get(outpoint)?;
			(record.state, record.position)
		};
		let effective = effective_position(new_state, old_position, *new_position);

		if new_state != old_state {
			if !old_state.can_transition_to(new_state) {
				error!(
					"illegal transition for output {}: {} -> {}",
					outpoint, old_state, new_state
				);
				return Err(ErrorKind::IllegalTransition(
					format!("{}", outpoint),
					format!("{}", old_state),
					format!("{}", new_state),
				)
				.into());
			}
			cache.change_state(old_state, new_state, outpoint, batch)?;
		}
		if effective != old_position {
			cache.change_position(&old_position, &effective, outpoint, batch)?;
		}
		{
			let record = cache.get_mut(outpoint)?;
			record.state = new_state;
			record.position = effective;
		}
		cache.write_output(outpoint, batch)?;
		if new_state != old_state {
			changes.push((*outpoint, new_state));
		}
		Ok(())
	}

	/// Transition expecting a known prior state; already being in the
	/// target state is a no-op. The stored position is retained.
	fn change_state_expected(
		&self,
		cache: &mut OutputCache,
		batch: &Batch,
		outpoint: &Outpoint,
		old_state: TxoState,
		new_state: TxoState,
		changes: &mut StateChanges,
	) -> Result<()> {
		let (current, position) = {
			let record = cache.get(outpoint)?;
			(record.state, record.position)
		};
		if current == old_state {
			self.change_state(cache, batch, outpoint, new_state, &position, changes)
		} else if current == new_state {
			debug!("outpoint {} already in desired state: {}", outpoint, new_state);
			Ok(())
		} else {
			error!(
				"incorrect state for outpoint {}. Expected: {}, actual: {}",
				outpoint, old_state, current
			);
			Err(ErrorKind::IllegalTransition(
				format!("{}", outpoint),
				format!("{}", old_state),
				format!("{}", current),
			)
			.into())
		}
	}

	fn create_state(
		&self,
		cache: &mut OutputCache,
		batch: &Batch,
		is_generation: bool,
		outpoint: &Outpoint,
		state: TxoState,
		position: &BlockPosition,
		output: &TxOut,
		changes: &mut StateChanges,
	) -> Result<()> {
		if cache.exists(outpoint) {
			error!("outpoint {} already exists in db", outpoint);
			return Err(ErrorKind::DuplicateOutpoint(format!("{}", outpoint)).into());
		}
		if output.keys.is_empty() {
			return Err(ErrorKind::Transaction(format!(
				"output {} carries no keys",
				outpoint
			))
			.into());
		}

		let effective = effective_position(state, self.blank, *position);
		let effective_state = if is_generation {
			if state != TxoState::ConfirmedNew {
				error!("invalid state {} for generation transaction output", state);
				return Err(ErrorKind::Transaction(format!(
					"invalid state {} for generation output {}",
					state, outpoint
				))
				.into());
			}
			if self.is_mature(position.height, &cache.position()) {
				TxoState::ConfirmedNew
			} else {
				TxoState::Immature
			}
		} else {
			if !state.can_create() {
				return Err(ErrorKind::IllegalTransition(
					format!("{}", outpoint),
					"create".to_owned(),
					format!("{}", state),
				)
				.into());
			}
			state
		};

		let mut record = OutputRecord::new(
			outpoint.index,
			output.value.clone(),
			output.script.clone(),
			output.keys.clone(),
		);
		record.state = effective_state;
		record.position = effective;
		record.tags.insert(if is_generation {
			TxoTag::Generation
		} else {
			TxoTag::Normal
		});
		if output.keys.iter().any(|key| key.subchain == Subchain::Internal) {
			record.tags.insert(TxoTag::Change);
		}
		if output
			.keys
			.iter()
			.any(|key| key.subchain == Subchain::Notification)
		{
			record.tags.insert(TxoTag::Notification);
		}

		cache.add_output(outpoint, record, batch)?;
		cache.add_to_state(effective_state, outpoint, batch)?;
		cache.add_to_position(&effective, outpoint, batch)?;
		if is_generation {
			cache.add_to_generation(effective.height, outpoint, batch)?;
		}
		changes.push((*outpoint, effective_state));
		Ok(())
	}

	fn associate(
		&self,
		cache: &mut OutputCache,
		batch: &Batch,
		outpoint: &Outpoint,
		account: &AccountId,
		subchain_id: &SubchainId,
	) -> Result<()> {
		cache.add_to_account(account, outpoint, batch)?;
		cache.add_to_subchain(subchain_id, outpoint, batch)?;
		Ok(())
	}

	/// Attribute an output to the owners of its keys. Outgoing-subchain
	/// keys invert ownership: the output is the counterparty's, so it gets
	/// payer/payee provenance instead of nym and key index entries.
	fn associate_keys(
		&self,
		cache: &mut OutputCache,
		batch: &Batch,
		outpoint: &Outpoint,
		keys: &[KeyRef],
	) -> Result<()> {
		for key in keys {
			if key.subchain == Subchain::Outgoing {
				let (payer, payee) = self.registry.outgoing_contacts(key);
				{
					let record = cache.get_mut(outpoint)?;
					record.payer = payer;
					record.payee = payee;
				}
				cache.write_output(outpoint, batch)?;
				continue;
			}
			let owner = self
				.registry
				.owner(key)
				.ok_or_else(|| ErrorKind::NoKeyOwner(format!("{}", key)))?;
			cache.add_to_nym(&owner, outpoint, batch)?;
			let push_owner = {
				let record = cache.get_mut(outpoint)?;
				if record.owners.contains(&owner) {
					false
				} else {
					record.owners.push(owner);
					true
				}
			};
			if push_owner {
				cache.write_output(outpoint, batch)?;
			}
		}
		Ok(())
	}

	fn check_proposals(
		&self,
		cache: &mut OutputCache,
		batch: &Batch,
		outpoint: &Outpoint,
		block: &BlockPosition,
		txid: &Txid,
		finished: &mut HashSet<ProposalId>,
		changes: &mut StateChanges,
	) -> Result<()> {
		if block.is_unmined() {
			return Ok(());
		}
		let proposal = match cache.output_proposal(outpoint) {
			Some(proposal) => *proposal,
			None => return Ok(()),
		};
		if finished.contains(&proposal) {
			return Ok(());
		}

		// A block transaction replaced this proposal's pending spend. Any
		// output the proposal created under a different txid never made it
		// to the chain; orphan it and drop the reservation bookkeeping.
		let created: Vec<Outpoint> = cache.proposal_created(&proposal).iter().cloned().collect();
		let spent: Vec<Outpoint> = cache.proposal_spent(&proposal).iter().cloned().collect();

		for id in &created {
			if id.txid != *txid {
				self.change_state(cache, batch, id, TxoState::OrphanedNew, block, changes)?;
				trace!("updated {} to state {}", id, TxoState::OrphanedNew);
			}
			cache.delete_proposal_created_entry(&proposal, id, batch)?;
			cache.delete_output_proposal(id, batch)?;
		}
		for id in &spent {
			cache.delete_proposal_spent_entry(&proposal, id, batch)?;
			cache.delete_output_proposal(id, batch)?;
		}

		finished.insert(proposal);
		self.proposals.finish_proposal(&proposal)
	}

	fn balance_filtered(
		&self,
		cache: &OutputCache,
		owner: Option<&NymId>,
		account: Option<&AccountId>,
		key: Option<&KeyRef>,
	) -> Balance {
		let sum = |state: TxoState| -> Amount {
			self.matches(cache, &[state], owner, account, None, key)
				.iter()
				.map(|outpoint| {
					cache
						.get(outpoint)
						.map(|record| record.value.clone())
						.unwrap_or_default()
				})
				.sum()
		};

		// value reserved by in-flight authored spends stays confirmed until
		// the spend reaches a block
		let unconfirmed_spend = sum(TxoState::UnconfirmedSpend);
		let confirmed = sum(TxoState::ConfirmedNew) + unconfirmed_spend.clone();
		let unconfirmed = confirmed.clone() + sum(TxoState::UnconfirmedNew) - unconfirmed_spend;
		Balance {
			confirmed,
			unconfirmed,
		}
	}

	fn matches(
		&self,
		cache: &OutputCache,
		states: &[TxoState],
		owner: Option<&NymId>,
		account: Option<&AccountId>,
		subchain: Option<&SubchainId>,
		key: Option<&KeyRef>,
	) -> Vec<Outpoint> {
		let mut out = Vec::new();
		for state in states {
			for outpoint in cache.get_state(*state) {
				let good_nym = owner.map_or(true, |id| cache.get_nym(id).contains(outpoint));
				let good_account =
					account.map_or(true, |id| cache.get_account(id).contains(outpoint));
				let good_subchain =
					subchain.map_or(true, |id| cache.get_subchain(id).contains(outpoint));
				let good_key = key.map_or(true, |id| cache.get_key(id).contains(outpoint));
				if good_nym && good_account && good_subchain && good_key {
					out.push(*outpoint);
				}
			}
		}
		out
	}

	fn collect_outputs(
		&self,
		cache: &OutputCache,
		states: &[TxoState],
		owner: Option<&NymId>,
		account: Option<&AccountId>,
		subchain: Option<&SubchainId>,
		key: Option<&KeyRef>,
	) -> Vec<(Outpoint, OutputRecord)> {
		self.matches(cache, states, owner, account, subchain, key)
			.into_iter()
			.filter_map(|outpoint| {
				cache
					.get(&outpoint)
					.ok()
					.map(|record| (outpoint, record.clone()))
			})
			.collect()
	}

	fn publish_balance(&self, cache: &OutputCache) {
		self.events.publish(WalletEvent::BalanceUpdated {
			chain: self.chain,
			balance: self.balance_filtered(cache, None, None, None),
		});
		for nym in cache.nyms() {
			self.events.publish(WalletEvent::NymBalanceUpdated {
				chain: self.chain,
				nym: *nym,
				balance: self.balance_filtered(cache, Some(nym), None, None),
			});
		}
	}

	fn publish_changes(&self, changes: StateChanges) {
		for (outpoint, state) in changes {
			self.events.publish(WalletEvent::TxoStateChanged {
				chain: self.chain,
				outpoint,
				state,
			});
		}
	}
}

/// Order a candidate group oldest block first, deterministically within
/// each block.
fn fifo(cache: &OutputCache, group: &HashSet<Outpoint>) -> Vec<Outpoint> {
	let mut by_position: BTreeMap<BlockPosition, BTreeSet<Outpoint>> = BTreeMap::new();
	for outpoint in group {
		if let Ok(record) = cache.get(outpoint) {
			by_position
				.entry(record.position)
				.or_default()
				.insert(*outpoint);
		}
	}
	by_position
		.into_iter()
		.flat_map(|(_, outpoints)| outpoints.into_iter())
		.collect()
}

use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::common::{ErrorKind, Result};
use crate::storage::{to_key, Batch, Store};
use crate::wallet::types::{
	AccountId, BlockPosition, KeyRef, NymId, OutputRecord, Outpoint, ProposalId, Subchain,
	SubchainId, TxoState, ID_LEN, KEY_REF_LEN, OUTPOINT_LEN, POSITION_LEN, SUBCHAIN_ID_LEN,
};

// Table prefixes. All tables share one LMDB database; multi-value tables
// store one record per member: prefix || axis key || outpoint.
pub const OUTPUT_PREFIX: u8 = b'o';
pub const ACCOUNT_PREFIX: u8 = b'a';
pub const KEY_PREFIX: u8 = b'k';
pub const NYM_PREFIX: u8 = b'n';
pub const POSITION_PREFIX: u8 = b'p';
pub const STATE_PREFIX: u8 = b's';
pub const SUBCHAIN_PREFIX: u8 = b'c';
pub const PROPOSAL_CREATED_PREFIX: u8 = b'r';
pub const PROPOSAL_SPENT_PREFIX: u8 = b'x';
pub const OUTPUT_PROPOSAL_PREFIX: u8 = b'q';
pub const GENERATION_PREFIX: u8 = b'g';
pub const CONFIG_PREFIX: u8 = b'w';

const WALLET_POSITION_KEY: [u8; 1] = [0x01];
const PROPOSAL_ID_LEN: usize = 16;

fn output_key(id: &Outpoint) -> Vec<u8> {
	to_key(OUTPUT_PREFIX, &id.encode())
}

fn index_key(prefix: u8, axis: &[u8], id: &Outpoint) -> Vec<u8> {
	let mut key = Vec::with_capacity(1 + axis.len() + OUTPOINT_LEN);
	key.push(prefix);
	key.extend_from_slice(axis);
	key.extend_from_slice(&id.encode());
	key
}

fn state_axis(state: TxoState) -> [u8; 4] {
	state.to_u32().to_le_bytes()
}

fn height_axis(height: i64) -> [u8; 8] {
	height.to_le_bytes()
}

/// In-memory image of the output store and all derived indices, kept
/// strictly consistent with the KV tables. Every mutation stages its KV
/// edits on the caller's batch before touching memory, so a failed call
/// leaves LMDB untouched and the caller clears this cache.
pub struct OutputCache {
	blank: BlockPosition,
	position: Option<BlockPosition>,
	outputs: HashMap<Outpoint, OutputRecord>,
	accounts: HashMap<AccountId, HashSet<Outpoint>>,
	keys: HashMap<KeyRef, HashSet<Outpoint>>,
	nyms: HashMap<NymId, HashSet<Outpoint>>,
	nym_list: HashSet<NymId>,
	positions: HashMap<BlockPosition, HashSet<Outpoint>>,
	states: HashMap<TxoState, HashSet<Outpoint>>,
	subchains: HashMap<SubchainId, HashSet<Outpoint>>,
	generation: BTreeMap<i64, HashSet<Outpoint>>,
	proposal_created: HashMap<ProposalId, HashSet<Outpoint>>,
	proposal_spent: HashMap<ProposalId, HashSet<Outpoint>>,
	output_proposal: HashMap<Outpoint, ProposalId>,
	populated: bool,
	empty: HashSet<Outpoint>,
}

impl OutputCache {
	pub fn new(blank: BlockPosition) -> OutputCache {
		OutputCache {
			blank,
			position: None,
			outputs: HashMap::new(),
			accounts: HashMap::new(),
			keys: HashMap::new(),
			nyms: HashMap::new(),
			nym_list: HashSet::new(),
			positions: HashMap::new(),
			states: HashMap::new(),
			subchains: HashMap::new(),
			generation: BTreeMap::new(),
			proposal_created: HashMap::new(),
			proposal_spent: HashMap::new(),
			output_proposal: HashMap::new(),
			populated: false,
			empty: HashSet::new(),
		}
	}

	pub fn populated(&self) -> bool {
		self.populated
	}

	/// Drop all in-memory state. Idempotent; the next access repopulates
	/// from the KV store. Called whenever memory may have diverged.
	pub fn clear(&mut self) {
		self.position = None;
		self.outputs.clear();
		self.accounts.clear();
		self.keys.clear();
		self.nyms.clear();
		self.nym_list.clear();
		self.positions.clear();
		self.states.clear();
		self.subchains.clear();
		self.generation.clear();
		self.proposal_created.clear();
		self.proposal_spent.clear();
		self.output_proposal.clear();
		self.populated = false;
	}

	/// Rebuild every index by scanning the KV tables in forward order.
	pub fn populate(&mut self, store: &Store) -> Result<()> {
		if self.populated {
			return Ok(());
		}

		for (key, value) in store.iter(&[OUTPUT_PREFIX])? {
			let id = Outpoint::decode(&key)?;
			let record = OutputRecord::decode(&value)?;
			self.outputs.insert(id, record);
		}
		for (key, value) in store.iter(&[ACCOUNT_PREFIX])? {
			let account = AccountId::from_slice(&axis(&key, ID_LEN)?)?;
			let id = Outpoint::decode(&value)?;
			self.accounts.entry(account).or_default().insert(id);
		}
		for (key, value) in store.iter(&[KEY_PREFIX])? {
			let key_ref = KeyRef::decode(&axis(&key, KEY_REF_LEN)?)?;
			let id = Outpoint::decode(&value)?;
			self.keys.entry(key_ref).or_default().insert(id);
		}
		for (key, value) in store.iter(&[NYM_PREFIX])? {
			let nym = NymId::from_slice(&axis(&key, ID_LEN)?)?;
			let id = Outpoint::decode(&value)?;
			self.nym_list.insert(nym);
			self.nyms.entry(nym).or_default().insert(id);
		}
		for (key, value) in store.iter(&[POSITION_PREFIX])? {
			let position = BlockPosition::decode(&axis(&key, POSITION_LEN)?)?;
			let id = Outpoint::decode(&value)?;
			self.positions.entry(position).or_default().insert(id);
		}
		for (key, value) in store.iter(&[STATE_PREFIX])? {
			let state_bytes = axis(&key, 4)?;
			let mut raw = [0u8; 4];
			raw.copy_from_slice(&state_bytes);
			let state = TxoState::from_u32(u32::from_le_bytes(raw))?;
			let id = Outpoint::decode(&value)?;
			self.states.entry(state).or_default().insert(id);
		}
		for (key, value) in store.iter(&[SUBCHAIN_PREFIX])? {
			let subchain = SubchainId::decode(&axis(&key, SUBCHAIN_ID_LEN)?)?;
			let id = Outpoint::decode(&value)?;
			self.subchains.entry(subchain).or_default().insert(id);
		}
		for (key, value) in store.iter(&[GENERATION_PREFIX])? {
			let height_bytes = axis(&key, 8)?;
			let mut raw = [0u8; 8];
			raw.copy_from_slice(&height_bytes);
			let id = Outpoint::decode(&value)?;
			self.generation
				.entry(i64::from_le_bytes(raw))
				.or_default()
				.insert(id);
		}
		for (key, value) in store.iter(&[PROPOSAL_CREATED_PREFIX])? {
			let proposal = decode_proposal_id(&axis(&key, PROPOSAL_ID_LEN)?)?;
			let id = Outpoint::decode(&value)?;
			self.proposal_created.entry(proposal).or_default().insert(id);
		}
		for (key, value) in store.iter(&[PROPOSAL_SPENT_PREFIX])? {
			let proposal = decode_proposal_id(&axis(&key, PROPOSAL_ID_LEN)?)?;
			let id = Outpoint::decode(&value)?;
			self.proposal_spent.entry(proposal).or_default().insert(id);
		}
		for (key, value) in store.iter(&[OUTPUT_PROPOSAL_PREFIX])? {
			let id = Outpoint::decode(&key)?;
			let proposal = decode_proposal_id(&value)?;
			self.output_proposal.insert(id, proposal);
		}
		if let Some(bytes) = store.get(&to_key(CONFIG_PREFIX, &WALLET_POSITION_KEY))? {
			self.position = Some(BlockPosition::decode(&bytes)?);
		}

		self.populated = true;
		Ok(())
	}

	pub fn exists(&self, id: &Outpoint) -> bool {
		self.outputs.contains_key(id)
	}

	pub fn exists_in_subchain(&self, subchain: &SubchainId, id: &Outpoint) -> bool {
		self.subchains
			.get(subchain)
			.map(|set| set.contains(id))
			.unwrap_or(false)
	}

	pub fn get(&self, id: &Outpoint) -> Result<&OutputRecord> {
		self.outputs
			.get(id)
			.ok_or_else(|| ErrorKind::NotFound(format!("{}", id)).into())
	}

	pub fn get_mut(&mut self, id: &Outpoint) -> Result<&mut OutputRecord> {
		self.outputs
			.get_mut(id)
			.ok_or_else(|| ErrorKind::NotFound(format!("{}", id)).into())
	}

	pub fn outputs(&self) -> impl Iterator<Item = (&Outpoint, &OutputRecord)> {
		self.outputs.iter()
	}

	pub fn get_account(&self, id: &AccountId) -> &HashSet<Outpoint> {
		self.accounts.get(id).unwrap_or(&self.empty)
	}

	pub fn get_key(&self, id: &KeyRef) -> &HashSet<Outpoint> {
		self.keys.get(id).unwrap_or(&self.empty)
	}

	pub fn get_nym(&self, id: &NymId) -> &HashSet<Outpoint> {
		self.nyms.get(id).unwrap_or(&self.empty)
	}

	pub fn nyms(&self) -> &HashSet<NymId> {
		&self.nym_list
	}

	pub fn get_position_set(&self, id: &BlockPosition) -> &HashSet<Outpoint> {
		self.positions.get(id).unwrap_or(&self.empty)
	}

	pub fn get_state(&self, id: TxoState) -> &HashSet<Outpoint> {
		self.states.get(&id).unwrap_or(&self.empty)
	}

	pub fn get_subchain(&self, id: &SubchainId) -> &HashSet<Outpoint> {
		self.subchains.get(id).unwrap_or(&self.empty)
	}

	pub fn generation(&self) -> &BTreeMap<i64, HashSet<Outpoint>> {
		&self.generation
	}

	pub fn output_proposal(&self, id: &Outpoint) -> Option<&ProposalId> {
		self.output_proposal.get(id)
	}

	pub fn proposal_created(&self, id: &ProposalId) -> &HashSet<Outpoint> {
		self.proposal_created.get(id).unwrap_or(&self.empty)
	}

	pub fn proposal_spent(&self, id: &ProposalId) -> &HashSet<Outpoint> {
		self.proposal_spent.get(id).unwrap_or(&self.empty)
	}

	/// Wallet tip, or the blank position before the first advance.
	pub fn position(&self) -> BlockPosition {
		self.position.unwrap_or(self.blank)
	}

	pub fn height(&self) -> i64 {
		self.position().height
	}

	/// Insert a brand new record. Fails on duplicate outpoints; state
	/// transitions are the path for everything that already exists.
	pub fn add_output(&mut self, id: &Outpoint, record: OutputRecord, batch: &Batch) -> Result<()> {
		if self.exists(id) {
			return Err(ErrorKind::DuplicateOutpoint(format!("{}", id)).into());
		}
		self.outputs.insert(*id, record);
		self.write_output(id, batch)
	}

	/// Persist the current in-memory record and mirror its key index
	/// entries. Must follow any direct mutation through `get_mut` before
	/// the batch commits.
	pub fn write_output(&mut self, id: &Outpoint, batch: &Batch) -> Result<()> {
		let (bytes, keys) = {
			let record = self
				.outputs
				.get(id)
				.ok_or_else(|| ErrorKind::NotFound(format!("{}", id)))?;
			(record.encode()?, record.keys.clone())
		};
		for key in keys.iter().filter(|k| k.subchain != Subchain::Outgoing) {
			batch.put(&index_key(KEY_PREFIX, &key.encode(), id), &id.encode())?;
			self.keys.entry(*key).or_default().insert(*id);
		}
		batch.put(&output_key(id), &bytes)?;
		Ok(())
	}

	/// Remove a record and every index entry referencing it. Pruning only;
	/// state transitions are preferred for live outputs.
	pub fn remove_output(&mut self, id: &Outpoint, batch: &Batch) -> Result<()> {
		if self.outputs.remove(id).is_none() {
			return Err(ErrorKind::NotFound(format!("{}", id)).into());
		}
		batch.delete(&output_key(id))?;
		for (account, set) in self.accounts.iter_mut() {
			if set.remove(id) {
				batch.delete(&index_key(ACCOUNT_PREFIX, account.as_bytes(), id))?;
			}
		}
		self.accounts.retain(|_, set| !set.is_empty());
		for (key, set) in self.keys.iter_mut() {
			if set.remove(id) {
				batch.delete(&index_key(KEY_PREFIX, &key.encode(), id))?;
			}
		}
		self.keys.retain(|_, set| !set.is_empty());
		for (nym, set) in self.nyms.iter_mut() {
			if set.remove(id) {
				batch.delete(&index_key(NYM_PREFIX, nym.as_bytes(), id))?;
			}
		}
		for (position, set) in self.positions.iter_mut() {
			if set.remove(id) {
				batch.delete(&index_key(POSITION_PREFIX, &position.encode(), id))?;
			}
		}
		self.positions.retain(|_, set| !set.is_empty());
		for (state, set) in self.states.iter_mut() {
			if set.remove(id) {
				batch.delete(&index_key(STATE_PREFIX, &state_axis(*state), id))?;
			}
		}
		self.states.retain(|_, set| !set.is_empty());
		for (subchain, set) in self.subchains.iter_mut() {
			if set.remove(id) {
				batch.delete(&index_key(SUBCHAIN_PREFIX, &subchain.encode(), id))?;
			}
		}
		self.subchains.retain(|_, set| !set.is_empty());
		for (height, set) in self.generation.iter_mut() {
			if set.remove(id) {
				batch.delete(&index_key(GENERATION_PREFIX, &height_axis(*height), id))?;
			}
		}
		self.generation.retain(|_, set| !set.is_empty());
		if let Some(proposal) = self.output_proposal.remove(id) {
			batch.delete(&to_key(OUTPUT_PROPOSAL_PREFIX, &id.encode()))?;
			for (prefix, map) in vec![
				(PROPOSAL_CREATED_PREFIX, &mut self.proposal_created),
				(PROPOSAL_SPENT_PREFIX, &mut self.proposal_spent),
			] {
				if let Some(set) = map.get_mut(&proposal) {
					if set.remove(id) {
						batch.delete(&index_key(prefix, proposal.as_bytes(), id))?;
					}
					if set.is_empty() {
						map.remove(&proposal);
					}
				}
			}
		}
		Ok(())
	}

	pub fn add_to_account(&mut self, id: &AccountId, output: &Outpoint, batch: &Batch) -> Result<()> {
		batch.put(
			&index_key(ACCOUNT_PREFIX, id.as_bytes(), output),
			&output.encode(),
		)?;
		self.accounts.entry(*id).or_default().insert(*output);
		Ok(())
	}

	pub fn add_to_nym(&mut self, id: &NymId, output: &Outpoint, batch: &Batch) -> Result<()> {
		batch.put(
			&index_key(NYM_PREFIX, id.as_bytes(), output),
			&output.encode(),
		)?;
		self.nyms.entry(*id).or_default().insert(*output);
		self.nym_list.insert(*id);
		Ok(())
	}

	pub fn add_to_position(
		&mut self,
		id: &BlockPosition,
		output: &Outpoint,
		batch: &Batch,
	) -> Result<()> {
		batch.put(
			&index_key(POSITION_PREFIX, &id.encode(), output),
			&output.encode(),
		)?;
		self.positions.entry(*id).or_default().insert(*output);
		Ok(())
	}

	pub fn add_to_state(&mut self, id: TxoState, output: &Outpoint, batch: &Batch) -> Result<()> {
		batch.put(
			&index_key(STATE_PREFIX, &state_axis(id), output),
			&output.encode(),
		)?;
		self.states.entry(id).or_default().insert(*output);
		Ok(())
	}

	pub fn add_to_subchain(
		&mut self,
		id: &SubchainId,
		output: &Outpoint,
		batch: &Batch,
	) -> Result<()> {
		batch.put(
			&index_key(SUBCHAIN_PREFIX, &id.encode(), output),
			&output.encode(),
		)?;
		self.subchains.entry(*id).or_default().insert(*output);
		Ok(())
	}

	pub fn add_to_generation(&mut self, height: i64, output: &Outpoint, batch: &Batch) -> Result<()> {
		batch.put(
			&index_key(GENERATION_PREFIX, &height_axis(height), output),
			&output.encode(),
		)?;
		self.generation.entry(height).or_default().insert(*output);
		Ok(())
	}

	pub fn remove_generation_height(&mut self, height: i64, batch: &Batch) -> Result<()> {
		if let Some(set) = self.generation.remove(&height) {
			for output in set {
				batch.delete(&index_key(GENERATION_PREFIX, &height_axis(height), &output))?;
			}
		}
		Ok(())
	}

	/// Move an outpoint between state buckets. The only way outpoints move:
	/// every bucket is purged first, in the KV tables and in memory, so a
	/// stray double-entry can never survive a transition.
	pub fn change_state(
		&mut self,
		old_state: TxoState,
		new_state: TxoState,
		id: &Outpoint,
		batch: &Batch,
	) -> Result<()> {
		let mut deleted = Vec::new();
		for state in TxoState::ALL.iter() {
			if batch.delete(&index_key(STATE_PREFIX, &state_axis(*state), id))? {
				deleted.push(*state);
			}
		}
		if deleted.is_empty() || deleted[0] != old_state {
			warn!("state index for {} did not match expected value", id);
		}
		if deleted.len() > 1 {
			warn!("output {} found in multiple state indices", id);
		}
		batch.put(
			&index_key(STATE_PREFIX, &state_axis(new_state), id),
			&id.encode(),
		)?;

		for state in TxoState::ALL.iter() {
			if let Some(set) = self.states.get_mut(state) {
				set.remove(id);
				if set.is_empty() {
					self.states.remove(state);
				}
			}
		}
		self.states.entry(new_state).or_default().insert(*id);
		Ok(())
	}

	pub fn change_position(
		&mut self,
		old_position: &BlockPosition,
		new_position: &BlockPosition,
		id: &Outpoint,
		batch: &Batch,
	) -> Result<()> {
		if !batch.delete(&index_key(POSITION_PREFIX, &old_position.encode(), id))? {
			warn!("position index for {} already removed", id);
		}
		batch.put(
			&index_key(POSITION_PREFIX, &new_position.encode(), id),
			&id.encode(),
		)?;

		if let Some(set) = self.positions.get_mut(old_position) {
			set.remove(id);
			if set.is_empty() {
				self.positions.remove(old_position);
			}
		}
		self.positions.entry(*new_position).or_default().insert(*id);
		Ok(())
	}

	/// Persist a new wallet tip.
	pub fn update_position(&mut self, position: &BlockPosition, batch: &Batch) -> Result<()> {
		batch.put(
			&to_key(CONFIG_PREFIX, &WALLET_POSITION_KEY),
			&position.encode(),
		)?;
		self.position = Some(*position);
		Ok(())
	}

	pub fn add_proposal_spent(
		&mut self,
		proposal: &ProposalId,
		output: &Outpoint,
		batch: &Batch,
	) -> Result<()> {
		batch.put(
			&index_key(PROPOSAL_SPENT_PREFIX, proposal.as_bytes(), output),
			&output.encode(),
		)?;
		self.proposal_spent.entry(*proposal).or_default().insert(*output);
		Ok(())
	}

	pub fn add_proposal_created(
		&mut self,
		proposal: &ProposalId,
		output: &Outpoint,
		batch: &Batch,
	) -> Result<()> {
		batch.put(
			&index_key(PROPOSAL_CREATED_PREFIX, proposal.as_bytes(), output),
			&output.encode(),
		)?;
		self.proposal_created
			.entry(*proposal)
			.or_default()
			.insert(*output);
		Ok(())
	}

	pub fn set_output_proposal(
		&mut self,
		output: &Outpoint,
		proposal: &ProposalId,
		batch: &Batch,
	) -> Result<()> {
		batch.put(
			&to_key(OUTPUT_PROPOSAL_PREFIX, &output.encode()),
			proposal.as_bytes(),
		)?;
		self.output_proposal.insert(*output, *proposal);
		Ok(())
	}

	pub fn delete_output_proposal(&mut self, output: &Outpoint, batch: &Batch) -> Result<bool> {
		self.output_proposal.remove(output);
		batch.delete(&to_key(OUTPUT_PROPOSAL_PREFIX, &output.encode()))
	}

	pub fn delete_proposal_created_entry(
		&mut self,
		proposal: &ProposalId,
		output: &Outpoint,
		batch: &Batch,
	) -> Result<bool> {
		if let Some(set) = self.proposal_created.get_mut(proposal) {
			set.remove(output);
			if set.is_empty() {
				self.proposal_created.remove(proposal);
			}
		}
		batch.delete(&index_key(PROPOSAL_CREATED_PREFIX, proposal.as_bytes(), output))
	}

	pub fn delete_proposal_spent_entry(
		&mut self,
		proposal: &ProposalId,
		output: &Outpoint,
		batch: &Batch,
	) -> Result<bool> {
		if let Some(set) = self.proposal_spent.get_mut(proposal) {
			set.remove(output);
			if set.is_empty() {
				self.proposal_spent.remove(proposal);
			}
		}
		batch.delete(&index_key(PROPOSAL_SPENT_PREFIX, proposal.as_bytes(), output))
	}

	/// Drop the whole spent side of a proposal. Returns false when the
	/// index was already gone.
	pub fn delete_proposal_spent_all(&mut self, proposal: &ProposalId, batch: &Batch) -> Result<bool> {
		match self.proposal_spent.remove(proposal) {
			Some(set) => {
				for output in set {
					batch.delete(&index_key(
						PROPOSAL_SPENT_PREFIX,
						proposal.as_bytes(),
						&output,
					))?;
				}
				Ok(true)
			}
			None => Ok(false),
		}
	}

	/// Drop the whole created side of a proposal.
	pub fn delete_proposal_created_all(
		&mut self,
		proposal: &ProposalId,
		batch: &Batch,
	) -> Result<bool> {
		match self.proposal_created.remove(proposal) {
			Some(set) => {
				for output in set {
					batch.delete(&index_key(
						PROPOSAL_CREATED_PREFIX,
						proposal.as_bytes(),
						&output,
					))?;
				}
				Ok(true)
			}
			None => Ok(false),
		}
	}
}

fn axis(key: &[u8], len: usize) -> Result<Vec<u8>> {
	if key.len() != len + OUTPOINT_LEN {
		return Err(
			ErrorKind::Serialization(format!("malformed index key of length {}", key.len())).into(),
		);
	}
	Ok(key[..len].to_vec())
}

fn decode_proposal_id(bytes: &[u8]) -> Result<ProposalId> {
	Uuid::from_slice(bytes)
		.map_err(|e| ErrorKind::Serialization(format!("invalid proposal id: {}", e)).into())
}

//! Shared fixture for the database integration tests: an in-process key
//! registry and proposal store, a throwaway LMDB directory, and builders
//! for the transactions the scenarios ingest.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use txodb::common::{ChainTypes, DbConfig, Result};
use txodb::wallet::registry::{KeyRegistry, ProposalRegistry};
use txodb::wallet::types::{
	AccountId, Amount, BlockHash, BlockPosition, ContactId, KeyRef, NymId, Outpoint, ProposalId,
	Script, Subchain, Transaction, TxIn, TxOut, TxoState, Txid,
};
use txodb::wallet::OutputDatabase;

pub const COINBASE_VALUE: u64 = 5_000_000_000;

/// Key registry stub: every non-outgoing key belongs to the fixture nym,
/// outgoing keys resolve to fixed contacts, and unconfirm calls are
/// recorded for assertions.
pub struct TestRegistry {
	owner: NymId,
	pub unconfirmed: Arc<Mutex<Vec<(KeyRef, Txid)>>>,
}

impl KeyRegistry for TestRegistry {
	fn owner(&self, _key: &KeyRef) -> Option<NymId> {
		Some(self.owner)
	}

	fn outgoing_contacts(&self, _key: &KeyRef) -> (Option<ContactId>, Option<ContactId>) {
		(Some(ContactId([0xaa; 32])), Some(ContactId([0xbb; 32])))
	}

	fn unconfirm(&self, key: &KeyRef, txid: &Txid) -> Result<()> {
		self.unconfirmed.lock().unwrap().push((*key, *txid));
		Ok(())
	}

	fn process_transaction(&self, _chain: ChainTypes, _tx: &Transaction) -> Result<()> {
		Ok(())
	}
}

pub struct TestProposals {
	pub finished: Arc<Mutex<Vec<ProposalId>>>,
	pub cancelled: Arc<Mutex<Vec<ProposalId>>>,
}

impl ProposalRegistry for TestProposals {
	fn finish_proposal(&self, proposal: &ProposalId) -> Result<()> {
		self.finished.lock().unwrap().push(*proposal);
		Ok(())
	}

	fn cancel_proposal(&self, proposal: &ProposalId) -> Result<()> {
		self.cancelled.lock().unwrap().push(*proposal);
		Ok(())
	}
}

pub struct TestWallet {
	pub db: OutputDatabase<TestRegistry, TestProposals>,
	pub account: AccountId,
	pub nym: NymId,
	pub unconfirmed: Arc<Mutex<Vec<(KeyRef, Txid)>>>,
	pub finished: Arc<Mutex<Vec<ProposalId>>>,
	pub cancelled: Arc<Mutex<Vec<ProposalId>>>,
	// dropped last, after the database releases the LMDB environment
	pub dir: TempDir,
}

/// A fresh single-confirmation-maturity wallet in a throwaway directory.
pub fn wallet() -> TestWallet {
	let _ = env_logger::try_init();
	let dir = tempfile::tempdir().unwrap();
	let account = AccountId([0x11; 32]);
	let nym = NymId([0x22; 32]);
	let unconfirmed = Arc::new(Mutex::new(Vec::new()));
	let finished = Arc::new(Mutex::new(Vec::new()));
	let cancelled = Arc::new(Mutex::new(Vec::new()));
	let registry = TestRegistry {
		owner: nym,
		unconfirmed: unconfirmed.clone(),
	};
	let proposals = TestProposals {
		finished: finished.clone(),
		cancelled: cancelled.clone(),
	};
	let config = DbConfig::new(
		dir.path().to_str().unwrap(),
		ChainTypes::AutomatedTesting,
	);
	let db = OutputDatabase::open(&config, registry, proposals).unwrap();
	TestWallet {
		db,
		account,
		nym,
		unconfirmed,
		finished,
		cancelled,
		dir,
	}
}

/// Reopen the database on the same directory, as after a restart.
pub fn reopen(wallet: TestWallet) -> TestWallet {
	let TestWallet {
		db,
		account,
		nym,
		unconfirmed,
		finished,
		cancelled,
		dir,
	} = wallet;
	drop(db);
	let registry = TestRegistry {
		owner: nym,
		unconfirmed: unconfirmed.clone(),
	};
	let proposals = TestProposals {
		finished: finished.clone(),
		cancelled: cancelled.clone(),
	};
	let config = DbConfig::new(
		dir.path().to_str().unwrap(),
		ChainTypes::AutomatedTesting,
	);
	let db = OutputDatabase::open(&config, registry, proposals).unwrap();
	TestWallet {
		db,
		account,
		nym,
		unconfirmed,
		finished,
		cancelled,
		dir,
	}
}

pub fn txid(n: u8) -> Txid {
	Txid([n; 32])
}

pub fn pos(height: i64, n: u8) -> BlockPosition {
	BlockPosition::new(height, BlockHash([n; 32]))
}

pub fn key(account: AccountId, subchain: Subchain, index: u32) -> KeyRef {
	KeyRef::new(account, subchain, index)
}

pub fn p2pkh(n: u8) -> Script {
	let mut bytes = vec![0x76, 0xa9, 20];
	bytes.extend_from_slice(&[n; 20]);
	bytes.extend_from_slice(&[0x88, 0xac]);
	Script::new(bytes)
}

/// A coinbase transaction with a single owned output.
pub fn coinbase_tx(id: Txid, value: u64, to: KeyRef) -> Transaction {
	Transaction::new(
		id,
		vec![TxIn::generation()],
		vec![TxOut::new(Amount::from(value), p2pkh(id.0[0]), vec![to])],
	)
}

/// A spend with the given inputs and one output per (value, key) pair.
pub fn spend_tx(id: Txid, inputs: Vec<Outpoint>, outputs: Vec<(u64, KeyRef)>) -> Transaction {
	Transaction::new(
		id,
		inputs.into_iter().map(TxIn::new).collect(),
		outputs
			.into_iter()
			.enumerate()
			.map(|(i, (value, to))| {
				TxOut::new(Amount::from(value), p2pkh(id.0[0] ^ (i as u8)), vec![to])
			})
			.collect(),
	)
}

pub fn state_of(wallet: &TestWallet, outpoint: &Outpoint) -> TxoState {
	wallet
		.db
		.get_output(outpoint)
		.unwrap()
		.expect("output exists")
		.state
}

pub fn confirmed_balance(wallet: &TestWallet) -> Amount {
	wallet.db.get_balance_for_nym(&wallet.nym).unwrap().confirmed
}

pub fn unconfirmed_balance(wallet: &TestWallet) -> Amount {
	wallet
		.db
		.get_balance_for_nym(&wallet.nym)
		.unwrap()
		.unconfirmed
}

/// Every outpoint appears in exactly one state bucket, and the buckets
/// cover the whole store.
pub fn assert_state_disjoint(wallet: &TestWallet) {
	let mut seen: BTreeMap<Outpoint, usize> = BTreeMap::new();
	for state in TxoState::ALL.iter() {
		for (outpoint, record) in wallet.db.get_outputs(&[*state]).unwrap() {
			assert_eq!(record.state, *state);
			*seen.entry(outpoint).or_insert(0) += 1;
		}
	}
	let all = wallet.db.get_outputs(&TxoState::ALL).unwrap();
	assert_eq!(seen.len(), all.len());
	for (outpoint, count) in seen {
		assert_eq!(count, 1, "outpoint {} in {} state buckets", outpoint, count);
	}
}

/// The reported confirmed balance matches the sum over the state indices.
pub fn assert_balance_consistent(wallet: &TestWallet) {
	let confirmed_new: Amount = wallet
		.db
		.get_outputs_for_nym(&wallet.nym, &[TxoState::ConfirmedNew])
		.unwrap()
		.into_iter()
		.map(|(_, record)| record.value)
		.sum();
	let unconfirmed_spend: Amount = wallet
		.db
		.get_outputs_for_nym(&wallet.nym, &[TxoState::UnconfirmedSpend])
		.unwrap()
		.into_iter()
		.map(|(_, record)| record.value)
		.sum();
	assert_eq!(confirmed_balance(wallet), confirmed_new + unconfirmed_spend);
}

//! End-to-end scenarios against a single-confirmation-maturity chain.

mod support;

use support::*;
use txodb::wallet::types::{
	Amount, Outpoint, ProposalId, SpendPolicy, Subchain, TxoState, TxoTag,
};
use txodb::wallet::WalletEvent;

fn coinbase_outpoint() -> Outpoint {
	Outpoint::new(txid(1), 0)
}

/// Scenario 1 fixture: one matured coinbase worth `COINBASE_VALUE`.
fn matured_coinbase() -> TestWallet {
	let wallet = wallet();
	let cb = coinbase_tx(txid(1), COINBASE_VALUE, key(wallet.account, Subchain::External, 0));
	wallet
		.db
		.add_confirmed_transaction(&wallet.account, Subchain::External, &pos(0, 10), &[0], &cb)
		.unwrap();
	wallet.db.advance_to(&pos(1, 11)).unwrap();
	wallet
}

/// Scenario 2 fixture: the coinbase spent into a change output (index 0)
/// and a fresh receive output (index 1), fee 100.
fn self_payment() -> (TestWallet, Outpoint, Outpoint) {
	let wallet = matured_coinbase();
	let tx = spend_tx(
		txid(2),
		vec![coinbase_outpoint()],
		vec![
			(3_999_999_900, key(wallet.account, Subchain::Internal, 0)),
			(1_000_000_000, key(wallet.account, Subchain::External, 1)),
		],
	);
	wallet
		.db
		.add_confirmed_transaction(&wallet.account, Subchain::External, &pos(2, 12), &[0, 1], &tx)
		.unwrap();
	(wallet, Outpoint::new(txid(2), 0), Outpoint::new(txid(2), 1))
}

#[test]
fn mature_coinbase() {
	let wallet = wallet();
	let cb = coinbase_tx(txid(1), COINBASE_VALUE, key(wallet.account, Subchain::External, 0));
	wallet
		.db
		.add_confirmed_transaction(&wallet.account, Subchain::External, &pos(0, 10), &[0], &cb)
		.unwrap();

	assert_eq!(state_of(&wallet, &coinbase_outpoint()), TxoState::Immature);
	assert_eq!(confirmed_balance(&wallet), Amount::from(0u32));
	let tags = wallet.db.get_output_tags(&coinbase_outpoint()).unwrap();
	assert!(tags.contains(&TxoTag::Generation));

	wallet.db.advance_to(&pos(1, 11)).unwrap();
	assert_eq!(
		state_of(&wallet, &coinbase_outpoint()),
		TxoState::ConfirmedNew
	);
	assert_eq!(confirmed_balance(&wallet), Amount::from(COINBASE_VALUE));
	assert_eq!(wallet.db.get_wallet_height().unwrap(), 1);
	// maturation keeps the mined position
	let record = wallet
		.db
		.get_output(&coinbase_outpoint())
		.unwrap()
		.unwrap();
	assert_eq!(record.position, pos(0, 10));
	assert_state_disjoint(&wallet);
	assert_balance_consistent(&wallet);
}

#[test]
fn self_payment_confirms_both_outputs() {
	let (wallet, change, receive) = self_payment();

	assert_eq!(
		state_of(&wallet, &coinbase_outpoint()),
		TxoState::ConfirmedSpend
	);
	assert_eq!(state_of(&wallet, &change), TxoState::ConfirmedNew);
	assert_eq!(state_of(&wallet, &receive), TxoState::ConfirmedNew);
	assert_eq!(confirmed_balance(&wallet), Amount::from(4_999_999_900u64));

	let change_tags = wallet.db.get_output_tags(&change).unwrap();
	assert!(change_tags.contains(&TxoTag::Normal));
	assert!(change_tags.contains(&TxoTag::Change));

	// spending provenance advanced the consumed output's position
	let spent = wallet.db.get_output(&coinbase_outpoint()).unwrap().unwrap();
	assert_eq!(spent.position, pos(2, 12));

	assert_state_disjoint(&wallet);
	assert_balance_consistent(&wallet);
}

#[test]
fn duplicate_confirmed_ingest_is_a_no_op() {
	let (wallet, _, _) = self_payment();
	let before = wallet.db.get_outputs(&TxoState::ALL).unwrap();
	let balance_before = wallet.db.get_balance().unwrap();

	let tx = spend_tx(
		txid(2),
		vec![coinbase_outpoint()],
		vec![
			(3_999_999_900, key(wallet.account, Subchain::Internal, 0)),
			(1_000_000_000, key(wallet.account, Subchain::External, 1)),
		],
	);
	wallet
		.db
		.add_confirmed_transaction(&wallet.account, Subchain::External, &pos(2, 12), &[0, 1], &tx)
		.unwrap();

	let mut after = wallet.db.get_outputs(&TxoState::ALL).unwrap();
	let mut before = before;
	before.sort_by_key(|(outpoint, _)| *outpoint);
	after.sort_by_key(|(outpoint, _)| *outpoint);
	assert_eq!(before, after);
	assert_eq!(wallet.db.get_balance().unwrap(), balance_before);
}

#[test]
fn mempool_then_confirm() {
	let wallet = matured_coinbase();
	let tx = spend_tx(
		txid(2),
		vec![coinbase_outpoint()],
		vec![
			(3_999_999_900, key(wallet.account, Subchain::Internal, 0)),
			(1_000_000_000, key(wallet.account, Subchain::External, 1)),
		],
	);
	wallet
		.db
		.add_mempool_transaction(&wallet.account, Subchain::External, &[0, 1], &tx)
		.unwrap();

	let change = Outpoint::new(txid(2), 0);
	let receive = Outpoint::new(txid(2), 1);
	assert_eq!(
		state_of(&wallet, &coinbase_outpoint()),
		TxoState::UnconfirmedSpend
	);
	assert_eq!(state_of(&wallet, &change), TxoState::UnconfirmedNew);
	assert_eq!(state_of(&wallet, &receive), TxoState::UnconfirmedNew);
	// reserved-in-flight value stays confirmed until the spend lands
	assert_eq!(confirmed_balance(&wallet), Amount::from(COINBASE_VALUE));
	assert_eq!(
		unconfirmed_balance(&wallet),
		Amount::from(4_999_999_900u64)
	);
	// the mempool edit never advanced the coinbase's mined position
	let spent = wallet.db.get_output(&coinbase_outpoint()).unwrap().unwrap();
	assert_eq!(spent.position, pos(0, 10));
	assert!(wallet
		.db
		.get_unconfirmed_transactions()
		.unwrap()
		.contains(&txid(2)));

	wallet
		.db
		.add_confirmed_transaction(&wallet.account, Subchain::External, &pos(2, 12), &[0, 1], &tx)
		.unwrap();
	assert_eq!(
		state_of(&wallet, &coinbase_outpoint()),
		TxoState::ConfirmedSpend
	);
	assert_eq!(state_of(&wallet, &change), TxoState::ConfirmedNew);
	assert_eq!(state_of(&wallet, &receive), TxoState::ConfirmedNew);
	assert_eq!(confirmed_balance(&wallet), Amount::from(4_999_999_900u64));
	assert_state_disjoint(&wallet);
	assert_balance_consistent(&wallet);
}

#[test]
fn reserve_and_cancel_round_trip() {
	let (wallet, change, _) = self_payment();
	let proposal = ProposalId::new_v4();

	let (reserved, record) = wallet
		.db
		.reserve_utxo(&wallet.nym, &proposal, &SpendPolicy::default())
		.expect("a confirmed output is reservable");
	// oldest position first, lowest outpoint within it: the change output
	assert_eq!(reserved, change);
	assert_eq!(record.state, TxoState::UnconfirmedSpend);
	assert_eq!(record.position, pos(2, 12));
	assert_eq!(record.value, Amount::from(3_999_999_900u64));
	assert_eq!(
		wallet.db.get_output_proposal(&reserved).unwrap(),
		Some(proposal)
	);
	let (spent, created) = wallet.db.get_proposal_reservations(&proposal).unwrap();
	assert_eq!(spent, vec![reserved]);
	assert!(created.is_empty());
	// reservation does not reduce the confirmed balance
	assert_eq!(confirmed_balance(&wallet), Amount::from(4_999_999_900u64));

	wallet.db.cancel_proposal(&proposal).unwrap();
	let restored = wallet.db.get_output(&reserved).unwrap().unwrap();
	assert_eq!(restored.state, TxoState::ConfirmedNew);
	assert_eq!(restored.position, pos(2, 12));
	assert_eq!(restored.value, Amount::from(3_999_999_900u64));
	assert_eq!(wallet.db.get_output_proposal(&reserved).unwrap(), None);
	let (spent, created) = wallet.db.get_proposal_reservations(&proposal).unwrap();
	assert!(spent.is_empty() && created.is_empty());
	assert_eq!(*wallet.cancelled.lock().unwrap(), vec![proposal]);
	assert_state_disjoint(&wallet);
	assert_balance_consistent(&wallet);
}

#[test]
fn reserve_respects_unconfirmed_policy() {
	let wallet = matured_coinbase();
	// mempool spend: External receive at index 0, change at index 1
	let tx = spend_tx(
		txid(2),
		vec![coinbase_outpoint()],
		vec![
			(1_000_000_000, key(wallet.account, Subchain::External, 1)),
			(3_999_999_900, key(wallet.account, Subchain::Internal, 0)),
		],
	);
	wallet
		.db
		.add_mempool_transaction(&wallet.account, Subchain::External, &[0, 1], &tx)
		.unwrap();

	let proposal = ProposalId::new_v4();
	assert!(wallet
		.db
		.reserve_utxo(&wallet.nym, &proposal, &SpendPolicy::default())
		.is_none());

	let change_only = SpendPolicy {
		unconfirmed_incoming: false,
		unconfirmed_change: true,
	};
	let (reserved, record) = wallet
		.db
		.reserve_utxo(&wallet.nym, &proposal, &change_only)
		.expect("change output is reservable");
	assert_eq!(reserved, Outpoint::new(txid(2), 1));
	assert!(record.tags.contains(&TxoTag::Change));

	let any_unconfirmed = SpendPolicy {
		unconfirmed_incoming: true,
		unconfirmed_change: false,
	};
	let other = ProposalId::new_v4();
	let (second, _) = wallet
		.db
		.reserve_utxo(&wallet.nym, &other, &any_unconfirmed)
		.expect("incoming output is reservable");
	// the change output is already claimed by the first proposal
	assert_eq!(second, Outpoint::new(txid(2), 0));
}

#[test]
fn reorg_rolls_spends_back() {
	let (wallet, change, receive) = self_payment();

	{
		let batch = wallet.db.batch().unwrap();
		wallet
			.db
			.start_reorg(
				&batch,
				&txodb::wallet::types::SubchainId::new(wallet.account, Subchain::External),
				&pos(2, 12),
			)
			.unwrap();
		wallet.db.finalize_reorg(&batch, &pos(1, 11)).unwrap();
		batch.commit().unwrap();
	}

	assert_eq!(
		state_of(&wallet, &coinbase_outpoint()),
		TxoState::UnconfirmedSpend
	);
	assert_eq!(state_of(&wallet, &change), TxoState::UnconfirmedNew);
	assert_eq!(state_of(&wallet, &receive), TxoState::UnconfirmedNew);
	assert_eq!(wallet.db.get_wallet_height().unwrap(), 1);
	// the registry was told to unconfirm every affected key
	assert!(!wallet.unconfirmed.lock().unwrap().is_empty());
	assert_state_disjoint(&wallet);
}

#[test]
fn reorg_at_tip_is_a_no_op() {
	let wallet = matured_coinbase();
	let before = wallet.db.get_outputs(&TxoState::ALL).unwrap();

	{
		let batch = wallet.db.batch().unwrap();
		wallet
			.db
			.start_reorg(
				&batch,
				&txodb::wallet::types::SubchainId::new(wallet.account, Subchain::External),
				&pos(1, 11),
			)
			.unwrap();
		wallet.db.finalize_reorg(&batch, &pos(1, 11)).unwrap();
		batch.commit().unwrap();
	}

	let mut after = wallet.db.get_outputs(&TxoState::ALL).unwrap();
	let mut before = before;
	before.sort_by_key(|(outpoint, _)| *outpoint);
	after.sort_by_key(|(outpoint, _)| *outpoint);
	assert_eq!(before, after);
	assert_eq!(wallet.db.get_wallet_height().unwrap(), 1);
}

#[test]
fn advance_to_current_tip_is_a_no_op() {
	let wallet = matured_coinbase();
	let before = wallet.db.get_outputs(&TxoState::ALL).unwrap();
	wallet.db.advance_to(&pos(1, 11)).unwrap();
	let after = wallet.db.get_outputs(&TxoState::ALL).unwrap();
	assert_eq!(before.len(), after.len());
	assert_eq!(wallet.db.get_wallet_height().unwrap(), 1);
}

#[test]
fn proposal_superseded_by_block() {
	let (wallet, _, _) = self_payment();
	let proposal = ProposalId::new_v4();

	let (reserved, _) = wallet
		.db
		.reserve_utxo(&wallet.nym, &proposal, &SpendPolicy::default())
		.unwrap();
	let authored = spend_tx(
		txid(7),
		vec![reserved],
		vec![(3_999_999_800, key(wallet.account, Subchain::Internal, 1))],
	);
	wallet
		.db
		.add_outgoing_transaction(&proposal, &authored)
		.unwrap();
	let pending = Outpoint::new(txid(7), 0);
	assert_eq!(state_of(&wallet, &pending), TxoState::UnconfirmedNew);
	let (spent, created) = wallet.db.get_proposal_reservations(&proposal).unwrap();
	assert_eq!(spent, vec![reserved]);
	assert_eq!(created, vec![pending]);

	// a different transaction spending the same output reaches a block
	let competing = spend_tx(
		txid(8),
		vec![reserved],
		vec![(3_999_999_800, key(wallet.account, Subchain::External, 2))],
	);
	wallet
		.db
		.add_confirmed_transaction(
			&wallet.account,
			Subchain::External,
			&pos(3, 13),
			&[0],
			&competing,
		)
		.unwrap();

	assert_eq!(state_of(&wallet, &pending), TxoState::OrphanedNew);
	assert_eq!(state_of(&wallet, &reserved), TxoState::ConfirmedSpend);
	assert_eq!(
		state_of(&wallet, &Outpoint::new(txid(8), 0)),
		TxoState::ConfirmedNew
	);
	assert_eq!(wallet.db.get_output_proposal(&pending).unwrap(), None);
	assert_eq!(wallet.db.get_output_proposal(&reserved).unwrap(), None);
	let (spent, created) = wallet.db.get_proposal_reservations(&proposal).unwrap();
	assert!(spent.is_empty() && created.is_empty());
	assert_eq!(*wallet.finished.lock().unwrap(), vec![proposal]);
	assert_state_disjoint(&wallet);
	assert_balance_consistent(&wallet);
}

#[test]
fn outgoing_transaction_requires_reservation() {
	let (wallet, _, receive) = self_payment();
	let proposal = ProposalId::new_v4();
	let authored = spend_tx(
		txid(9),
		vec![receive],
		vec![(999_999_900, key(wallet.account, Subchain::Internal, 2))],
	);
	assert!(wallet
		.db
		.add_outgoing_transaction(&proposal, &authored)
		.is_err());
	// the failed mutator left no trace
	assert!(wallet.db.get_output(&Outpoint::new(txid(9), 0)).unwrap().is_none());
	assert_state_disjoint(&wallet);
}

#[test]
fn outgoing_keys_carry_contacts_not_ownership() {
	let (wallet, _, _) = self_payment();
	let proposal = ProposalId::new_v4();
	let (reserved, _) = wallet
		.db
		.reserve_utxo(&wallet.nym, &proposal, &SpendPolicy::default())
		.unwrap();
	let balance_before = confirmed_balance(&wallet);

	// payment to a counterparty through a key we derived for them
	let authored = spend_tx(
		txid(7),
		vec![reserved],
		vec![(3_999_999_800, key(wallet.account, Subchain::Outgoing, 0))],
	);
	wallet
		.db
		.add_outgoing_transaction(&proposal, &authored)
		.unwrap();

	let paid = Outpoint::new(txid(7), 0);
	let record = wallet.db.get_output(&paid).unwrap().unwrap();
	assert!(record.owners.is_empty());
	assert!(record.payer.is_some());
	assert!(record.payee.is_some());
	// not ours: neither the nym index nor the balance picks it up
	assert!(wallet
		.db
		.get_outputs_for_nym(&wallet.nym, &[TxoState::UnconfirmedNew])
		.unwrap()
		.is_empty());
	assert_eq!(confirmed_balance(&wallet), balance_before);
}

#[test]
fn reload_preserves_state() {
	let (wallet, _, _) = self_payment();
	let mut before = wallet.db.get_outputs(&TxoState::ALL).unwrap();
	let balance_before = wallet.db.get_balance().unwrap();
	let height_before = wallet.db.get_wallet_height().unwrap();

	let wallet = reopen(wallet);
	let mut after = wallet.db.get_outputs(&TxoState::ALL).unwrap();
	before.sort_by_key(|(outpoint, _)| *outpoint);
	after.sort_by_key(|(outpoint, _)| *outpoint);
	assert_eq!(before, after);
	assert_eq!(wallet.db.get_balance().unwrap(), balance_before);
	assert_eq!(wallet.db.get_wallet_height().unwrap(), height_before);
	assert_state_disjoint(&wallet);
	assert_balance_consistent(&wallet);
}

#[test]
fn events_are_published_after_commit() {
	let wallet = wallet();
	let mut events = wallet.db.subscribe();

	let cb = coinbase_tx(txid(1), COINBASE_VALUE, key(wallet.account, Subchain::External, 0));
	wallet
		.db
		.add_confirmed_transaction(&wallet.account, Subchain::External, &pos(0, 10), &[0], &cb)
		.unwrap();

	let mut saw_balance = false;
	let mut saw_state_change = false;
	while let Ok(event) = events.try_recv() {
		match &*event {
			WalletEvent::BalanceUpdated { .. } | WalletEvent::NymBalanceUpdated { .. } => {
				saw_balance = true;
			}
			WalletEvent::TxoStateChanged { outpoint, state, .. } => {
				assert_eq!(*outpoint, coinbase_outpoint());
				assert_eq!(*state, TxoState::Immature);
				saw_state_change = true;
			}
		}
	}
	assert!(saw_balance);
	assert!(saw_state_change);
}

#[test]
fn transactions_are_listed_per_nym() {
	let (wallet, _, _) = self_payment();
	let all = wallet.db.get_transactions().unwrap();
	assert_eq!(all, vec![txid(1), txid(2)]);
	let mine = wallet.db.get_transactions_for_nym(&wallet.nym).unwrap();
	assert_eq!(mine, vec![txid(1), txid(2)]);
	assert!(wallet.db.get_unconfirmed_transactions().unwrap().is_empty());
}

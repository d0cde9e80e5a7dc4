use std::sync::Arc;
use tokio::sync::broadcast;

use crate::common::ChainTypes;
use crate::wallet::types::{Balance, NymId, Outpoint, TxoState};

const EVENT_CHANNEL_SIZE: usize = 250;

/// Events published after every committed mutation, sufficient for a
/// reorg-aware UI to stay current without polling.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
	/// Wallet-level balance for the chain changed
	BalanceUpdated {
		chain: ChainTypes,
		balance: Balance,
	},
	/// Balance of one nym on the chain changed
	NymBalanceUpdated {
		chain: ChainTypes,
		nym: NymId,
		balance: Balance,
	},
	/// An output moved to a new lifecycle state
	TxoStateChanged {
		chain: ChainTypes,
		outpoint: Outpoint,
		state: TxoState,
	},
}

/// Broadcast fan-out of wallet events. Slow or absent subscribers never
/// block mutators; they miss events instead.
#[derive(Clone)]
pub struct EventPublisher {
	sender: broadcast::Sender<Arc<WalletEvent>>,
}

impl EventPublisher {
	pub fn new() -> EventPublisher {
		let (sender, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
		EventPublisher { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Arc<WalletEvent>> {
		self.sender.subscribe()
	}

	pub fn publish(&self, event: WalletEvent) {
		// send only fails when there are no subscribers
		let _ = self.sender.send(Arc::new(event));
	}
}

impl Default for EventPublisher {
	fn default() -> EventPublisher {
		EventPublisher::new()
	}
}

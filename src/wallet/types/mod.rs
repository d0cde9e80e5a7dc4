mod balance;
mod ids;
mod key_ref;
mod outpoint;
mod output_record;
mod position;
mod proposal;
mod script;
mod transaction;
mod txo_state;
mod txo_tag;

pub use self::balance::{Amount, Balance};
pub use self::ids::{AccountId, ContactId, NymId, ID_LEN};
pub use self::key_ref::{KeyRef, Subchain, SubchainId, KEY_REF_LEN, SUBCHAIN_ID_LEN};
pub use self::outpoint::{Outpoint, Txid, OUTPOINT_LEN, TXID_LEN};
pub use self::output_record::OutputRecord;
pub use self::position::{BlockHash, BlockPosition, BLOCK_HASH_LEN, POSITION_LEN};
pub use self::proposal::{ProposalId, SpendPolicy};
pub use self::script::{fingerprint, Script, ScriptPattern};
pub use self::transaction::{Transaction, TxIn, TxOut};
pub use self::txo_state::TxoState;
pub use self::txo_tag::TxoTag;

//! Transactional UTXO database for Bitcoin-family wallets.
//!
//! The core of the crate is [`wallet::OutputDatabase`]: a store of every
//! output a wallet owns, reconciled across confirmed chain state, the
//! mempool and locally authored spend proposals, with tolerance for
//! blockchain reorganizations. All state lives in a single LMDB database
//! and is mirrored by in-memory indices that serve queries without
//! touching disk.

#[macro_use]
extern crate log;

pub mod common;
pub mod storage;
pub mod wallet;

pub use crate::common::{Error, ErrorKind, Result};

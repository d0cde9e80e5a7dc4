mod cache;
pub mod db;
pub mod events;
pub mod registry;
pub mod types;

pub use self::db::OutputDatabase;
pub use self::events::{EventPublisher, WalletEvent};
pub use self::registry::{KeyRegistry, ProposalRegistry};

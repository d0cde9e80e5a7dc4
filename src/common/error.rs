pub use failure::Error;
use failure::Fail;

/// Database errors reported to callers. Mutators clean up fully (abort the
/// write batch, drop the in-memory caches) before returning one of these.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// Outpoint missing from the output store
	#[fail(display = "output {} not found", _0)]
	NotFound(String),

	/// Requested state change is not in the legal transition set
	#[fail(display = "illegal transition for output {}: {} -> {}", _0, _1, _2)]
	IllegalTransition(String, String, String),

	/// Insert raced against an existing outpoint
	#[fail(display = "outpoint {} already exists in db", _0)]
	DuplicateOutpoint(String),

	/// The persistent store rejected an operation
	#[fail(display = "store error: {}", _0)]
	Store(String),

	/// Output record could not be encoded or decoded
	#[fail(display = "ser/deserialization error: {}", _0)]
	Serialization(String),

	/// Detected inconsistency between indices at runtime
	#[fail(display = "invariant violation: {}", _0)]
	InvariantViolation(String),

	/// Key with no registered owner outside the outgoing subchain
	#[fail(display = "no owner found for key {}", _0)]
	NoKeyOwner(String),

	/// Proposal bookkeeping failure
	#[fail(display = "proposal error: {}", _0)]
	Proposal(String),

	/// Transaction object rejected by the ingest pipeline
	#[fail(display = "transaction error: {}", _0)]
	Transaction(String),

	/// Other
	#[fail(display = "generic error: {}", _0)]
	GenericError(String),
}

// Resource ownership: which role may write which path
//
// Combined with the one-process-per-role registry this gives the global rule that
// at most one process holds write intent on a path at any instant.

pub mod gate;
pub mod router;
pub mod rules;

pub use gate::{OwnershipGate, WriteDecision};
pub use router::{WriteRoute, WriteRouter, DELEGATED_WRITE};
pub use rules::{escapes_root, normalize_path, OwnershipError, OwnershipRule, RuleSet};

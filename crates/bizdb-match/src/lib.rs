//! Name/address normalization and entity resolution against the business
//! registry.

pub mod index;
pub mod normalize;
pub mod reconcile;
pub mod resolve;

pub use index::{build_index, CanonicalIndex, NormalizedKey};
pub use normalize::{address_prefix, normalize, ADDRESS_PREFIX_TOKENS};
pub use reconcile::{reconcile, Reconciliation};
pub use resolve::{resolve, resolve_candidates, split_query_address, PlaceCandidate};

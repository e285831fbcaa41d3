//! strata-generation — the Generation Authority.
//!
//! The authority is the single source of truth for "who may write": every
//! attach is tied to a generation it issued, and generations for a tenant
//! are strictly increasing and never reused.
//!
//! - **`GenerationAuthority`**: the client contract every node talks to.
//! - **`LocalAuthority`**: an embedded authority that keeps its counters in
//!   the redb `StateStore`.

pub mod authority;
pub mod error;

pub use authority::{GenerationAuthority, GenerationStatus, Issued, LocalAuthority};
pub use error::{AuthorityError, AuthorityResult};

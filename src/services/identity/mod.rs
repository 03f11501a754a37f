//! Item identity: fingerprints, ids and registration.

mod fingerprint;
pub mod id_gen;
mod tagger;

pub use fingerprint::{FINGERPRINT_LEN, Fingerprinter};
pub use tagger::{CHECKED_ACTION, IdentityTagger};

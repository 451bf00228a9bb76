//! Event types handed to host applications.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them verbatim as JSON.

pub mod events;

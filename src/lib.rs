//! # confetch
//!
//! Keeps configuration files in sync with a JSON service. Each configured
//! template fetches a JSON document from the first reachable URL, renders a
//! MiniJinja template against it, and writes the destination only when the
//! rendered bytes changed. A changed file optionally triggers a check command
//! and a reload command.
//!
//! # Architecture: One Pass Per Template
//!
//! ```text
//! 1. Fetch    urls      →  Value        (first 200 response, decoded JSON)
//! 2. Render   template  →  bytes        (helpers + data root, in memory)
//! 3. Commit   bytes     →  dest         (fingerprint compare, atomic write)
//! 4. Hooks    changed   →  check/reload (only when the file changed)
//! ```
//!
//! Every stage can fail on its own and nothing is written until rendering
//! completed, so a bad response or a broken template never clobbers a good
//! config.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`value`] | Dynamic data model shared by JSON decoding, helpers and templates |
//! | [`funcs`] | The helper library callable from templates (`add`, `split`, `pushToMap`, …) |
//! | [`render`] | Template parsing and execution against a data root |
//! | [`commit`] | Change detection and atomic conditional writes |
//! | [`fetch`] | HTTP and file data sources |
//! | [`hook`] | Check/reload shell commands |
//! | [`sync`] | Drives fetch → render → commit → hooks per template |
//! | [`config`] | `confetch.toml` loading, defaults merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Shared Maps, Copied Arrays
//!
//! `createMap`/`pushToMap` mutate one map that every holder sees, which is
//! how templates accumulate lookups across loop iterations. `pushToArray`
//! returns a new array and leaves its input alone. See [`value::SharedMap`].
//!
//! ## Undefined Is An Error
//!
//! Calls to unknown functions fail at parse time. Missing variables and
//! attributes fail at execution unless guarded with `is defined`. A typo in a
//! template should never render an empty upstream block into a live proxy
//! config.

pub mod commit;
pub mod config;
pub mod fetch;
pub mod funcs;
pub mod hook;
pub mod output;
pub mod render;
pub mod sync;
pub mod value;

#[cfg(test)]
pub(crate) mod test_helpers;

//! Shared test utilities for the confetch test suite.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let out = render_text("{{ add(1, n) }}", json!({"n": 2})).unwrap();
//! assert_eq!(out, "3");
//! ```

use std::path::{Path, PathBuf};

use crate::funcs::Library;
use crate::render::{RenderError, render_str};
use crate::value::Value;

/// Decode a `json!` literal into a [`Value`].
pub fn data(json: serde_json::Value) -> Value {
    Value::from(json)
}

/// Render an inline template with the standard library and return it as text.
pub fn render_text(template: &str, json: serde_json::Value) -> Result<String, RenderError> {
    let bytes = render_str("inline", template, &Library::standard(), &data(json))?;
    Ok(String::from_utf8(bytes).expect("templates render UTF-8"))
}

/// Write `contents` to `dir/name` and return the full path.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

//! Template rendering.
//!
//! Templates use [MiniJinja](https://docs.rs/minijinja) syntax. Each render
//! builds a fresh environment, registers every [`Library`] function under its
//! name, and executes the template against one data root.
//!
//! ## Data binding
//!
//! When the root is a JSON object its keys become top-level variables. The
//! whole root is always reachable as `root`, which is how templates walk
//! arrays or scalars fetched at the top level:
//!
//! ```text
//! {% for svc in services %}server {{ svc.name }} {{ svc.addr }}
//! {% endfor %}# {{ root.services | length }} backends
//! ```
//!
//! ## Failure modes
//!
//! - [`RenderError::Parse`]: syntax errors, and calls to a function that is
//!   neither a helper nor an engine builtin. These are caught before a single
//!   byte is produced.
//! - [`RenderError::Exec`]: helper failures (wrong types, bad regex, division
//!   by zero) and undefined data. Undefined values are strict: `{{ port }}`
//!   or `{{ svc.missing }}` is an error, not an empty string, while
//!   `{% if port is defined %}` still works for optional keys.
//!
//! Output goes into an in-memory buffer that is dropped on error, so callers
//! never see partial output.

use crate::funcs::{FuncError, Function, Library};
use crate::value::{SharedMap, Value};
use minijinja::value::Rest;
use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior, Value as EngineValue};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

/// Name under which the whole data root is bound.
pub const ROOT_NAME: &str = "root";

/// Names the engine resolves on its own: builtin functions and loop/macro state.
const ENGINE_NAMES: &[&str] = &[
    "range", "dict", "debug", "namespace", "loop", "self", "super", "caller", "varargs", "kwargs",
];

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to read template {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse template {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to execute template {name}: {source}")]
    Exec {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

impl RenderError {
    /// The helper failure behind an [`RenderError::Exec`], if there was one.
    pub fn func_error(&self) -> Option<&FuncError> {
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            if let Some(func) = err.downcast_ref::<FuncError>() {
                return Some(func);
            }
            cause = err.source();
        }
        None
    }
}

/// Render the template at `path` against `root`.
pub fn render(path: &Path, library: &Library, root: &Value) -> Result<Vec<u8>, RenderError> {
    let source = read_template(path)?;
    render_str(&path.display().to_string(), &source, library, root)
}

/// Render template `source`; `name` only labels errors.
pub fn render_str(
    name: &str,
    source: &str,
    library: &Library,
    root: &Value,
) -> Result<Vec<u8>, RenderError> {
    let env = environment(library);
    let parse_err = |source: minijinja::Error| RenderError::Parse {
        name: name.to_string(),
        source,
    };
    let template = env.template_from_named_str(name, source).map_err(parse_err)?;

    let context = bind(root);
    check_functions(template.undeclared_variables(false), source, library, |var| {
        context.get(var).is_some()
    })
    .map_err(parse_err)?;

    let mut out = Vec::new();
    template
        .render_to_write(EngineValue::from_object(context), &mut out)
        .map_err(|source| RenderError::Exec {
            name: name.to_string(),
            source,
        })?;
    debug!(template = name, bytes = out.len(), "rendered");
    Ok(out)
}

/// Parse the template at `path` and check that every called function
/// exists, without executing it.
pub fn check(path: &Path, library: &Library) -> Result<(), RenderError> {
    let source = read_template(path)?;
    let name = path.display().to_string();
    let env = environment(library);
    let result = env
        .template_from_named_str(&name, &source)
        .and_then(|template| {
            check_functions(template.undeclared_variables(false), &source, library, |_| false)
        });
    match result {
        Ok(()) => Ok(()),
        Err(err) => Err(RenderError::Parse {
            name: name.clone(),
            source: err,
        }),
    }
}

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}").expect("tag pattern is valid")
});

static CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^.\w])([A-Za-z_]\w*)\s*\(").expect("call pattern is valid")
});

/// Identifiers used as `name(...)` inside expression or statement tags.
/// Method calls (`x.format(...)`) are not included.
fn called_names(source: &str) -> BTreeSet<String> {
    TAG.find_iter(source)
        .flat_map(|tag| CALL.captures_iter(tag.as_str()))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Fail on top-level names called as functions that nothing provides.
fn check_functions(
    undeclared: HashSet<String>,
    source: &str,
    library: &Library,
    is_bound: impl Fn(&str) -> bool,
) -> Result<(), minijinja::Error> {
    let called = called_names(source);
    let mut unknown: Vec<String> = undeclared
        .into_iter()
        .filter(|var| {
            called.contains(var)
                && !library.contains(var)
                && !ENGINE_NAMES.contains(&var.as_str())
                && !is_bound(var)
        })
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort();
    Err(minijinja::Error::new(
        ErrorKind::UnknownFunction,
        format!("undefined function(s): {}", unknown.join(", ")),
    ))
}

fn read_template(path: &Path) -> Result<String, RenderError> {
    fs::read_to_string(path).map_err(|source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn environment<'source>(library: &Library) -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    // Output is config text, never HTML, whatever the template file is called.
    env.set_auto_escape_callback(|_| AutoEscape::None);
    for function in library.iter().copied() {
        env.add_function(function.name(), move |args: Rest<EngineValue>| {
            call_bound(function, &args)
        });
    }
    env
}

/// Bridge one template call into the library and back.
fn call_bound(function: Function, args: &[EngineValue]) -> Result<EngineValue, minijinja::Error> {
    let args: Vec<Value> = args.iter().map(Value::from_engine).collect();
    match function.call(&args) {
        Ok(value) => Ok(value.to_engine()),
        Err(err) => {
            Err(minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string()).with_source(err))
        }
    }
}

/// Top-level context: the root's entries (when it is a map) plus `root` itself.
fn bind(root: &Value) -> SharedMap {
    let context = match root {
        Value::Map(map) => map.snapshot().into_iter().collect(),
        _ => SharedMap::new(),
    };
    context.insert(ROOT_NAME, root.clone());
    context
}

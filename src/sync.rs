//! One sync pass: fetch → render → commit → hooks.
//!
//! ```text
//! Fetcher::fetch ──► render::render ──► commit::commit ──► hook::run_hooks
//!   (data root)       (bytes in memory)   (changed?)         (only if changed)
//! ```
//!
//! A failure at any stage stops that template before anything is written;
//! [`run_all`] keeps going with the remaining templates.

use crate::commit::{self, CommitError};
use crate::config::{Config, TemplateConfig};
use crate::fetch::{FetchError, Fetcher, HttpFetcher};
use crate::funcs::Library;
use crate::hook::{self, HookError};
use crate::render::{self, RenderError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    Hook(#[from] HookError),
}

/// What one template pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub label: String,
    pub dest: PathBuf,
    pub changed: bool,
    /// Number of hook commands that ran.
    pub hooks: usize,
}

/// Result of one template within [`run_all`].
#[derive(Debug)]
pub struct TemplateOutcome {
    pub label: String,
    pub result: Result<SyncReport, SyncError>,
}

/// Fetch data, render `src` and commit to `dest`. Returns whether `dest` changed.
pub fn sync_template<F: Fetcher + ?Sized>(
    fetcher: &F,
    src: &Path,
    dest: &Path,
    library: &Library,
) -> Result<bool, SyncError> {
    let root = fetcher.fetch()?;
    let content = render::render(src, library, &root)?;
    Ok(commit::commit(dest, &content)?)
}

/// Sync one template with the given fetcher, running hooks on change.
pub fn run_with_fetcher<F: Fetcher + ?Sized>(
    config: &TemplateConfig,
    fetcher: &F,
    library: &Library,
) -> Result<SyncReport, SyncError> {
    let changed = sync_template(fetcher, &config.src, &config.dest, library)?;
    let hooks = if changed {
        hook::run_hooks(config.check_cmd.as_deref(), config.reload_cmd.as_deref())?
    } else {
        0
    };
    Ok(SyncReport {
        label: config.label(),
        dest: config.dest.clone(),
        changed,
        hooks,
    })
}

/// Sync one template over HTTP.
pub fn run_template(config: &TemplateConfig, library: &Library) -> Result<SyncReport, SyncError> {
    let fetcher = HttpFetcher::new(config)?;
    run_with_fetcher(config, &fetcher, library)
}

/// Sync every configured template in order.
pub fn run_all(config: &Config, library: &Library) -> Vec<TemplateOutcome> {
    config
        .templates
        .iter()
        .map(|template| {
            let label = template.label();
            let result = run_template(template, library);
            match &result {
                Ok(report) => info!(template = %label, changed = report.changed, "synced"),
                Err(err) => error!(template = %label, error = %err, "sync failed"),
            }
            TemplateOutcome { label, result }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::fetch::FileFetcher;
    use crate::test_helpers::write_file;
    use std::fs;
    use tempfile::TempDir;

    fn template_config(dir: &Path, extra: &str) -> TemplateConfig {
        let text = format!(
            "[[template]]\nurls = [\"http://127.0.0.1:1/\"]\ntimeout = 1\n\
             src = {:?}\ndest = {:?}\n{extra}",
            dir.join("t.j2").display().to_string(),
            dir.join("out.cfg").display().to_string(),
        );
        parse_config(&text).unwrap().templates.remove(0)
    }

    #[test]
    fn sync_writes_then_reports_unchanged() {
        let tmp = TempDir::new().unwrap();
        let src = write_file(tmp.path(), "t.j2", "port={{ port }}\n");
        let data = write_file(tmp.path(), "data.json", r#"{"port": 80}"#);
        let dest = tmp.path().join("out.cfg");
        let fetcher = FileFetcher::new(&data);
        let library = Library::standard();

        assert!(sync_template(&fetcher, &src, &dest, &library).unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "port=80\n");
        assert!(!sync_template(&fetcher, &src, &dest, &library).unwrap());

        fs::write(&data, r#"{"port": 81}"#).unwrap();
        assert!(sync_template(&fetcher, &src, &dest, &library).unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "port=81\n");
    }

    #[test]
    fn render_failure_leaves_destination_untouched() {
        let tmp = TempDir::new().unwrap();
        let src = write_file(tmp.path(), "t.j2", "{{ div(1, 0) }}");
        let data = write_file(tmp.path(), "data.json", "{}");
        let dest = write_file(tmp.path(), "out.cfg", "previous");
        let result = sync_template(&FileFetcher::new(&data), &src, &dest, &Library::standard());
        assert!(matches!(result, Err(SyncError::Render(RenderError::Exec { .. }))));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "previous");
    }

    #[test]
    fn fetch_failure_is_reported() {
        let tmp = TempDir::new().unwrap();
        let src = write_file(tmp.path(), "t.j2", "x");
        let dest = tmp.path().join("out.cfg");
        let result = sync_template(
            &FileFetcher::new(tmp.path().join("missing.json")),
            &src,
            &dest,
            &Library::standard(),
        );
        assert!(matches!(result, Err(SyncError::Fetch(_))));
        assert!(!dest.exists());
    }

    #[cfg(unix)]
    #[test]
    fn hooks_run_only_on_change() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "t.j2", "{{ name }}");
        let data = write_file(tmp.path(), "data.json", r#"{"name": "a"}"#);
        let log = tmp.path().join("hooks.log");
        let config = template_config(
            tmp.path(),
            &format!("reload_cmd = \"echo reload >> {}\"\n", log.display()),
        );
        let fetcher = FileFetcher::new(&data);
        let library = Library::standard();

        let first = run_with_fetcher(&config, &fetcher, &library).unwrap();
        assert!(first.changed);
        assert_eq!(first.hooks, 1);
        assert_eq!(first.label, "out.cfg");

        let second = run_with_fetcher(&config, &fetcher, &library).unwrap();
        assert!(!second.changed);
        assert_eq!(second.hooks, 0);
        assert_eq!(fs::read_to_string(&log).unwrap(), "reload\n");
    }

    #[cfg(unix)]
    #[test]
    fn failing_check_is_hook_error_after_write() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "t.j2", "v");
        let data = write_file(tmp.path(), "data.json", "{}");
        let config = template_config(tmp.path(), "check_cmd = \"false\"\nreload_cmd = \"true\"\n");
        let result = run_with_fetcher(&config, &FileFetcher::new(&data), &Library::standard());
        assert!(matches!(result, Err(SyncError::Hook(HookError::Failed { .. }))));
        assert_eq!(fs::read_to_string(tmp.path().join("out.cfg")).unwrap(), "v");
    }

    #[test]
    fn run_all_continues_after_failure() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "t.j2", "v");
        let mut config = parse_config(
            "[[template]]\nname = \"first\"\nurls = [\"http://127.0.0.1:1/\"]\n\
             timeout = 1\nsrc = \"a\"\ndest = \"b\"\n\
             [[template]]\nname = \"second\"\nurls = [\"http://127.0.0.1:1/\"]\n\
             timeout = 1\nsrc = \"a\"\ndest = \"b\"\n",
        )
        .unwrap();
        for template in &mut config.templates {
            template.dest = tmp.path().join("out.cfg");
        }
        let outcomes = run_all(&config, &Library::standard());
        let labels: Vec<_> = outcomes.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["first", "second"]);
        assert!(
            outcomes
                .iter()
                .all(|o| matches!(o.result, Err(SyncError::Fetch(FetchError::AllFailed { .. }))))
        );
    }
}

//! End-to-end render + commit through the public API.
//!
//! Drives the same path `confetch run` takes after a successful fetch, using
//! the checked-in fixtures as the JSON response and template.

use confetch::commit;
use confetch::fetch::{FileFetcher, Fetcher};
use confetch::funcs::Library;
use confetch::render;
use confetch::sync::sync_template;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

#[test]
fn renders_fixture_to_expected_output() {
    let root = FileFetcher::new(fixture("services.json")).fetch().unwrap();
    let rendered = render::render(&fixture("haproxy.cfg.j2"), &Library::standard(), &root).unwrap();
    let expected = fs::read_to_string(fixture("haproxy.cfg.expected")).unwrap();
    assert_eq!(String::from_utf8(rendered).unwrap(), expected);
}

#[test]
fn commit_is_idempotent_for_same_render() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("haproxy.cfg");
    let fetcher = FileFetcher::new(fixture("services.json"));
    let library = Library::standard();

    assert!(sync_template(&fetcher, &fixture("haproxy.cfg.j2"), &dest, &library).unwrap());
    assert!(!sync_template(&fetcher, &fixture("haproxy.cfg.j2"), &dest, &library).unwrap());
    assert_eq!(
        fs::read_to_string(&dest).unwrap(),
        fs::read_to_string(fixture("haproxy.cfg.expected")).unwrap()
    );
}

#[test]
fn changed_data_rewrites_destination() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("haproxy.cfg");
    let data = tmp.path().join("services.json");
    let library = Library::standard();
    let template = fixture("haproxy.cfg.j2");

    fs::copy(fixture("services.json"), &data).unwrap();
    assert!(sync_template(&FileFetcher::new(&data), &template, &dest, &library).unwrap());

    let updated = fs::read_to_string(&data)
        .unwrap()
        .replace("10.0.0.12", "10.0.0.99");
    fs::write(&data, updated).unwrap();
    assert!(sync_template(&FileFetcher::new(&data), &template, &dest, &library).unwrap());
    assert!(fs::read_to_string(&dest).unwrap().contains("10.0.0.99:9000"));
}

#[test]
fn broken_template_never_touches_destination() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("haproxy.cfg");
    fs::write(&dest, "known good\n").unwrap();
    let template = tmp.path().join("broken.j2");
    fs::write(&template, "{{ missingHelper(domain) }}").unwrap();

    let result = sync_template(
        &FileFetcher::new(fixture("services.json")),
        &template,
        &dest,
        &Library::standard(),
    );
    assert!(result.is_err());
    assert_eq!(fs::read_to_string(&dest).unwrap(), "known good\n");
}

#[test]
fn plan_matches_commit_decision() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("out");
    assert!(commit::plan(&dest, b"a").unwrap().changed());
    commit::commit(&dest, b"a").unwrap();
    assert!(!commit::plan(&dest, b"a").unwrap().changed());
    assert!(commit::plan(&dest, b"b").unwrap().changed());
}

//! Scheduler configurations and requests shared by the integration tests.

use depchain_core::pending::BuildRequest;
use depchain_core::sourcestamp::NewSourceStamp;

/// `test` depends on `compile`, which depends on `update`; commits to `main`
/// fan out to `test`.
pub const CHAIN_CONFIG: &str = r#"
propagated_properties: [got_revision]
schedulers:
  - kind: chain
    name: update
    builder: Update-Scripts
  - kind: chain
    name: compile
    builder: Build-Compile
    dependencies: [update]
  - kind: chain
    name: test
    builder: Test-Unit
    dependencies: [compile]
    properties:
      suite: unit
  - kind: per_commit
    name: main-commits
    branches: [main]
    targets: [test]
"#;

/// A single chain scheduler with no dependencies.
pub const SINGLE_CONFIG: &str = r#"
schedulers:
  - kind: chain
    name: lint
    builder: Lint
"#;

pub struct StampFixture;

impl StampFixture {
    pub fn main(revision: &str) -> NewSourceStamp {
        NewSourceStamp::new("main", revision)
    }

    pub fn branch(branch: &str, revision: &str) -> NewSourceStamp {
        NewSourceStamp::new(branch, revision)
    }
}

pub struct RequestFixture;

impl RequestFixture {
    pub fn manual() -> BuildRequest {
        BuildRequest::new("manual")
    }

    pub fn with_revision(revision: &str) -> BuildRequest {
        BuildRequest::new("manual").with_property("got_revision", revision)
    }
}

//! Postgres store integration tests.
//!
//! Run with: `cargo test -p depchain-tests --test database_tests --features integration`

#![cfg(feature = "integration")]

use chrono::{Duration, Utc};
use depchain_core::Error;
use depchain_core::buildset::BuildResult;
use depchain_core::ids::{BuildsetId, SourceStampId};
use depchain_core::ports::{
    BuildExecutor, BuildsetCompleter, BuildsetStore, PendingRequestStore, SourceStampRepository,
};
use depchain_core::properties::{Properties, SCHEDULER_PROPERTY, SOURCE_SCHEDULER};
use depchain_tests::{RequestFixture, StampFixture, context::TestContext};
use serde_json::json;

#[tokio::test]
async fn test_source_stamp_latest_per_branch() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let repo = ctx.db.source_stamps();

    let first = repo.create(&StampFixture::main("aaa")).await.unwrap();
    let feature = repo
        .create(&StampFixture::branch("feature", "bbb"))
        .await
        .unwrap();
    let second = repo.create(&StampFixture::main("ccc")).await.unwrap();

    assert!(second.id > first.id);
    assert_eq!(repo.latest(Some("main")).await.unwrap().unwrap().id, second.id);
    assert_eq!(repo.latest(Some("feature")).await.unwrap().unwrap().id, feature.id);
    assert_eq!(repo.latest(None).await.unwrap().unwrap().id, second.id);
    assert!(repo.latest(Some("missing")).await.unwrap().is_none());
    assert_eq!(
        repo.get(first.id).await.unwrap().unwrap().revision.as_deref(),
        Some("aaa")
    );
}

#[tokio::test]
async fn test_admit_and_complete_buildset() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let stamp = ctx
        .db
        .source_stamps()
        .create(&StampFixture::main("abc"))
        .await
        .unwrap();
    let repo = ctx.db.buildsets();

    let mut properties = Properties::new();
    properties.set(SCHEDULER_PROPERTY, "compile", SOURCE_SCHEDULER);
    properties.set("got_revision", "abc", "Build");

    let buildset = repo
        .admit_buildset(stamp.id, "Build-Compile", "manual", Some("ext-1"), &properties)
        .await
        .expect("Failed to admit buildset");
    assert!(!buildset.complete);
    assert_eq!(buildset.external_id.as_deref(), Some("ext-1"));

    let stored = repo.get_buildset_properties(buildset.id).await.unwrap();
    assert_eq!(stored, properties);

    let completed = repo
        .complete_buildset(buildset.id, BuildResult::Warnings)
        .await
        .unwrap();
    assert!(completed.complete);
    assert_eq!(completed.result, Some(BuildResult::Warnings));
    assert!(completed.is_satisfied());

    let again = repo.complete_buildset(buildset.id, BuildResult::Failure).await;
    assert!(matches!(again, Err(Error::BuildsetAlreadyComplete(_))));

    let missing = repo.complete_buildset(BuildsetId::new(9999), BuildResult::Success).await;
    assert!(matches!(missing, Err(Error::BuildsetNotFound(_))));

    let all = repo.get_buildsets_for_source_stamp(stamp.id).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(repo
        .get_buildsets_for_source_stamp(SourceStampId::new(9999))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_pending_requests_are_deduplicated() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let stamp = ctx
        .db
        .source_stamps()
        .create(&StampFixture::main("abc"))
        .await
        .unwrap();
    let repo = ctx.db.pending();
    let deps = vec!["compile".to_string()];

    let first = repo
        .add_pending_request(stamp.id, "test", &deps, &RequestFixture::with_revision("abc"))
        .await
        .unwrap();
    let duplicate = repo
        .add_pending_request(stamp.id, "test", &deps, &RequestFixture::with_revision("abc"))
        .await
        .unwrap();
    let other = repo
        .add_pending_request(stamp.id, "test", &deps, &RequestFixture::manual())
        .await
        .unwrap();

    assert_eq!(first.id, duplicate.id);
    assert_ne!(first.id, other.id);

    let pending = repo.get_pending_requests(stamp.id, "test").await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, first.id);
    assert_eq!(pending[0].dependencies, deps);
    assert_eq!(pending[0].properties["got_revision"], json!("abc"));

    assert_eq!(repo.list_pending_requests("test").await.unwrap().len(), 2);
    assert!(repo.list_pending_requests("compile").await.unwrap().is_empty());

    assert_eq!(repo.cancel_pending_requests(stamp.id, "test").await.unwrap(), 2);
    assert!(repo.get_pending_requests(stamp.id, "test").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expire_pending_requests() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let stamp = ctx
        .db
        .source_stamps()
        .create(&StampFixture::main("abc"))
        .await
        .unwrap();
    let repo = ctx.db.pending();

    repo.add_pending_request(stamp.id, "test", &[], &RequestFixture::manual())
        .await
        .unwrap();

    let kept = repo
        .expire_pending_requests("test", Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(kept, 0);

    let expired = repo
        .expire_pending_requests("test", Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(expired, 1);
    assert!(repo.list_pending_requests("test").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_single_pending_request() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let stamp = ctx
        .db
        .source_stamps()
        .create(&StampFixture::main("abc"))
        .await
        .unwrap();
    let repo = ctx.db.pending();

    let first = repo
        .add_pending_request(stamp.id, "test", &[], &RequestFixture::with_revision("abc"))
        .await
        .unwrap();
    let second = repo
        .add_pending_request(stamp.id, "test", &[], &RequestFixture::manual())
        .await
        .unwrap();

    assert!(repo.delete_pending_request(first.id).await.unwrap());
    assert!(!repo.delete_pending_request(first.id).await.unwrap());

    let left = repo.get_pending_requests(stamp.id, "test").await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, second.id);
}

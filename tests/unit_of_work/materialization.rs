//! Interceptor normalization and data filters

use crate::*;
use chrono::NaiveDate;
use unitwork::memory::testing::Operation;
use unitwork::memory::IS_DELETED_FIELD;
use unitwork::{
    ChangeTracker, EntityRef, EntryState, Timestamp, UowError, Value, MAY_HAVE_TENANT,
    MUST_HAVE_TENANT, SOFT_DELETE, TENANT_ID_PARAM,
};

fn published(kind: TimestampKind) -> Timestamp {
    let value = NaiveDate::from_ymd_opt(2024, 5, 17)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap();
    Timestamp::new(value, kind)
}

fn seed(backend: &MemoryBackend) {
    backend.database("blogs").insert(
        EntityRecord::new("Post")
            .with_id("p1")
            .with_field("title", "hello")
            .with_field("published_at", published(TimestampKind::Unspecified)),
    );
}

fn stored_kind(backend: &MemoryBackend) -> Option<TimestampKind> {
    backend
        .database("blogs")
        .get("Post", "p1")
        .and_then(|p| p.field("published_at").and_then(Value::as_timestamp).map(|t| t.kind))
}

#[test]
fn test_loaded_timestamps_are_normalized_without_dirtying() {
    let backend = MemoryBackend::new();
    seed(&backend);
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    let blogs = scope.context::<Blogs>().unwrap();

    let (kind, pending) = blogs
        .with(|ctx: &mut MemoryContext| {
            let post = ctx.find("Post", "p1").unwrap().unwrap();
            let kind = post
                .field("published_at")
                .and_then(Value::as_timestamp)
                .map(|t| t.kind);
            (kind, ctx.pending_count())
        })
        .unwrap();
    assert_eq!(kind, Some(TimestampKind::Utc));
    assert_eq!(pending, 0);

    scope.complete().unwrap();
    scope.dispose().unwrap();

    assert!(backend
        .journal()
        .operations()
        .contains(&Operation::Saved { context: BLOGS.into(), writes: 0 }));
    assert_eq!(stored_kind(&backend), Some(TimestampKind::Unspecified));
}

#[test]
fn test_nan_row_read_in_scope_is_not_written_back() {
    let backend = MemoryBackend::new();
    backend.database("blogs").insert(
        EntityRecord::new("Post")
            .with_id("p1")
            .with_field("score", f64::NAN)
            .with_field("published_at", published(TimestampKind::Unspecified)),
    );
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    let blogs = scope.context::<Blogs>().unwrap();

    let state = blogs
        .with(|ctx: &mut MemoryContext| {
            ctx.find("Post", "p1").unwrap();
            ctx.entry_state(&EntityRef::new("Post", "p1"))
        })
        .unwrap();
    assert_eq!(state, EntryState::Unchanged);

    scope.save_changes().unwrap();
    assert_eq!(
        backend.journal().operations(),
        vec![
            Operation::ContextCreated { context: BLOGS.into() },
            Operation::Saved { context: BLOGS.into(), writes: 0 },
        ]
    );
    scope.dispose().unwrap();
}

#[test]
fn test_user_edit_after_load_is_still_tracked() {
    let backend = MemoryBackend::new();
    seed(&backend);
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    let blogs = scope.context::<Blogs>().unwrap();

    blogs
        .with(|ctx: &mut MemoryContext| {
            let mut post = ctx.query("Post").unwrap().remove(0);
            post.set_field("title", "edited");
            ctx.update(post).unwrap();
        })
        .unwrap();

    scope.complete().unwrap();
    scope.dispose().unwrap();

    let stored = backend.database("blogs").get("Post", "p1").unwrap();
    assert_eq!(stored.field("title").and_then(Value::as_str), Some("edited"));
    // The edit carries the normalized timestamp along with it.
    assert_eq!(stored_kind(&backend), Some(TimestampKind::Utc));
}

#[test]
fn test_without_interceptor_timestamps_are_untouched() {
    let backend = MemoryBackend::new();
    seed(&backend);
    let services = UnitOfWorkServices::builder(Arc::new(backend.clone()))
        .resolver(DefaultConnectionStringResolver::new().with_type::<Blogs>("Data Source=blogs"))
        .build();
    let mut scope = UnitOfWorkScope::new(services);
    scope.begin(UnitOfWorkOptions::non_transactional()).unwrap();

    let (hooked, kind) = scope
        .context::<Blogs>()
        .unwrap()
        .with(|ctx: &mut MemoryContext| {
            let post = ctx.find("Post", "p1").unwrap().unwrap();
            (
                ctx.has_materialization_hook(),
                post.field("published_at")
                    .and_then(Value::as_timestamp)
                    .map(|t| t.kind),
            )
        })
        .unwrap();
    assert!(!hooked);
    assert_eq!(kind, Some(TimestampKind::Unspecified));
    scope.dispose().unwrap();
}

// ============================================================================
// Data filters
// ============================================================================

fn seed_posts(backend: &MemoryBackend) {
    let db = backend.database("blogs");
    db.insert(EntityRecord::new("Post").with_id("live"));
    db.insert(
        EntityRecord::new("Post")
            .with_id("gone")
            .with_field(IS_DELETED_FIELD, true),
    );
    db.insert(
        EntityRecord::new("Post")
            .with_id("acme")
            .with_field(TENANT_ID_PARAM, "acme"),
    );
    db.insert(
        EntityRecord::new("Post")
            .with_id("globex")
            .with_field(TENANT_ID_PARAM, "globex"),
    );
}

fn visible_posts(handle: &ContextHandle) -> Vec<String> {
    handle
        .with(|ctx: &mut MemoryContext| {
            ctx.query("Post")
                .unwrap()
                .into_iter()
                .filter_map(|p| p.id)
                .collect()
        })
        .unwrap()
}

#[test]
fn test_default_filters_hide_deleted_and_tenant_rows() {
    let backend = MemoryBackend::new();
    seed_posts(&backend);
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    let blogs = scope.context::<Blogs>().unwrap();
    assert_eq!(visible_posts(&blogs), vec!["live"]);
    scope.dispose().unwrap();
}

#[test]
fn test_filter_changes_reach_existing_contexts() {
    let backend = MemoryBackend::new();
    seed_posts(&backend);
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    let blogs = scope.context::<Blogs>().unwrap();

    scope.disable_filter(SOFT_DELETE).unwrap();
    assert_eq!(visible_posts(&blogs), vec!["gone", "live"]);

    scope
        .set_filter_parameter(MAY_HAVE_TENANT, TENANT_ID_PARAM, Value::from("acme"))
        .unwrap();
    assert_eq!(visible_posts(&blogs), vec!["acme", "gone", "live"]);

    scope
        .set_filter_parameter(MUST_HAVE_TENANT, TENANT_ID_PARAM, Value::from("acme"))
        .unwrap();
    assert_eq!(visible_posts(&blogs), vec!["acme"]);
    scope.dispose().unwrap();
}

#[test]
fn test_filter_state_applies_to_new_contexts() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    scope.disable_filter(SOFT_DELETE).unwrap();
    let orders = scope.context::<Orders>().unwrap();
    let enabled = orders
        .with(|ctx: &mut MemoryContext| ctx.filter(SOFT_DELETE).map(|f| f.enabled))
        .unwrap();
    assert_eq!(enabled, Some(false));
    assert!(matches!(
        scope.set_filter_parameter("Nope", TENANT_ID_PARAM, Value::Null),
        Err(UowError::InvalidOperation(_))
    ));
    scope.dispose().unwrap();
}

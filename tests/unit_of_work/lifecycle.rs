//! Begin, complete, dispose and fault handling

use crate::*;
use proptest::prelude::*;
use unitwork::memory::testing::Operation;
use unitwork::{BackendError, ScopeState, UowError};

#[test]
fn test_non_transactional_flush_and_release_order() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());

    let blogs = scope.context::<Blogs>().unwrap();
    let orders = scope.context::<Orders>().unwrap();
    add(&blogs, "Post", "p1");
    add(&orders, "Order", "o1");

    scope.save_changes().unwrap();
    assert_eq!(backend.journal().saves(), vec![BLOGS, ORDERS]);
    assert_eq!(backend.database("blogs").count("Post"), 1);
    assert_eq!(backend.database("orders").count("Order"), 1);

    scope.dispose().unwrap();
    assert_eq!(backend.journal().releases(), vec![BLOGS, ORDERS]);
    assert_eq!(backend.journal().begins(), 0);
    assert!(blogs.is_released());
    assert!(orders.is_released());
}

#[test]
fn test_flush_failure_stops_later_contexts_and_commit() {
    let backend = MemoryBackend::new();
    backend
        .faults()
        .fail_save("Blogs", BackendError::failed("constraint violated"));
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());

    let blogs = scope.context::<Blogs>().unwrap();
    let orders = scope.context::<Orders>().unwrap();
    add(&blogs, "Post", "p1");
    add(&orders, "Order", "o1");

    match scope.complete() {
        Err(UowError::Flush { key, .. }) => assert_eq!(key.to_string(), BLOGS),
        other => panic!("expected flush error, got {:?}", other),
    }
    assert!(backend.journal().saves().is_empty());
    assert_eq!(backend.journal().commit_attempts(), 0);
    assert_eq!(scope.state(), ScopeState::Faulted);

    scope.dispose().unwrap();
    assert_eq!(backend.journal().rollbacks(), 1);
    assert_eq!(backend.journal().releases(), vec![BLOGS, ORDERS]);
    assert_eq!(backend.database("orders").count("Order"), 0);
}

#[test]
fn test_save_failure_then_complete_never_commits() {
    let backend = MemoryBackend::new();
    backend
        .faults()
        .fail_save("orders", BackendError::failed("deadlock"));
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    let blogs = scope.context::<Blogs>().unwrap();
    scope.context::<Orders>().unwrap();
    add(&blogs, "Post", "p1");

    assert!(scope.save_changes().unwrap_err().is_flush());
    assert_eq!(backend.journal().saves(), vec![BLOGS]);
    assert!(scope.complete().is_err());
    assert_eq!(backend.journal().commit_attempts(), 0);
    scope.dispose().unwrap();
    assert_eq!(backend.database("blogs").count("Post"), 0);
}

#[test]
fn test_commit_failure_still_disposable() {
    let backend = MemoryBackend::new();
    backend
        .faults()
        .fail_commit(BackendError::failed("coordinator lost"));
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    let blogs = scope.context::<Blogs>().unwrap();
    add(&blogs, "Post", "p1");

    let err = scope.complete().unwrap_err();
    assert!(err.is_commit());
    assert_eq!(backend.journal().saves(), vec![BLOGS]);
    assert_eq!(backend.journal().commit_attempts(), 1);
    assert_eq!(scope.state(), ScopeState::Faulted);

    scope.dispose().unwrap();
    assert_eq!(backend.journal().rollbacks(), 1);
    assert_eq!(backend.journal().releases(), vec![BLOGS]);
    assert_eq!(backend.database("blogs").count("Post"), 0);
}

#[test]
fn test_dispose_after_complete_does_not_commit_again() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    add(&scope.context::<Blogs>().unwrap(), "Post", "p1");

    scope.complete().unwrap();
    assert_eq!(scope.state(), ScopeState::Completed);
    scope.dispose().unwrap();
    scope.dispose().unwrap();

    let journal = backend.journal();
    assert_eq!(journal.commit_attempts(), 1);
    assert_eq!(journal.commits(), 1);
    assert_eq!(journal.rollbacks(), 0);
    assert_eq!(journal.transaction_disposals(), 1);
    assert_eq!(journal.releases(), vec![BLOGS]);
}

#[test]
fn test_disposal_is_best_effort() {
    let backend = MemoryBackend::new();
    backend
        .faults()
        .fail_release("Blogs", BackendError::failed("connection reset"));
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    scope.context::<Blogs>().unwrap();
    scope.context::<Orders>().unwrap();

    let err = scope.dispose().unwrap_err();
    match err {
        UowError::Disposal(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].resource, BLOGS);
        }
        other => panic!("expected disposal error, got {:?}", other),
    }
    assert_eq!(backend.journal().releases(), vec![ORDERS]);
    assert!(scope.dispose().is_ok());
}

#[test]
fn test_transaction_dispose_failure_still_releases_contexts() {
    let backend = MemoryBackend::new();
    backend
        .faults()
        .fail_transaction_dispose(BackendError::failed("log unavailable"));
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    scope.context::<Blogs>().unwrap();
    scope.context::<Orders>().unwrap();

    assert!(matches!(scope.dispose(), Err(UowError::Disposal(f)) if f.len() == 1));
    assert_eq!(backend.journal().releases(), vec![BLOGS, ORDERS]);
}

#[test]
fn test_context_in_use_at_dispose_is_released_later() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    let blogs = scope.context::<Blogs>().unwrap();
    scope.context::<Orders>().unwrap();

    let guard = blogs.try_lock().unwrap();
    assert!(matches!(scope.dispose(), Err(UowError::Disposal(f)) if f.len() == 1));
    assert!(!blogs.is_released());
    drop(guard);

    scope.dispose().unwrap();
    assert!(blogs.is_released());
    assert_eq!(backend.journal().releases(), vec![ORDERS, BLOGS]);
    scope.dispose().unwrap();
    assert_eq!(backend.journal().releases().len(), 2);
}

#[test]
fn test_begin_rules() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    assert!(matches!(
        scope.begin(UnitOfWorkOptions::new()),
        Err(UowError::DuplicateBegin { .. })
    ));
    scope.dispose().unwrap();
    assert!(matches!(
        scope.begin(UnitOfWorkOptions::new()),
        Err(UowError::InvalidOperation(_))
    ));
}

#[test]
fn test_operations_after_dispose_fail() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    scope.dispose().unwrap();
    assert!(matches!(scope.context::<Blogs>(), Err(UowError::InvalidOperation(_))));
    assert!(matches!(scope.save_changes(), Err(UowError::InvalidOperation(_))));
    assert!(matches!(scope.complete(), Err(UowError::InvalidOperation(_))));
}

#[test]
fn test_unresolvable_connection_string() {
    struct Unmapped;
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    assert!(matches!(
        scope.context::<Unmapped>(),
        Err(UowError::Configuration(_))
    ));
    assert_eq!(scope.context_count(), 0);
    assert!(backend.journal().created().is_empty());
    scope.complete().unwrap();
    scope.dispose().unwrap();
}

#[test]
fn test_create_failure_leaves_scope_usable() {
    let backend = MemoryBackend::new();
    backend
        .faults()
        .fail_create("Orders", BackendError::failed("server unreachable"));
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    add(&scope.context::<Blogs>().unwrap(), "Post", "p1");
    assert!(matches!(
        scope.context::<Orders>(),
        Err(UowError::ContextCreation { .. })
    ));
    scope.complete().unwrap();
    scope.dispose().unwrap();
    assert_eq!(backend.database("blogs").count("Post"), 1);
}

// ============================================================================
// Dispose idempotency
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    Touch(bool),
    Insert(bool, u8),
    Save,
    Complete,
    Dispose,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<bool>().prop_map(Step::Touch),
        (any::<bool>(), any::<u8>()).prop_map(|(b, id)| Step::Insert(b, id)),
        Just(Step::Save),
        Just(Step::Complete),
        Just(Step::Dispose),
    ]
}

proptest! {
    #[test]
    fn prop_every_context_released_once(
        transactional in any::<bool>(),
        steps in proptest::collection::vec(step(), 0..12),
    ) {
        let backend = MemoryBackend::new();
        let options = if transactional {
            UnitOfWorkOptions::transactional()
        } else {
            UnitOfWorkOptions::non_transactional()
        };
        let mut scope = begun(&backend, options);

        for step in steps {
            // Errors are part of the explored space; only teardown is checked.
            let _ = match step {
                Step::Touch(blogs) => {
                    if blogs { scope.context::<Blogs>().map(|_| ()) } else { scope.context::<Orders>().map(|_| ()) }
                }
                Step::Insert(blogs, id) => {
                    let handle = if blogs { scope.context::<Blogs>() } else { scope.context::<Orders>() };
                    handle.map(|h| {
                        let _ = h.with(|ctx: &mut MemoryContext| ctx.add(EntityRecord::new("Row").with_id(id.to_string())));
                    })
                }
                Step::Save => scope.save_changes(),
                Step::Complete => scope.complete(),
                Step::Dispose => scope.dispose(),
            };
        }

        let created = backend.journal().created();
        prop_assert!(scope.dispose().is_ok());
        prop_assert!(scope.dispose().is_ok());

        let mut released = backend.journal().releases();
        let mut expected = created.clone();
        released.sort();
        expected.sort();
        prop_assert_eq!(released, expected);

        let journal = backend.journal();
        prop_assert!(journal.commit_attempts() <= 1);
        prop_assert!(journal.transaction_disposals() <= 1);
        prop_assert!(journal.rollbacks() + journal.commits() <= 1);
        let disposals = journal.count(|op| matches!(op, Operation::TransactionDisposed { .. }));
        prop_assert_eq!(disposals, if transactional { 1 } else { 0 });
    }
}

//! Ambient transaction staging, commit and rollback

use crate::*;
use std::time::Duration;
use unitwork::memory::testing::Operation;
use unitwork::{BackendError, BackendErrorKind, TransactionStatus, UowError};

fn transaction_of(handle: &ContextHandle) -> Option<u64> {
    handle
        .with(|ctx: &mut MemoryContext| ctx.transaction_id())
        .unwrap()
}

#[test]
fn test_writes_invisible_until_commit() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    let blogs = scope.context::<Blogs>().unwrap();
    let orders = scope.context::<Orders>().unwrap();
    add(&blogs, "Post", "p1");
    add(&orders, "Order", "o1");

    scope.save_changes().unwrap();
    assert_eq!(backend.database("blogs").count("Post"), 0);
    assert_eq!(backend.database("orders").count("Order"), 0);

    scope.complete().unwrap();
    assert_eq!(scope.transaction_status(), Some(TransactionStatus::Committed));
    assert_eq!(backend.database("blogs").count("Post"), 1);
    assert_eq!(backend.database("orders").count("Order"), 1);
    scope.dispose().unwrap();
}

#[test]
fn test_all_contexts_share_one_transaction() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    let blogs = scope.context::<Blogs>().unwrap();
    let orders = scope.context::<Orders>().unwrap();

    let txn = transaction_of(&blogs);
    assert!(txn.is_some());
    assert_eq!(transaction_of(&orders), txn);
    assert_eq!(backend.journal().enlisted(), vec![BLOGS, ORDERS]);
    scope.dispose().unwrap();
}

#[test]
fn test_non_transactional_contexts_are_independent() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());
    let blogs = scope.context::<Blogs>().unwrap();
    assert_eq!(transaction_of(&blogs), None);
    assert!(!scope.is_transactional());
    assert_eq!(scope.transaction_status(), None);
    scope.dispose().unwrap();
}

#[test]
fn test_dispose_without_complete_rolls_back() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    add(&scope.context::<Blogs>().unwrap(), "Post", "p1");
    scope.save_changes().unwrap();
    scope.dispose().unwrap();

    assert_eq!(backend.database("blogs").count("Post"), 0);
    assert_eq!(backend.journal().rollbacks(), 1);
    assert_eq!(backend.journal().commit_attempts(), 0);
}

#[test]
fn test_journal_order_for_transactional_complete() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
    add(&scope.context::<Blogs>().unwrap(), "Post", "p1");
    scope.complete().unwrap();
    scope.dispose().unwrap();

    let ops = backend.journal().operations();
    let txn = match ops.first() {
        Some(Operation::TransactionBegun { txn }) => *txn,
        other => panic!("expected transaction begin first, got {:?}", other),
    };
    assert_eq!(
        ops,
        vec![
            Operation::TransactionBegun { txn },
            Operation::ContextCreated { context: BLOGS.into() },
            Operation::Enlisted { txn, context: BLOGS.into() },
            Operation::Saved { context: BLOGS.into(), writes: 1 },
            Operation::CommitAttempted { txn },
            Operation::Committed { txn, writes: 1 },
            Operation::TransactionDisposed { txn },
            Operation::ContextReleased { context: BLOGS.into() },
        ]
    );
}

#[test]
fn test_enlist_failure_releases_context() {
    let backend = MemoryBackend::new();
    backend
        .faults()
        .fail_enlist(BackendError::failed("distributed transactions disabled"));
    let mut scope = begun(&backend, UnitOfWorkOptions::transactional());

    assert!(matches!(
        scope.context::<Blogs>(),
        Err(UowError::Transaction { .. })
    ));
    assert_eq!(scope.context_count(), 0);
    assert_eq!(backend.journal().created(), vec![BLOGS]);
    assert_eq!(backend.journal().releases(), vec![BLOGS]);
    scope.dispose().unwrap();
    assert_eq!(backend.journal().releases(), vec![BLOGS]);
}

#[test]
fn test_commit_after_transaction_timeout() {
    let backend = MemoryBackend::new();
    let mut scope = begun(
        &backend,
        UnitOfWorkOptions::transactional().with_timeout(Duration::from_millis(5)),
    );
    add(&scope.context::<Blogs>().unwrap(), "Post", "p1");
    std::thread::sleep(Duration::from_millis(50));

    match scope.complete() {
        Err(UowError::Commit { source }) => assert_eq!(source.kind, BackendErrorKind::Timeout),
        other => panic!("expected commit timeout, got {:?}", other),
    }
    scope.dispose().unwrap();
    assert_eq!(backend.database("blogs").count("Post"), 0);
}

#[test]
fn test_begin_failure_keeps_scope_unbegun() {
    let backend = MemoryBackend::new();
    backend
        .faults()
        .fail_begin(BackendError::failed("too many transactions"));
    let mut scope = UnitOfWorkScope::new(services(&backend));
    assert!(matches!(
        scope.begin(UnitOfWorkOptions::transactional()),
        Err(UowError::Transaction { .. })
    ));

    backend.faults().clear();
    scope.begin(UnitOfWorkOptions::transactional()).unwrap();
    scope.complete().unwrap();
    scope.dispose().unwrap();
    assert_eq!(backend.journal().commits(), 1);
}

//! Operation journal
//!
//! Every context and transaction created by one `MemoryBackend` records what
//! it does here, in order. Tests assert on the sequence to check flush order,
//! release order and that commit was or was not attempted.
//!
//! # Example
//!
//! ```ignore
//! let journal = backend.journal();
//! assert_eq!(journal.saves(), vec!["A#Data Source=a", "B#Data Source=b"]);
//! assert_eq!(journal.commit_attempts(), 0);
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

/// Operation recorded by the memory backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Context opened
    ContextCreated {
        /// Context key
        context: String,
    },
    /// Context flushed
    Saved {
        /// Context key
        context: String,
        /// Rows written or staged
        writes: usize,
    },
    /// Context released
    ContextReleased {
        /// Context key
        context: String,
    },
    /// Ambient transaction begun
    TransactionBegun {
        /// Transaction id
        txn: u64,
    },
    /// Context enlisted in a transaction
    Enlisted {
        /// Transaction id
        txn: u64,
        /// Context key
        context: String,
    },
    /// Commit requested
    CommitAttempted {
        /// Transaction id
        txn: u64,
    },
    /// Staged writes applied
    Committed {
        /// Transaction id
        txn: u64,
        /// Rows applied
        writes: usize,
    },
    /// Staged writes discarded
    RolledBack {
        /// Transaction id
        txn: u64,
    },
    /// Transaction disposed
    TransactionDisposed {
        /// Transaction id
        txn: u64,
    },
}

/// Shared, ordered log of backend operations
#[derive(Debug, Clone, Default)]
pub struct OperationJournal {
    ops: Arc<Mutex<Vec<Operation>>>,
}

impl OperationJournal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation
    pub fn record(&self, op: Operation) {
        self.ops.lock().push(op);
    }

    /// Copy of every recorded operation
    pub fn operations(&self) -> Vec<Operation> {
        self.ops.lock().clone()
    }

    /// Number of recorded operations
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Forget every recorded operation
    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    /// Context keys in creation order
    pub fn created(&self) -> Vec<String> {
        self.collect(|op| match op {
            Operation::ContextCreated { context } => Some(context.clone()),
            _ => None,
        })
    }

    /// Context keys in flush order
    pub fn saves(&self) -> Vec<String> {
        self.collect(|op| match op {
            Operation::Saved { context, .. } => Some(context.clone()),
            _ => None,
        })
    }

    /// Context keys in release order
    pub fn releases(&self) -> Vec<String> {
        self.collect(|op| match op {
            Operation::ContextReleased { context } => Some(context.clone()),
            _ => None,
        })
    }

    /// Context keys in enlistment order
    pub fn enlisted(&self) -> Vec<String> {
        self.collect(|op| match op {
            Operation::Enlisted { context, .. } => Some(context.clone()),
            _ => None,
        })
    }

    /// Number of transactions begun
    pub fn begins(&self) -> usize {
        self.count(|op| matches!(op, Operation::TransactionBegun { .. }))
    }

    /// Number of commit attempts, successful or not
    pub fn commit_attempts(&self) -> usize {
        self.count(|op| matches!(op, Operation::CommitAttempted { .. }))
    }

    /// Number of successful commits
    pub fn commits(&self) -> usize {
        self.count(|op| matches!(op, Operation::Committed { .. }))
    }

    /// Number of rollbacks
    pub fn rollbacks(&self) -> usize {
        self.count(|op| matches!(op, Operation::RolledBack { .. }))
    }

    /// Number of transaction disposals
    pub fn transaction_disposals(&self) -> usize {
        self.count(|op| matches!(op, Operation::TransactionDisposed { .. }))
    }

    /// Number of operations matching `pred`
    pub fn count(&self, pred: impl Fn(&Operation) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| pred(op)).count()
    }

    fn collect(&self, f: impl Fn(&Operation) -> Option<String>) -> Vec<String> {
        self.ops.lock().iter().filter_map(f).collect()
    }
}

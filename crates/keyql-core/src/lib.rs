//! keyql: a small SQL-like query engine layered over an externally
//! supplied ordered key-value store.
//!
//! Queries are compiled by [`Optimizer`] into pipelined plan trees that
//! drive the store through the narrow [`Storage`]/[`Cursor`] contract.
//! Execution is pulled from the root one row or one batch at a time; the
//! two modes are observationally equivalent.
//!
//! ```
//! use keyql_core::{ExecuteCtx, MemStore, Optimizer, Storage};
//!
//! let store = MemStore::new();
//! store.put(b"user1", b"alice").unwrap();
//! store.put(b"user2", b"bob").unwrap();
//!
//! let mut plan = Optimizer::new("where key ^= 'user'")
//!     .build_plan(&store)
//!     .unwrap();
//! let mut ctx = ExecuteCtx::new();
//! let mut rows = 0;
//! while let Some(_row) = plan.next(&mut ctx).unwrap() {
//!     rows += 1;
//! }
//! assert_eq!(rows, 2);
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod func;
pub mod kv;
pub mod mem;
pub mod optimizer;
pub mod plan;
pub mod query;

pub use config::EngineConfig;
pub use error::{KeyqlError, Result};
pub use exec::{ExecuteCtx, FilterExec, Value};
pub use func::{
    register_aggr_function, register_scalar_function, AggrFunc, Aggregator, ScalarFunc,
};
pub use kv::{Cursor, KVPair, Storage};
pub use mem::MemStore;
pub use optimizer::{ExpressionOptimizer, FilterOptimizer, Optimizer, ScanShape};
pub use plan::{FinalPlan, Plan};
pub use query::ast::{Expr, Statement, ValueType};
pub use query::Parser;

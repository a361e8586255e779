pub mod ctx;
pub mod eval;
pub mod eval_vec;
pub mod value;

pub use ctx::ExecuteCtx;
pub use eval::FilterExec;
pub use value::Value;

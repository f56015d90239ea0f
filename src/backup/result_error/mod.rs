//! One error type for the whole run, plus two ways of wrapping it with
//! context before it lands in the ledger.
use std::fmt::Debug;
pub mod error;
pub mod result;

/// Wraps an error with the value being worked on and the function that
/// failed. Pair with `#[named]` and `function_path!()`.
pub trait WithDebugObjectAndFnName<S: Into<String>, O: Debug + 'static> {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self;
}

/// Prefixes an error with a line saying what was being attempted.
pub trait WithMsg<S: Into<String>> {
    fn with_msg(self, msg: S) -> Self;
}

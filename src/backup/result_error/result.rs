use crate::backup::result_error::error::Error;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use std::fmt::Debug;

pub type Result<T> = std::result::Result<T, Error>;

/// Context is only built on the error path; `Ok` passes through untouched.
impl<S: Into<String>, O: Debug + Send + 'static, T> WithDebugObjectAndFnName<S, O> for Result<T> {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        self.map_err(|error| error.with_debug_object_and_fn_name(obj, fn_name))
    }
}

impl<T, S: Into<String>> WithMsg<S> for Result<T> {
    fn with_msg(self, msg: S) -> Self {
        self.map_err(|error| error.with_msg(msg))
    }
}

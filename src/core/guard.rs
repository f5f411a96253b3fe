//! Precondition gate for operations that mutate a stack.

use crate::error::{Error, Result};

/// A stack-like target that can be marked as protected.
pub trait Protected {
    fn is_protected(&self) -> bool;
    /// Logical path, used in error details.
    fn stack_name(&self) -> &str;
    fn external_name(&self) -> String;
}

/// Run `op` on `target` unless the target is protected.
///
/// A protected target never reaches `op`; the caller gets `stack.protected`
/// naming the stack by its external name.
pub fn execution_protection<S, T, F>(target: &S, op: F) -> Result<T>
where
    S: Protected + ?Sized,
    F: FnOnce(&S) -> Result<T>,
{
    if target.is_protected() {
        return Err(Error::stack_protected(
            target.stack_name(),
            target.external_name(),
        ));
    }

    op(target)
}

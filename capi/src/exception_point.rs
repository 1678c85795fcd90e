use std::panic::{self, AssertUnwindSafe};

use crate::env::Environment;
use crate::error::Exception;

/// Unwind payload that carries control to one specific exception point.
pub(crate) struct BoundaryUnwind {
    pub target: u64,
}

/// Per-thread landing-pad record. The exception travels here, the unwind
/// payload only names the target.
pub(crate) struct PointRecord {
    pub id: u64,
    pub pending: Option<Exception>,
}

/// Landing pad for managed exceptions raised while foreign code is on the
/// stack.
///
/// Placed right before the foreign call. [`Environment::raise`] stores the
/// exception on the innermost point and unwinds to it; [`ExceptionPoint::run`]
/// catches only that transfer and hands the exception back as an `Err`.
/// Anything else, including ordinary panics and transfers aimed at an outer
/// point, keeps unwinding.
pub struct ExceptionPoint<'env> {
    env: &'env Environment,
    id: u64,
    jumped: bool,
    popped: bool,
}

impl<'env> ExceptionPoint<'env> {
    pub fn place(env: &'env Environment) -> Self {
        Self {
            env,
            id: env.push_point(),
            jumped: false,
            popped: false,
        }
    }

    pub fn run<R>(&mut self, f: impl FnOnce() -> Result<R, Exception>) -> Result<R, Exception> {
        let payload = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => return result,
            Err(payload) => payload,
        };
        match payload.downcast::<BoundaryUnwind>() {
            Ok(unwind) if unwind.target == self.id => {
                self.jumped = true;
                Err(self.env.take_pending(self.id).unwrap_or_else(|| {
                    Exception::runtime("exception point reached without an exception")
                }))
            }
            Ok(unwind) => panic::resume_unwind(unwind),
            Err(other) => panic::resume_unwind(other),
        }
    }

    /// Whether control arrived here by transfer rather than by return.
    pub fn jumped_to(&self) -> bool {
        self.jumped
    }

    pub fn pop(mut self) {
        self.retire();
    }

    fn retire(&mut self) {
        if !self.popped {
            self.env.pop_point(self.id);
            self.popped = true;
        }
    }
}

impl Drop for ExceptionPoint<'_> {
    fn drop(&mut self) {
        self.retire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{BridgeCreateInfo, VM};

    #[test]
    fn normal_return_passes_through() {
        let vm = VM::new(BridgeCreateInfo::default());
        let env = Environment::init_thread(&vm);
        let mut point = ExceptionPoint::place(&env);
        assert_eq!(point.run(|| Ok(5)), Ok(5));
        assert!(!point.jumped_to());
        point.pop();
        assert_eq!(env.exception_depth(), 0);
    }

    #[test]
    fn raise_lands_on_innermost_point() {
        let vm = VM::new(BridgeCreateInfo::default());
        let env = Environment::init_thread(&vm);
        let mut outer = ExceptionPoint::place(&env);
        let result: Result<(), Exception> = outer.run(|| {
            let mut inner = ExceptionPoint::place(&env);
            let inner_result: Result<(), Exception> =
                inner.run(|| env.raise(Exception::runtime("boom")));
            assert!(inner.jumped_to());
            assert_eq!(inner_result, Err(Exception::runtime("boom")));
            Ok(())
        });
        assert_eq!(result, Ok(()));
        assert!(!outer.jumped_to());
    }

    #[test]
    fn inner_point_forwards_transfer_for_outer() {
        let vm = VM::new(BridgeCreateInfo::default());
        let env = Environment::init_thread(&vm);
        let mut outer = ExceptionPoint::place(&env);
        let result: Result<(), Exception> = outer.run(|| {
            let mut inner = ExceptionPoint::place(&env);
            inner.pop();
            // raised after the inner point retired
            env.raise(Exception::runtime("outer"))
        });
        assert!(outer.jumped_to());
        assert_eq!(result, Err(Exception::runtime("outer")));
        outer.pop();
        assert_eq!(env.exception_depth(), 0);
    }

    #[test]
    fn unwinding_retires_skipped_points() {
        let vm = VM::new(BridgeCreateInfo::default());
        let env = Environment::init_thread(&vm);
        let mut outer = ExceptionPoint::place(&env);
        let target = outer.id;
        let result: Result<(), Exception> = outer.run(|| {
            let mut inner = ExceptionPoint::place(&env);
            inner.run(|| {
                env.set_pending(target, Exception::runtime("skip"));
                panic::resume_unwind(Box::new(BoundaryUnwind { target }))
            })
        });
        assert_eq!(result, Err(Exception::runtime("skip")));
        assert_eq!(env.exception_depth(), 1);
    }

    #[test]
    fn foreign_panics_are_not_swallowed() {
        let vm = VM::new(BridgeCreateInfo::default());
        let env = Environment::init_thread(&vm);
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut point = ExceptionPoint::place(&env);
            let _: Result<(), Exception> = point.run(|| panic!("not ours"));
        }));
        assert!(caught.is_err());
        assert_eq!(env.exception_depth(), 0);
    }
}

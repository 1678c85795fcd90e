use std::cell::{Cell, RefCell};
use std::panic;
use std::rc::Rc;
use std::sync::Arc;

use log::debug;
use object::{Symbol, Value};

use crate::cache::{RArray, RData, RString};
use crate::dispatch::{self, Arguments, CallFrame};
use crate::error::{Exception, FatalError};
use crate::exception_point::{BoundaryUnwind, PointRecord};
use crate::frame::NativeFrame;
use crate::value::ForeignValue;
use crate::vm::{VM, VMShared};

thread_local! {
    static ENVIRONMENT: RefCell<Option<Rc<Environment>>> = const { RefCell::new(None) };
}

/// Per-thread execution environment of the bridge.
///
/// Tracks the stack of native frames, the managed call frame and block of
/// the innermost crossing, and the exception points placed by crossings.
/// Never leaves the thread it was created on.
pub struct Environment {
    vm: Arc<VMShared>,
    frames: RefCell<Vec<NativeFrame>>,
    call_frame: RefCell<Option<Rc<CallFrame>>>,
    block: Cell<Value>,
    points: RefCell<Vec<PointRecord>>,
    next_point: Cell<u64>,
}

/// State replaced by [`Environment::enter`], put back on leave.
pub struct SavedState {
    call_frame: Option<Rc<CallFrame>>,
    block: Value,
    depth: usize,
}

/// Scope guard of one crossing. Dropping it pops the crossing's native frame
/// and restores the previous call frame and block.
pub struct Crossing<'env> {
    env: &'env Environment,
    saved: Option<SavedState>,
}

impl Drop for Crossing<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.env.leave(saved);
        }
    }
}

impl Environment {
    fn new(vm: Arc<VMShared>) -> Self {
        Self {
            vm,
            frames: RefCell::new(Vec::new()),
            call_frame: RefCell::new(None),
            block: Cell::new(Value::nil()),
            points: RefCell::new(Vec::new()),
            next_point: Cell::new(1),
        }
    }

    /// This thread's environment for `vm`, created on first use.
    ///
    /// An idle environment of another VM is replaced; replacing one with
    /// native frames or exception points still live is fatal.
    pub fn init_thread(vm: &VM) -> Rc<Environment> {
        ENVIRONMENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            match slot.as_ref() {
                Some(existing) if Arc::ptr_eq(&existing.vm, vm.shared()) => {
                    return existing.clone();
                }
                Some(existing) if existing.is_active() => FatalError::EnvironmentBusy.abort(),
                Some(_) => {
                    debug!("replaced idle execution environment on {:?}", std::thread::current().id());
                }
                None => {
                    debug!("initialized execution environment on {:?}", std::thread::current().id());
                }
            }
            let env = Rc::new(Environment::new(vm.shared().clone()));
            *slot = Some(env.clone());
            env
        })
    }

    pub fn get() -> Option<Rc<Environment>> {
        ENVIRONMENT.with(|slot| slot.borrow().clone())
    }

    pub fn shutdown_thread() -> Option<Rc<Environment>> {
        ENVIRONMENT.with(|slot| slot.borrow_mut().take())
    }

    #[inline]
    pub fn vm(&self) -> &Arc<VMShared> {
        &self.vm
    }

    pub fn native_depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn exception_depth(&self) -> usize {
        self.points.borrow().len()
    }

    /// Whether a crossing or exception point is live on this environment.
    pub fn is_active(&self) -> bool {
        self.native_depth() > 0 || self.exception_depth() > 0
    }

    pub fn block(&self) -> Value {
        self.block.get()
    }

    pub fn current_call_frame(&self) -> Option<Rc<CallFrame>> {
        self.call_frame.borrow().clone()
    }

    // ── crossings ──────────────────────────────────────────────────

    /// Push a fresh native frame and make `call_frame` and `block` current.
    pub fn enter(&self, call_frame: Rc<CallFrame>, block: Value) -> Crossing<'_> {
        let saved = SavedState {
            call_frame: self.call_frame.replace(Some(call_frame)),
            block: self.block.replace(block),
            depth: self.native_depth(),
        };
        self.frames
            .borrow_mut()
            .push(NativeFrame::new(self.vm.clone()));
        Crossing {
            env: self,
            saved: Some(saved),
        }
    }

    pub(crate) fn leave(&self, saved: SavedState) {
        let frame = {
            let mut frames = self.frames.borrow_mut();
            debug_assert_eq!(
                frames.len(),
                saved.depth + 1,
                "native frames must be left in LIFO order"
            );
            frames.pop()
        };
        // releases the crossing's handles
        drop(frame);
        self.call_frame.replace(saved.call_frame);
        self.block.set(saved.block);
    }

    // ── conversion ─────────────────────────────────────────────────

    pub fn get_handle(&self, value: Value) -> Result<ForeignValue, Exception> {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            return frame.get_handle(value);
        }
        ForeignValue::from_immediate(value)
            .ok_or_else(|| Exception::runtime("handle requested for unknown object type"))
    }

    pub fn get_object(&self, value: ForeignValue) -> Result<Value, Exception> {
        match self.frames.borrow().last() {
            Some(frame) => frame.get_object(value),
            None => self.vm.handles.object_for(value),
        }
    }

    fn with_frame<R>(
        &self,
        f: impl FnOnce(&mut NativeFrame) -> Result<R, Exception>,
    ) -> Result<R, Exception> {
        let mut frames = self.frames.borrow_mut();
        let frame = frames
            .last_mut()
            .ok_or_else(|| Exception::runtime("no native frame is active"))?;
        f(frame)
    }

    pub fn array_mirror(&self, value: ForeignValue) -> Result<*mut RArray, Exception> {
        self.with_frame(|frame| frame.array_mirror(value))
    }

    pub fn string_mirror(&self, value: ForeignValue) -> Result<*mut RString, Exception> {
        self.with_frame(|frame| frame.string_mirror(value))
    }

    pub fn data_mirror(&self, value: ForeignValue) -> Result<*mut RData, Exception> {
        self.with_frame(|frame| frame.data_mirror(value))
    }

    /// Flush the current frame's mirrors. No-op outside a crossing.
    pub fn flush_cached_data(&self) -> Result<(), Exception> {
        match self.frames.borrow_mut().last_mut() {
            Some(frame) => frame.flush(),
            None => Ok(()),
        }
    }

    /// Refresh the current frame's mirrors. No-op outside a crossing.
    pub fn update_cached_data(&self) -> Result<(), Exception> {
        match self.frames.borrow_mut().last_mut() {
            Some(frame) => frame.update(),
            None => Ok(()),
        }
    }

    // ── re-entry ───────────────────────────────────────────────────

    /// Call a method from foreign code. The current frame's mirrors are
    /// flushed before the callee runs and updated after it returns, once.
    pub fn send(
        &self,
        receiver: Value,
        name: Symbol,
        args: &[Value],
        block: Value,
    ) -> Result<Value, Exception> {
        let caller = self.current_call_frame();
        let arguments = Arguments::new(receiver, args.to_vec(), block);
        dispatch::send(self, caller.as_ref(), name, &arguments)
    }

    /// Transfer `exception` to the innermost exception point. Aborts when
    /// no crossing is active.
    pub fn raise(&self, exception: Exception) -> ! {
        let target = self.points.borrow().last().map(|p| p.id);
        let Some(target) = target else {
            FatalError::Unanchored(exception).abort()
        };
        self.set_pending(target, exception);
        panic::resume_unwind(Box::new(BoundaryUnwind { target }))
    }

    // ── exception point records ────────────────────────────────────

    pub(crate) fn push_point(&self) -> u64 {
        let id = self.next_point.get();
        self.next_point.set(id + 1);
        self.points.borrow_mut().push(PointRecord { id, pending: None });
        id
    }

    pub(crate) fn pop_point(&self, id: u64) {
        let mut points = self.points.borrow_mut();
        debug_assert_eq!(
            points.last().map(|p| p.id),
            Some(id),
            "exception points must retire in LIFO order"
        );
        if let Some(index) = points.iter().rposition(|p| p.id == id) {
            points.truncate(index);
        }
    }

    pub(crate) fn set_pending(&self, id: u64, exception: Exception) {
        if let Some(point) = self.points.borrow_mut().iter_mut().rfind(|p| p.id == id) {
            point.pending = Some(exception);
        }
    }

    pub(crate) fn take_pending(&self, id: u64) -> Option<Exception> {
        self.points
            .borrow_mut()
            .iter_mut()
            .rfind(|p| p.id == id)
            .and_then(|p| p.pending.take())
    }
}

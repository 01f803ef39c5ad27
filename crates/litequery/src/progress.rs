use std::any::Any;
use std::cell::{Cell, RefCell};
use std::ffi::{c_int, c_void};
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Why the progress callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The running query crossed another period of virtual-machine
    /// instructions.
    Tick,
    /// Another connection holds a lock the query needs; returning
    /// `Continue` retries.
    Busy,
}

/// When the progress callback fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// On every period crossing.
    #[default]
    Normal,
    /// On the first period crossing of a query only.
    Once,
    /// On every period crossing, and at least once per query even when the
    /// query finishes inside the first period.
    AtLeastOnce,
}

/// Progress handler configuration.
///
/// The engine calls back every `tick` virtual-machine instructions; the
/// user callback fires whenever the accumulated ticks cross `period`.
#[derive(Debug, Clone, Copy)]
pub struct ProgressOptions {
    pub mode: ProgressMode,
    pub period: i32,
    pub tick: i32,
}

pub const DEFAULT_PROGRESS_PERIOD: i32 = 1000;
pub const DEFAULT_PROGRESS_TICK: i32 = 10;

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            mode: ProgressMode::Normal,
            period: DEFAULT_PROGRESS_PERIOD,
            tick: DEFAULT_PROGRESS_TICK,
        }
    }
}

type Callback = Box<dyn FnMut(Progress) -> ControlFlow<()>>;

pub(crate) enum Invoke {
    Continue,
    Abort,
}

/// Per-database progress descriptor. Boxed by the database so the engine
/// callbacks receive a stable address.
pub(crate) struct ProgressState {
    installed: Cell<bool>,
    mode: Cell<ProgressMode>,
    period: Cell<i32>,
    tick: Cell<i32>,
    tick_count: Cell<i32>,
    call_count: Cell<i32>,
    in_callback: Cell<bool>,
    callback: RefCell<Option<Callback>>,
    panic: RefCell<Option<Box<dyn Any + Send>>>,
}

impl ProgressState {
    pub(crate) fn new() -> Self {
        Self {
            installed: Cell::new(false),
            mode: Cell::new(ProgressMode::Normal),
            period: Cell::new(DEFAULT_PROGRESS_PERIOD),
            tick: Cell::new(DEFAULT_PROGRESS_TICK),
            tick_count: Cell::new(0),
            call_count: Cell::new(0),
            in_callback: Cell::new(false),
            callback: RefCell::new(None),
            panic: RefCell::new(None),
        }
    }

    pub(crate) fn install(&self, opts: ProgressOptions, callback: Callback) -> i32 {
        let period = opts.period.max(1);
        let tick = opts.tick.clamp(1, period);
        self.mode.set(opts.mode);
        self.period.set(period);
        self.tick.set(tick);
        self.tick_count.set(0);
        self.call_count.set(0);
        *self.callback.borrow_mut() = Some(callback);
        self.installed.set(true);
        tick
    }

    pub(crate) fn uninstall(&self) {
        self.installed.set(false);
        *self.callback.borrow_mut() = None;
    }

    pub(crate) fn is_installed(&self) -> bool {
        self.installed.get()
    }

    /// Resets the per-query counters at the start of an invocation.
    pub(crate) fn begin_query(&self) {
        if self.installed.get() && !self.in_callback.get() {
            self.tick_count.set(0);
            self.call_count.set(0);
        }
    }

    /// Completion hook: the at-least-once mode guarantees one invocation
    /// per query.
    pub(crate) fn finish_query(&self) -> Invoke {
        if self.installed.get()
            && !self.in_callback.get()
            && self.mode.get() == ProgressMode::AtLeastOnce
            && self.call_count.get() == 0
        {
            self.call_count.set(1);
            return self.invoke(Progress::Tick);
        }
        Invoke::Continue
    }

    /// Engine progress callback body: accumulate ticks and fire the user
    /// callback on each period crossing.
    pub(crate) fn on_progress(&self) -> c_int {
        if !self.installed.get() || self.in_callback.get() {
            return 0;
        }
        let count = self.tick_count.get() + self.tick.get();
        if count < self.period.get() {
            self.tick_count.set(count);
            return 0;
        }
        self.tick_count.set(count - self.period.get());

        if self.mode.get() == ProgressMode::Once && self.call_count.get() > 0 {
            return 0;
        }
        self.call_count.set(self.call_count.get() + 1);
        match self.invoke(Progress::Tick) {
            Invoke::Continue => 0,
            Invoke::Abort => 1,
        }
    }

    /// Engine busy callback body: surface the contention to the user
    /// callback and retry unless it aborts.
    pub(crate) fn on_busy(&self) -> c_int {
        if !self.installed.get() || self.in_callback.get() {
            return 0;
        }
        match self.invoke(Progress::Busy) {
            Invoke::Continue => 1,
            Invoke::Abort => 0,
        }
    }

    fn invoke(&self, progress: Progress) -> Invoke {
        // The callback is taken out of its slot for the duration of the
        // call, so user code that runs queries (or reconfigures the
        // handler) never observes a held borrow.
        let Some(mut callback) = self.callback.borrow_mut().take() else {
            return Invoke::Continue;
        };
        self.in_callback.set(true);
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(progress)));
        self.in_callback.set(false);
        {
            let mut slot = self.callback.borrow_mut();
            if slot.is_none() && self.installed.get() {
                *slot = Some(callback);
            }
        }
        match outcome {
            Ok(ControlFlow::Continue(())) => Invoke::Continue,
            Ok(ControlFlow::Break(())) => Invoke::Abort,
            Err(payload) => {
                // A panic must not cross the engine boundary; it is
                // stashed and resumed at the next step boundary.
                *self.panic.borrow_mut() = Some(payload);
                Invoke::Abort
            }
        }
    }

    pub(crate) fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic.borrow_mut().take()
    }
}

pub(crate) unsafe extern "C" fn progress_trampoline(ctx: *mut c_void) -> c_int {
    let state = unsafe { &*(ctx as *const ProgressState) };
    state.on_progress()
}

pub(crate) unsafe extern "C" fn busy_trampoline(ctx: *mut c_void, _attempts: c_int) -> c_int {
    let state = unsafe { &*(ctx as *const ProgressState) };
    state.on_busy()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting_state(opts: ProgressOptions) -> (ProgressState, Rc<Cell<u32>>) {
        let calls = Rc::new(Cell::new(0));
        let state = ProgressState::new();
        let counter = calls.clone();
        state.install(
            opts,
            Box::new(move |_| {
                counter.set(counter.get() + 1);
                ControlFlow::Continue(())
            }),
        );
        (state, calls)
    }

    #[test]
    fn callback_fires_on_period_crossings() {
        let opts = ProgressOptions {
            period: 100,
            tick: 10,
            ..ProgressOptions::default()
        };
        let (state, calls) = counting_state(opts);
        for _ in 0..25 {
            state.on_progress();
        }
        // 25 ticks of 10 instructions cross a period of 100 twice.
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn once_mode_fires_a_single_time_per_query() {
        let opts = ProgressOptions {
            mode: ProgressMode::Once,
            period: 10,
            tick: 10,
            ..ProgressOptions::default()
        };
        let (state, calls) = counting_state(opts);
        for _ in 0..5 {
            state.on_progress();
        }
        assert_eq!(calls.get(), 1);

        state.begin_query();
        state.on_progress();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn at_least_once_fires_at_completion_when_idle() {
        let opts = ProgressOptions {
            mode: ProgressMode::AtLeastOnce,
            ..ProgressOptions::default()
        };
        let (state, calls) = counting_state(opts);
        state.begin_query();
        assert!(matches!(state.finish_query(), Invoke::Continue));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn tick_is_capped_to_period() {
        let state = ProgressState::new();
        let registered = state.install(
            ProgressOptions {
                period: 50,
                tick: 500,
                ..ProgressOptions::default()
            },
            Box::new(|_| ControlFlow::Continue(())),
        );
        assert_eq!(registered, 50);
    }

    #[test]
    fn abort_is_reported_to_the_engine() {
        let state = ProgressState::new();
        state.install(
            ProgressOptions {
                period: 10,
                tick: 10,
                ..ProgressOptions::default()
            },
            Box::new(|_| ControlFlow::Break(())),
        );
        assert_eq!(state.on_progress(), 1);
        assert_eq!(state.on_busy(), 0);
    }
}

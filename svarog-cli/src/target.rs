//! The `gdbstub` [`Target`] implementation driving a reversible, single-hart [`Core`].
//!
//! Grounded in the teacher's `target.rs`/`SimTarget`, but reworked around a fully synchronous
//! run loop: the teacher ran the simulated board on its own tokio task, communicating with the
//! GDB session over `mpsc`/`watch` channels so the `ratatui` TUI could observe the same state at
//! the same time. With the TUI dropped (see DESIGN.md) there's only one consumer of the
//! simulation left, so [`GdbTarget`] just owns the [`Simulator`] directly and
//! [`crate::gdb::EventLoop::wait_for_stop_reason`] drives it a step at a time in-process.
//!
//! Every mutation that should survive in the reverse-debugging history goes through
//! [`Simulator::step`]/[`Simulator::step_with`] rather than calling `Core` methods directly on a
//! bare allocator reference — the one exception being breakpoint/watchpoint bookkeeping, which
//! [`svarog_core::debug::DebugController`] already tracks independently of any particular core
//! instance and is reused here as-is.

use gdbstub::target::ext::base::BaseOps;
use gdbstub::target::ext::breakpoints::BreakpointsOps;
use gdbstub::target::Target;
use svarog_core::core::Core;
use svarog_core::debug::DebugController;
use svarog_core::simulator::{SimulationAllocator, Simulator};

use crate::gdb::{GdbTargetError, OurRiscv32};

/// What the next call(s) to [`GdbTarget::advance_once`] should do, set by the `gdbstub` resume/
/// step/reverse-exec trait impls in `gdb/resume.rs` and `gdb/step.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Step,
    Continue,
    ReverseStep,
    ReverseContinue,
    RangeStep(u32, u32),
}

/// Why [`GdbTarget::advance_once`] stopped advancing and control should return to `gdbstub`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    DoneStep,
    Breakpoint(u32),
    Watchpoint(u32),
    ReachedStart,
}

pub struct GdbTarget {
    simulator: Simulator<Core<SimulationAllocator>>,
    debug: DebugController,
    pub(crate) execution_mode: ExecutionMode,
}

impl GdbTarget {
    pub fn new(simulator: Simulator<Core<SimulationAllocator>>) -> Self {
        let mut debug = DebugController::new();
        debug.resume();
        Self {
            simulator,
            debug,
            execution_mode: ExecutionMode::Continue,
        }
    }

    pub fn simulator(&self) -> &Simulator<Core<SimulationAllocator>> {
        &self.simulator
    }

    pub fn pc(&self) -> u32 {
        let (allocator, core) = self.simulator.inspect();
        core.pc(allocator)
    }

    pub(crate) fn step_with_core<F, R>(&mut self, name: &'static str, f: F) -> R
    where
        F: 'static + Fn(&mut SimulationAllocator, &Core<SimulationAllocator>) -> R,
    {
        self.simulator.step_with(name, f)
    }

    pub fn set_breakpoint(&mut self, pc: u32) {
        self.debug.set_breakpoint(pc);
    }

    pub fn clear_breakpoint(&mut self, pc: u32) {
        self.debug.clear_breakpoint(pc);
    }

    fn breakpoint_hit(&self) -> Option<StopEvent> {
        let pc = self.pc();
        self.debug.is_breakpoint(pc).then_some(StopEvent::Breakpoint(pc))
    }

    fn watchpoint_hit(&mut self) -> Option<StopEvent> {
        let (allocator, core) = self.simulator.inspect();
        self.debug.check_watchpoints(core, allocator).map(StopEvent::Watchpoint)
    }

    /// Performs exactly one unit of work for the current [`ExecutionMode`] — one forward or
    /// backward tick, never more — and reports whether that unit also satisfies a stopping
    /// condition. [`crate::gdb::EventLoop::wait_for_stop_reason`] calls this in a loop, checking
    /// for an incoming Ctrl-C between calls, so a `continue` never blocks the connection for
    /// longer than a single cycle.
    pub fn advance_once(&mut self) -> Option<StopEvent> {
        match self.execution_mode {
            ExecutionMode::Step => {
                self.simulator.step();
                if let Some(event) = self.breakpoint_hit().or_else(|| self.watchpoint_hit()) {
                    return Some(event);
                }
                Some(StopEvent::DoneStep)
            }
            ExecutionMode::Continue => {
                self.simulator.step();
                self.breakpoint_hit().or_else(|| self.watchpoint_hit())
            }
            ExecutionMode::RangeStep(start, end) => {
                self.simulator.step();
                if let Some(event) = self.breakpoint_hit().or_else(|| self.watchpoint_hit()) {
                    return Some(event);
                }
                (!(start..end).contains(&self.pc())).then_some(StopEvent::DoneStep)
            }
            ExecutionMode::ReverseStep => {
                if !self.simulator.undo_step() {
                    return Some(StopEvent::ReachedStart);
                }
                Some(self.breakpoint_hit().unwrap_or(StopEvent::DoneStep))
            }
            ExecutionMode::ReverseContinue => {
                if !self.simulator.undo_step() {
                    return Some(StopEvent::ReachedStart);
                }
                self.breakpoint_hit()
            }
        }
    }
}

impl Target for GdbTarget {
    type Arch = OurRiscv32;
    type Error = GdbTargetError;

    fn base_ops(&mut self) -> BaseOps<Self::Arch, Self::Error> {
        BaseOps::SingleThread(self)
    }

    fn support_breakpoints(&mut self) -> Option<BreakpointsOps<'_, Self>> {
        Some(self)
    }
}

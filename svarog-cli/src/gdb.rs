mod base_ops;
mod breakpoints;
mod registers;
mod resume;
mod step;

use gdbstub::arch::Arch;
use gdbstub::common::Signal;
use gdbstub::conn::{Connection, ConnectionExt};
use gdbstub::stub::run_blocking::{BlockingEventLoop, Event, WaitForStopReasonError};
use gdbstub::stub::{DisconnectReason, GdbStub, GdbStubError, SingleThreadStopReason};
use gdbstub::target::ext::base::reverse_exec::ReplayLogPosition;
use gdbstub_arch::riscv::reg::{id::RiscvRegId, RiscvCoreRegs};
use gdbstub_arch::riscv::Riscv32;

use crate::target::{GdbTarget, StopEvent};
use crate::tcp::TcpStream;

/// This core's GDB `Arch`. Reuses `gdbstub_arch`'s RV32 register layout and breakpoint kind, but
/// drops the teacher's custom CSR target-description XML (`gdb/rv32-csrs.xml`): the file never
/// made it into this pack, and CSR access still works without it (GDB falls back to addressing
/// them by raw number) — see DESIGN.md.
pub struct OurRiscv32;

impl Arch for OurRiscv32 {
    type Usize = u32;
    type Registers = RiscvCoreRegs<u32>;
    type BreakpointKind = <Riscv32 as Arch>::BreakpointKind;
    type RegId = RiscvRegId<u32>;

    fn target_description_xml() -> Option<&'static str> {
        None
    }
}

/// [`GdbTarget`]'s associated `Target::Error`. Every fallible path a GDB command can hit
/// (register/memory access faults) is reported through `gdbstub`'s own `TargetError::NonFatal`
/// instead, so nothing in this crate ever needs to construct one — but `Target` still requires a
/// concrete, `Debug` error type to name.
#[derive(Debug)]
pub enum GdbTargetError {}

impl std::fmt::Display for GdbTargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {}
    }
}

impl std::error::Error for GdbTargetError {}

/// Drives [`GdbTarget::advance_once`] between polls of the connection, so a `continue` never
/// blocks longer than a single simulated cycle and an incoming Ctrl-C (or the next GDB packet)
/// is always noticed within one [`crate::tcp::TcpStream`] poll interval.
pub struct EventLoop;

impl BlockingEventLoop for EventLoop {
    type Target = GdbTarget;
    type Connection = TcpStream;
    type StopReason = SingleThreadStopReason<u32>;

    fn wait_for_stop_reason(
        target: &mut GdbTarget,
        conn: &mut TcpStream,
    ) -> Result<Event<Self::StopReason>, WaitForStopReasonError<GdbTargetError, std::io::Error>>
    {
        loop {
            if let Some(_byte) = conn.peek().map_err(WaitForStopReasonError::Connection)? {
                let byte = conn.read().map_err(WaitForStopReasonError::Connection)?;
                return Ok(Event::IncomingData(byte));
            }

            if let Some(event) = target.advance_once() {
                return Ok(Event::TargetStopped(stop_reason_for(event)));
            }
        }
    }

    fn on_interrupt(
        _target: &mut GdbTarget,
    ) -> Result<Option<Self::StopReason>, GdbTargetError> {
        Ok(Some(SingleThreadStopReason::Signal(Signal::SIGINT)))
    }
}

fn stop_reason_for(event: StopEvent) -> SingleThreadStopReason<u32> {
    match event {
        StopEvent::DoneStep => SingleThreadStopReason::DoneStep,
        StopEvent::Breakpoint(_) => SingleThreadStopReason::SwBreak(()),
        // No `support_hw_watchpoint` is wired up (see `gdb/breakpoints.rs`), so this never fires
        // over the wire today; kept so `DebugController`'s watchpoints stay meaningful for a
        // future GDB watchpoint extension, and so a non-GDB host reusing `GdbTarget` still gets a
        // sensible stop reason.
        StopEvent::Watchpoint(_) => SingleThreadStopReason::SwBreak(()),
        StopEvent::ReachedStart => SingleThreadStopReason::ReplayLog {
            tid: None,
            pos: ReplayLogPosition::Begin,
        },
    }
}

/// Runs a single GDB remote-serial-protocol session to completion, blocking the calling thread.
pub fn run_session(
    connection: TcpStream,
    target: &mut GdbTarget,
) -> Result<DisconnectReason, GdbStubError<GdbTargetError, std::io::Error>> {
    GdbStub::new(connection).run_blocking::<EventLoop>(target)
}

use gdbstub::arch::Arch;
use gdbstub::target::ext::breakpoints::{
    Breakpoints, HwBreakpoint, HwBreakpointOps, HwWatchpointOps, SwBreakpoint, SwBreakpointOps,
};
use gdbstub::target::TargetResult;

use crate::gdb::OurRiscv32;
use crate::target::GdbTarget;

impl Breakpoints for GdbTarget {
    fn support_sw_breakpoint(&mut self) -> Option<SwBreakpointOps<'_, Self>> {
        Some(self)
    }

    fn support_hw_breakpoint(&mut self) -> Option<HwBreakpointOps<'_, Self>> {
        Some(self)
    }

    fn support_hw_watchpoint(&mut self) -> Option<HwWatchpointOps<'_, Self>> {
        None
    }
}

impl SwBreakpoint for GdbTarget {
    fn add_sw_breakpoint(
        &mut self,
        addr: u32,
        _kind: <OurRiscv32 as Arch>::BreakpointKind,
    ) -> TargetResult<bool, Self> {
        self.set_breakpoint(addr);
        Ok(true)
    }

    fn remove_sw_breakpoint(
        &mut self,
        addr: u32,
        _kind: <OurRiscv32 as Arch>::BreakpointKind,
    ) -> TargetResult<bool, Self> {
        self.clear_breakpoint(addr);
        Ok(true)
    }
}

impl HwBreakpoint for GdbTarget {
    fn add_hw_breakpoint(
        &mut self,
        addr: u32,
        _kind: <OurRiscv32 as Arch>::BreakpointKind,
    ) -> TargetResult<bool, Self> {
        self.set_breakpoint(addr);
        Ok(true)
    }

    fn remove_hw_breakpoint(
        &mut self,
        addr: u32,
        _kind: <OurRiscv32 as Arch>::BreakpointKind,
    ) -> TargetResult<bool, Self> {
        self.clear_breakpoint(addr);
        Ok(true)
    }
}

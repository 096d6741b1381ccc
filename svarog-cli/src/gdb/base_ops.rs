use gdbstub::target::ext::base::single_register_access::SingleRegisterAccessOps;
use gdbstub::target::ext::base::singlethread::{SingleThreadBase, SingleThreadResumeOps};
use gdbstub::target::{TargetError, TargetResult};
use gdbstub_arch::riscv::reg::RiscvCoreRegs;
use svarog_core::interconnect::Master;
use svarog_core::registers::Specifier;

use crate::target::GdbTarget;

impl SingleThreadBase for GdbTarget {
    fn read_registers(&mut self, regs: &mut RiscvCoreRegs<u32>) -> TargetResult<(), Self> {
        let (allocator, core) = self.simulator().inspect();
        for r in Specifier::iter_all() {
            regs.x[usize::from(r)] = core.register(allocator, r);
        }
        regs.pc = core.pc(allocator);
        Ok(())
    }

    fn write_registers(&mut self, regs: &RiscvCoreRegs<u32>) -> TargetResult<(), Self> {
        let regs = regs.clone();
        self.step_with_core("gdb write all registers", move |allocator, core| {
            for r in Specifier::iter_all() {
                core.set_register(allocator, r, regs.x[usize::from(r)]);
            }
            core.set_pc(allocator, regs.pc);
        });
        Ok(())
    }

    fn support_single_register_access(&mut self) -> Option<SingleRegisterAccessOps<'_, (), Self>> {
        Some(self)
    }

    fn read_addrs(&mut self, start_addr: u32, data: &mut [u8]) -> TargetResult<usize, Self> {
        let (allocator, core) = self.simulator().inspect();
        match core.interconnect().read_pure(data, allocator, start_addr) {
            Ok(()) => Ok(data.len()),
            Err(_) => Err(TargetError::NonFatal),
        }
    }

    fn write_addrs(&mut self, start_addr: u32, data: &[u8]) -> TargetResult<(), Self> {
        let data = data.to_owned();
        let result = self.step_with_core("gdb write memory", move |allocator, core| {
            core.interconnect().write(allocator, start_addr, &data, Master::Debug)
        });
        result.map_err(|_| TargetError::NonFatal)
    }

    fn support_resume(&mut self) -> Option<SingleThreadResumeOps<'_, Self>> {
        Some(self)
    }
}

use std::io::Write;

use gdbstub::target::ext::base::single_register_access::SingleRegisterAccess;
use gdbstub::target::{TargetError, TargetResult};
use gdbstub_arch::riscv::reg::id::RiscvRegId;
use svarog_core::registers::Specifier;

use crate::target::GdbTarget;

impl SingleRegisterAccess<()> for GdbTarget {
    fn read_register(
        &mut self,
        _tid: (),
        reg_id: RiscvRegId<u32>,
        mut buf: &mut [u8],
    ) -> TargetResult<usize, Self> {
        let (allocator, core) = self.simulator().inspect();

        match reg_id {
            RiscvRegId::Gpr(i) => {
                let specifier = Specifier::new(i).ok_or(TargetError::NonFatal)?;
                let value = core.register(allocator, specifier);
                Ok(buf.write(&value.to_le_bytes())?)
            }
            // No F-extension: there are no floating-point registers to report.
            RiscvRegId::Fpr(_) => Err(TargetError::NonFatal),
            RiscvRegId::Pc => {
                let value = core.pc(allocator);
                Ok(buf.write(&value.to_le_bytes())?)
            }
            RiscvRegId::Csr(addr) => match core.read_csr(allocator, addr) {
                Ok(value) => Ok(buf.write(&value.to_le_bytes())?),
                Err(_) => Err(TargetError::NonFatal),
            },
            // Machine mode only: there's no other privilege level this core could report.
            RiscvRegId::Priv => match buf.first_mut() {
                Some(byte) => {
                    *byte = 3;
                    Ok(1)
                }
                None => Ok(0),
            },
            _ => Err(TargetError::NonFatal),
        }
    }

    fn write_register(
        &mut self,
        _tid: (),
        reg_id: RiscvRegId<u32>,
        val: &[u8],
    ) -> TargetResult<(), Self> {
        let val = val.to_owned();
        match reg_id {
            RiscvRegId::Gpr(i) => {
                let specifier = Specifier::new(i).ok_or(TargetError::NonFatal)?;
                let mut buf = [0u8; 4];
                buf.as_mut_slice().write_all(&val)?;
                let value = u32::from_le_bytes(buf);
                self.step_with_core("gdb write single register", move |allocator, core| {
                    core.set_register(allocator, specifier, value);
                });
                Ok(())
            }
            RiscvRegId::Fpr(_) => Err(TargetError::NonFatal),
            RiscvRegId::Pc => {
                let mut buf = [0u8; 4];
                buf.as_mut_slice().write_all(&val)?;
                let value = u32::from_le_bytes(buf);
                self.step_with_core("gdb write pc", move |allocator, core| {
                    core.set_pc(allocator, value);
                });
                Ok(())
            }
            RiscvRegId::Csr(addr) => {
                let mut buf = [0u8; 4];
                buf.as_mut_slice().write_all(&val)?;
                let value = u32::from_le_bytes(buf);
                let result = self.step_with_core("gdb write csr", move |allocator, core| {
                    core.write_csr(allocator, addr, value)
                });
                result.map_err(|_| TargetError::NonFatal)
            }
            // Machine mode only: nothing to switch, so a write is silently accepted.
            RiscvRegId::Priv => Ok(()),
            _ => Err(TargetError::NonFatal),
        }
    }
}

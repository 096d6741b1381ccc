use gdbstub::common::Signal;
use gdbstub::target::ext::base::reverse_exec::ReverseStep;
use gdbstub::target::ext::base::singlethread::{SingleThreadRangeStepping, SingleThreadSingleStep};

use crate::target::{ExecutionMode, GdbTarget};

impl SingleThreadSingleStep for GdbTarget {
    fn step(&mut self, _signal: Option<Signal>) -> Result<(), Self::Error> {
        self.execution_mode = ExecutionMode::Step;
        Ok(())
    }
}

impl ReverseStep<()> for GdbTarget {
    fn reverse_step(&mut self, _tid: ()) -> Result<(), Self::Error> {
        self.execution_mode = ExecutionMode::ReverseStep;
        Ok(())
    }
}

impl SingleThreadRangeStepping for GdbTarget {
    fn resume_range_step(&mut self, start: u32, end: u32) -> Result<(), Self::Error> {
        self.execution_mode = ExecutionMode::RangeStep(start, end);
        Ok(())
    }
}

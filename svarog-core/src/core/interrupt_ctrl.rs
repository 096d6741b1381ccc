//! Interrupt controller (C11): the cause codes and priority for the three asynchronous interrupt
//! sources this core supports (software, timer, external).
//!
//! Unlike the teacher's `interrupts.rs` (a `BitArray`-backed delegation mask across six S/M
//! interrupt codes, since that core supports S-mode delegation), priority-encoding and
//! pending/enabled arbitration are already implemented directly on [`super::csr_file::CsrFile`]
//! (there's exactly one hart and one privilege mode here, so there's nothing left to delegate
//! to). This module is the thin, M-mode-only façade spec.md's C3 module-mapping table calls for:
//! the cause-code constants `Core::cycle` reads off of
//! [`CsrFile::pending_interrupt_cause`](super::csr_file::CsrFile::pending_interrupt_cause), kept
//! named and documented separately so the component boundary from spec.md §3 stays visible even
//! though the logic lives in one place.

/// Machine software interrupt (from the CLINT's `msip` register).
pub const MACHINE_SOFTWARE_INTERRUPT: u32 = 3;
/// Machine timer interrupt (from the CLINT's `mtimecmp` comparison).
pub const MACHINE_TIMER_INTERRUPT: u32 = 7;
/// Machine external interrupt (software-settable `MEIP`; see [`super::csr_file`]'s doc comment on
/// why there's no external interrupt controller behind it in this core).
pub const MACHINE_EXTERNAL_INTERRUPT: u32 = 11;

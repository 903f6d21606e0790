//! Privilege switch engine.
//!
//! A kernel-resuming frame and a user-resuming frame differ in size (only the
//! latter carries esp/ss), so a switch never rewrites the original frame in
//! place. It builds a new frame elsewhere and retargets the resume slot the
//! return stub reads. Scratch storage is single-slot per direction: the
//! kernel-to-user buffer lives in the engine, the user-to-kernel frame is
//! carved out of the trapping task's own stack. A switch must have been
//! consumed by resumption before the next one in the same direction starts;
//! the `pending` flags assert that ordering.

use spin::Mutex;

use super::frame::{resume_slot, Eflags, TrapFrame, TrapRecord, IOPL_MASK, KERNEL_FRAME_SIZE};
use crate::segments;

pub struct SwitchEngine {
    to_user_scratch: TrapRecord,
    to_user_pending: bool,
    to_kernel_pending: bool,
}

// Holds raw frame pointers, but is only ever touched from the single-threaded
// trap context of one core.
unsafe impl Send for SwitchEngine {}

static SWITCH_ENGINE: Mutex<SwitchEngine> = Mutex::new(SwitchEngine::new());

pub fn switch_engine() -> &'static Mutex<SwitchEngine> {
    &SWITCH_ENGINE
}

impl SwitchEngine {
    pub const fn new() -> Self {
        Self {
            to_user_scratch: TrapRecord::new(),
            to_user_pending: false,
            to_kernel_pending: false,
        }
    }

    /// Retarget `frame`'s resumption to user privilege. No-op when the frame
    /// already resumes user code.
    ///
    /// # Safety
    ///
    /// `frame` must have been pushed by the entry stub (see
    /// [`TrapRecord`]); its resume slot is rewritten.
    pub unsafe fn switch_to_user(&mut self, frame: &mut TrapFrame) {
        if frame.cs == segments::USER_CODE.0 {
            return;
        }
        assert!(!self.to_user_pending, "user switch already pending");
        self.to_user_pending = true;

        log::trace!("retargeting resume to user mode, eip {:#x}", frame.eip);

        let scratch = &mut self.to_user_scratch.frame;
        *scratch = *frame;
        scratch.cs = segments::USER_CODE.0;
        scratch.ds = segments::USER_DATA.0;
        scratch.es = segments::USER_DATA.0;
        scratch.ss = segments::USER_DATA.0;
        // Resumption keeps using the stack region the kernel frame occupies:
        // the user-visible stack top is where the frame's own tail would sit.
        scratch.esp = frame as *const TrapFrame as usize + KERNEL_FRAME_SIZE;
        scratch.eflags |= Eflags::NT.bits() | IOPL_MASK;

        *resume_slot(frame) = scratch as *mut TrapFrame;
    }

    /// Retarget `frame`'s resumption to kernel privilege. No-op when the
    /// frame already resumes kernel code.
    ///
    /// # Safety
    ///
    /// `frame` must have been pushed by the entry stub, and its saved stack
    /// pointer must have [`KERNEL_FRAME_SIZE`] writable bytes below it: the
    /// kernel-resuming frame is written there.
    pub unsafe fn switch_to_kernel(&mut self, frame: &mut TrapFrame) {
        if frame.cs == segments::KERNEL_CODE.0 {
            return;
        }
        assert!(!self.to_kernel_pending, "kernel switch already pending");
        self.to_kernel_pending = true;

        log::trace!("retargeting resume to kernel mode, eip {:#x}", frame.eip);

        frame.cs = segments::KERNEL_CODE.0;
        frame.ds = segments::KERNEL_DATA.0;
        frame.es = segments::KERNEL_DATA.0;
        // Privileged: only possible because the switch itself runs in ring 0.
        frame.eflags &= !IOPL_MASK;

        let scratch = (frame.esp - KERNEL_FRAME_SIZE) as *mut TrapFrame;
        core::ptr::copy(
            (frame as *const TrapFrame).cast::<u8>(),
            scratch.cast::<u8>(),
            KERNEL_FRAME_SIZE,
        );

        *resume_slot(frame) = scratch;
    }

    /// The retargeted frame (if any) is about to be resumed; outstanding
    /// switches are consumed. Called on every trap-entry exit path.
    pub fn resume_complete(&mut self) {
        self.to_user_pending = false;
        self.to_kernel_pending = false;
    }
}

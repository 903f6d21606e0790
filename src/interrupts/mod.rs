//! The trap core: dispatch table, frame model, privilege switching, routing,
//! and the re-entrant entry point every trap funnels through.

pub mod dispatch;
pub mod frame;
pub mod idt;
pub mod pic;
pub mod switch;

pub use dispatch::{dispatch as trap_dispatch, tick_count, TrapKind};
pub use frame::{describe_trap, TrapFrame, TrapRecord};

use crate::hooks::{ExitCause, KernelServices};

/// Top-level trap handling. The low-level stub calls this for every trap;
/// when it returns, the stub restores the frame named by the resume slot.
///
/// Re-entrant: a trap taken while handling a trap nests on the native call
/// stack, and the current task's frame pointer is saved here and restored on
/// the way out, forming the frame chain. Whether the trap came from kernel
/// privilege is captured before dispatch, because dispatch may rewrite the
/// frame's selectors through a privilege switch.
pub fn on_trap(frame: &mut TrapFrame, kernel: &mut dyn KernelServices) {
    let from_kernel = frame.is_kernel();

    let saved = match kernel.current_task() {
        None => {
            // Boot and idle paths: no bookkeeping to do.
            dispatch::dispatch(frame, kernel);
            switch::switch_engine().lock().resume_complete();
            return;
        }
        Some(task) => core::mem::replace(&mut task.frame, frame as *mut TrapFrame),
    };

    dispatch::dispatch(frame, kernel);

    let task_state = kernel.current_task().map(|task| {
        task.frame = saved;
        (task.id, task.exiting, task.need_resched)
    });

    // Traps taken in kernel privilege are never torn down or preempted here;
    // the checks below only apply on the way back out to user context.
    if !from_kernel {
        if let Some((task, exiting, need_resched)) = task_state {
            if exiting {
                kernel.terminate(task, ExitCause::Killed);
            }
            if need_resched {
                kernel.yield_now();
            }
        }
    }

    switch::switch_engine().lock().resume_complete();
}

/// Bring up the interrupt machinery: dispatch table, remapped PICs, then
/// unmask interrupts. Called once during boot.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn init() {
    idt::init();
    unsafe { pic::PICS.lock().initialize() };
    x86_64::instructions::interrupts::enable();
    log::info!("interrupts enabled");
}

/// The symbol the generated entry stubs call. Binds the dispatcher to the
/// link-time kernel collaborators and acknowledges the PIC for hardware
/// vectors once handling is done.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[no_mangle]
pub extern "C" fn handle_trap(frame: *mut TrapFrame) {
    let frame = unsafe { &mut *frame };
    on_trap(frame, &mut crate::hooks::LinkedKernel);
    if pic::is_hardware_interrupt(frame.trapno) {
        unsafe {
            pic::PICS.lock().notify_end_of_interrupt(frame.trapno as u8);
        }
    }
}

//! Trap routing: one decision table from trap number to handling action.

use core::sync::atomic::{AtomicUsize, Ordering};

use x86_64::structures::idt::PageFaultErrorCode;

use super::frame::TrapFrame;
use super::idt::{
    PAGE_FAULT_VECTOR, SWITCH_TO_KERNEL_VECTOR, SWITCH_TO_USER_VECTOR, SYSCALL_VECTOR,
};
use super::pic::InterruptIndex;
use super::switch::switch_engine;
use crate::hooks::{ExitCause, InputDevice, KernelServices};

/// Timer events since boot. Written only from the timer arm below, which
/// cannot re-enter itself on one core.
static TICKS: AtomicUsize = AtomicUsize::new(0);

pub fn tick_count() -> usize {
    TICKS.load(Ordering::Relaxed)
}

/// The closed set of trap categories the dispatcher understands. Everything
/// else is deliberately an explicit `Unknown`, so adding a category is a
/// compile-checked decision rather than a fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    PageFault,
    Syscall,
    Timer,
    Serial,
    Keyboard,
    SwitchToUser,
    SwitchToKernel,
    DiskController,
    Unknown,
}

impl TrapKind {
    pub fn classify(vector: u32) -> TrapKind {
        const TIMER: u8 = InterruptIndex::Timer.as_u8();
        const KEYBOARD: u8 = InterruptIndex::Keyboard.as_u8();
        const COM1: u8 = InterruptIndex::Com1.as_u8();
        const PRIMARY_ATA: u8 = InterruptIndex::PrimaryAta.as_u8();
        const SECONDARY_ATA: u8 = InterruptIndex::SecondaryAta.as_u8();

        let Ok(vector) = u8::try_from(vector) else {
            return TrapKind::Unknown;
        };
        match vector {
            PAGE_FAULT_VECTOR => TrapKind::PageFault,
            SYSCALL_VECTOR => TrapKind::Syscall,
            TIMER => TrapKind::Timer,
            COM1 => TrapKind::Serial,
            KEYBOARD => TrapKind::Keyboard,
            SWITCH_TO_USER_VECTOR => TrapKind::SwitchToUser,
            SWITCH_TO_KERNEL_VECTOR => TrapKind::SwitchToKernel,
            PRIMARY_ATA | SECONDARY_ATA => TrapKind::DiskController,
            _ => TrapKind::Unknown,
        }
    }
}

/// Route one trap. Terminal outcomes never return; everything else resumes
/// the frame (possibly retargeted) when the caller unwinds back to the stub.
pub fn dispatch(frame: &mut TrapFrame, kernel: &mut dyn KernelServices) {
    match TrapKind::classify(frame.trapno) {
        TrapKind::PageFault => page_fault(frame, kernel),
        TrapKind::Syscall => kernel.invoke_syscall(frame),
        TrapKind::Timer => {
            TICKS.fetch_add(1, Ordering::Relaxed);
            let task = match kernel.current_task() {
                Some(task) => task.id,
                None => kernel.fatal(format_args!("timer interrupt with no running task")),
            };
            kernel.account_tick(task);
        }
        TrapKind::Serial => {
            let c = kernel.read_char(InputDevice::Serial);
            kernel.print(format_args!("serial [{:03}] {}\n", c, c as char));
        }
        TrapKind::Keyboard => {
            let c = kernel.read_char(InputDevice::Keyboard);
            kernel.print(format_args!("kbd [{:03}] {}\n", c, c as char));
            #[cfg(feature = "switch-demo")]
            demo_switch(c, frame, kernel);
        }
        TrapKind::SwitchToUser => unsafe { switch_engine().lock().switch_to_user(frame) },
        TrapKind::SwitchToKernel => unsafe { switch_engine().lock().switch_to_kernel(frame) },
        TrapKind::DiskController => {
            // Serviced by acknowledging the controller; no kernel-side work.
        }
        TrapKind::Unknown => unknown_trap(frame, kernel),
    }
}

fn print_fault_line(frame: &TrapFrame, addr: usize, kernel: &mut dyn KernelServices) {
    let code = PageFaultErrorCode::from_bits_truncate(u64::from(frame.err));
    kernel.print(format_args!(
        "page fault at 0x{:08x}: {}/{} [{}].\n",
        addr,
        if code.contains(PageFaultErrorCode::USER_MODE) { 'U' } else { 'K' },
        if code.contains(PageFaultErrorCode::CAUSED_BY_WRITE) { 'W' } else { 'R' },
        if code.contains(PageFaultErrorCode::PROTECTION_VIOLATION) {
            "protection fault"
        } else {
            "no page found"
        },
    ));
}

fn page_fault(frame: &mut TrapFrame, kernel: &mut dyn KernelServices) {
    let addr = kernel.fault_address();

    let owner = kernel.current_task().map(|task| (task.id, task.space));
    let Some((task, space)) = owner else {
        // A fault with nobody to charge it to is a kernel bug, full stop.
        kernel.print(format_args!("{}", frame));
        print_fault_line(frame, addr, kernel);
        kernel.fatal(format_args!("unhandled page fault at 0x{:08x}", addr));
    };

    let status = kernel.resolve_fault(space, frame.err, addr);
    if status == 0 {
        return;
    }

    log::warn!("page fault at {:#x} unresolved, status {}", addr, status);
    kernel.print(format_args!("{}", frame));
    print_fault_line(frame, addr, kernel);

    if frame.is_kernel() {
        kernel.fatal(format_args!(
            "page fault in kernel mode at 0x{:08x}, status {}",
            addr, status
        ));
    }
    kernel.print(format_args!("killed by kernel.\n"));
    kernel.terminate(task, ExitCause::Killed);
}

fn unknown_trap(frame: &mut TrapFrame, kernel: &mut dyn KernelServices) {
    log::warn!(
        "unhandled trap {} ({})",
        frame.trapno,
        super::frame::describe_trap(frame.trapno)
    );
    kernel.print(format_args!("{}", frame));
    let task = kernel.current_task().map(|task| task.id);
    match task {
        Some(task) => {
            kernel.print(format_args!("unhandled trap.\n"));
            kernel.terminate(task, ExitCause::Killed);
        }
        None => kernel.fatal(format_args!("unexpected trap {} in kernel", frame.trapno)),
    }
}

/// Keyboard-driven privilege switch exercise: '3' hops to user mode, '0'
/// back to kernel mode, each followed by a frame dump. Demonstration only,
/// hence the feature gate.
#[cfg(feature = "switch-demo")]
fn demo_switch(c: u8, frame: &mut TrapFrame, kernel: &mut dyn KernelServices) {
    match c {
        b'3' => {
            unsafe { switch_engine().lock().switch_to_user(frame) };
            kernel.print(format_args!("{}", frame));
        }
        b'0' => {
            unsafe { switch_engine().lock().switch_to_kernel(frame) };
            kernel.print(format_args!("{}", frame));
        }
        _ => {}
    }
}

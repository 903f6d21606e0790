//! Interfaces to the kernel subsystems the trap core drives.
//!
//! The dispatcher never calls into virtual memory, the scheduler, the syscall
//! layer or a driver directly; it goes through [`KernelServices`]. Host tests
//! implement the trait with recording mocks, and bare-metal builds bind it at
//! link time through the [`KernelIf`] interface.

use core::fmt;
use core::ptr;

use crate::interrupts::frame::TrapFrame;

/// Opaque handle naming a task for accounting and termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub usize);

/// Opaque handle naming the address space a fault is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceId(pub usize);

/// Why a task is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    Killed,
}

/// Character devices the dispatcher reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDevice {
    Serial,
    Keyboard,
}

/// The slice of a task's control block the trap core needs to see.
///
/// `frame` is the head of the task's trap frame chain. On trap entry the
/// previous value is saved on the dispatcher's own call stack and restored on
/// exit, so nested traps form a chain without any explicit stack structure.
pub struct Task {
    pub id: TaskId,
    pub space: SpaceId,
    pub frame: *mut TrapFrame,
    pub exiting: bool,
    pub need_resched: bool,
}

impl Task {
    pub const fn new(id: TaskId, space: SpaceId) -> Self {
        Self {
            id,
            space,
            frame: ptr::null_mut(),
            exiting: false,
            need_resched: false,
        }
    }
}

/// Everything outside the trap core, seen through one narrow interface.
pub trait KernelServices {
    /// The task currently running on this core, if any.
    fn current_task(&mut self) -> Option<&mut Task>;

    /// Ask virtual memory to satisfy a page fault. Zero means resolved.
    fn resolve_fault(&mut self, space: SpaceId, error: u32, addr: usize) -> i32;

    /// The faulting linear address latched by the processor (CR2).
    fn fault_address(&mut self) -> usize;

    /// Charge one timer tick to `task`.
    fn account_tick(&mut self, task: TaskId);

    /// Hand the processor to the scheduler; returns once rescheduled.
    fn yield_now(&mut self);

    /// Decode and run the system call described by `frame`'s register bank;
    /// the return value is delivered back into the same bank.
    fn invoke_syscall(&mut self, frame: &mut TrapFrame);

    /// Read one byte from `device`.
    fn read_char(&mut self, device: InputDevice) -> u8;

    /// Tear down `task`. Does not return.
    fn terminate(&mut self, task: TaskId, cause: ExitCause) -> !;

    /// Diagnostic print sink.
    fn print(&mut self, args: fmt::Arguments<'_>);

    /// Print a message and stop the processor permanently.
    fn fatal(&mut self, args: fmt::Arguments<'_>) -> !;
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod linked {
    use super::{ExitCause, InputDevice, KernelServices, SpaceId, Task, TaskId};
    use crate::interrupts::frame::TrapFrame;
    use core::fmt;
    use crate_interface::call_interface;

    /// Link-time binding of [`KernelServices`]. The kernel proper implements
    /// this with `#[crate_interface::impl_interface]`.
    #[crate_interface::def_interface]
    pub trait KernelIf {
        fn current_task() -> Option<&'static mut Task>;
        fn resolve_fault(space: SpaceId, error: u32, addr: usize) -> i32;
        fn fault_address() -> usize;
        fn account_tick(task: TaskId);
        fn yield_now();
        fn invoke_syscall(frame: &mut TrapFrame);
        fn read_char(device: InputDevice) -> u8;
        fn terminate(task: TaskId, cause: ExitCause);
        fn print(args: fmt::Arguments<'_>);
        fn fatal(args: fmt::Arguments<'_>);
    }

    /// Adapter handed to the dispatcher by the bare-metal trap entry.
    pub struct LinkedKernel;

    impl KernelServices for LinkedKernel {
        fn current_task(&mut self) -> Option<&mut Task> {
            call_interface!(KernelIf::current_task())
        }

        fn resolve_fault(&mut self, space: SpaceId, error: u32, addr: usize) -> i32 {
            call_interface!(KernelIf::resolve_fault(space, error, addr))
        }

        fn fault_address(&mut self) -> usize {
            call_interface!(KernelIf::fault_address())
        }

        fn account_tick(&mut self, task: TaskId) {
            call_interface!(KernelIf::account_tick(task))
        }

        fn yield_now(&mut self) {
            call_interface!(KernelIf::yield_now())
        }

        fn invoke_syscall(&mut self, frame: &mut TrapFrame) {
            call_interface!(KernelIf::invoke_syscall(frame))
        }

        fn read_char(&mut self, device: InputDevice) -> u8 {
            call_interface!(KernelIf::read_char(device))
        }

        fn terminate(&mut self, task: TaskId, cause: ExitCause) -> ! {
            call_interface!(KernelIf::terminate(task, cause));
            unreachable!("terminate returned")
        }

        fn print(&mut self, args: fmt::Arguments<'_>) {
            call_interface!(KernelIf::print(args))
        }

        fn fatal(&mut self, args: fmt::Arguments<'_>) -> ! {
            call_interface!(KernelIf::fatal(args));
            unreachable!("fatal returned")
        }
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use linked::{KernelIf, LinkedKernel};

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::interrupts::frame::TrapRecord;
    use crate::interrupts::on_trap;
    use std::fmt::Write as _;

    /// Recording implementation of [`KernelServices`] for the unit tests.
    ///
    /// The diverging operations are emulated with panics: `terminate` panics
    /// with the literal `"terminate"` after recording the call, `fatal` with a
    /// message starting `"fatal: "`. Tests observe them via `catch_unwind`.
    pub struct MockKernel {
        pub task: Option<Task>,
        pub console: String,
        pub fault_status: i32,
        pub fault_addr: usize,
        pub faults: Vec<(SpaceId, u32, usize)>,
        pub ticks_accounted: Vec<TaskId>,
        pub yields: usize,
        pub syscalls: usize,
        pub next_char: u8,
        pub reads: Vec<InputDevice>,
        pub terminations: Vec<(TaskId, ExitCause)>,
        /// When set, the next `invoke_syscall` takes a nested timer trap.
        pub nest_timer: bool,
        pub chain_during_nested: Option<bool>,
        pub chain_after_nested: Option<bool>,
        pub frame_at_tick: Option<*mut TrapFrame>,
    }

    impl MockKernel {
        pub fn new() -> Self {
            Self {
                task: None,
                console: String::new(),
                fault_status: 0,
                fault_addr: 0,
                faults: Vec::new(),
                ticks_accounted: Vec::new(),
                yields: 0,
                syscalls: 0,
                next_char: b'x',
                reads: Vec::new(),
                terminations: Vec::new(),
                nest_timer: false,
                chain_during_nested: None,
                chain_after_nested: None,
                frame_at_tick: None,
            }
        }

        pub fn with_task() -> Self {
            let mut mock = Self::new();
            mock.task = Some(Task::new(TaskId(7), SpaceId(1)));
            mock
        }
    }

    impl KernelServices for MockKernel {
        fn current_task(&mut self) -> Option<&mut Task> {
            self.task.as_mut()
        }

        fn resolve_fault(&mut self, space: SpaceId, error: u32, addr: usize) -> i32 {
            self.faults.push((space, error, addr));
            self.fault_status
        }

        fn fault_address(&mut self) -> usize {
            self.fault_addr
        }

        fn account_tick(&mut self, task: TaskId) {
            self.frame_at_tick = self.task.as_ref().map(|t| t.frame);
            self.ticks_accounted.push(task);
        }

        fn yield_now(&mut self) {
            self.yields += 1;
        }

        fn invoke_syscall(&mut self, frame: &mut TrapFrame) {
            self.syscalls += 1;
            if self.nest_timer {
                self.nest_timer = false;
                let syscall_frame = frame as *mut TrapFrame;
                let mut nested = TrapRecord::new();
                nested.frame.cs = crate::segments::KERNEL_CODE.0;
                nested.frame.trapno =
                    u32::from(crate::interrupts::pic::InterruptIndex::Timer.as_u8());
                let nested_ptr = &mut nested.frame as *mut TrapFrame;
                on_trap(&mut nested.frame, self);
                self.chain_during_nested = Some(self.frame_at_tick == Some(nested_ptr));
                self.chain_after_nested =
                    Some(self.task.as_ref().map(|t| t.frame) == Some(syscall_frame));
            }
        }

        fn read_char(&mut self, device: InputDevice) -> u8 {
            self.reads.push(device);
            self.next_char
        }

        fn terminate(&mut self, task: TaskId, cause: ExitCause) -> ! {
            self.terminations.push((task, cause));
            panic!("terminate");
        }

        fn print(&mut self, args: fmt::Arguments<'_>) {
            let _ = self.console.write_fmt(args);
        }

        fn fatal(&mut self, args: fmt::Arguments<'_>) -> ! {
            panic!("fatal: {}", args);
        }
    }
}

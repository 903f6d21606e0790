//! Trap and interrupt core of the ringzero kernel.
//!
//! This crate owns the interrupt dispatch table, the trap frame layout, the
//! privilege switch machinery and the trap dispatcher. Everything else the
//! kernel does (virtual memory, scheduling, system calls, drivers) is reached
//! through the narrow [`hooks::KernelServices`] interface, so the whole core
//! can be exercised on the host without a machine underneath it.

#![cfg_attr(not(test), no_std)]

pub mod hooks;
pub mod interrupts;
#[cfg(target_arch = "x86_64")]
pub mod logging;
pub mod segments;

#[cfg(target_arch = "x86_64")]
use spin::Mutex;
#[cfg(target_arch = "x86_64")]
use uart_16550::SerialPort;

#[cfg(target_arch = "x86_64")]
pub static SERIAL: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(0x3F8) });

#[cfg(target_arch = "x86_64")]
#[macro_export]
macro_rules! println {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut serial = $crate::SERIAL.lock();
        let _ = writeln!(serial, $($arg)*);
    }};
}

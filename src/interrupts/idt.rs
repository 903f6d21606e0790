//! Interrupt dispatch table.
//!
//! Built at run time because the generated entry-stub addresses are not
//! available as relocation constants. Every vector gets a kernel-only
//! interrupt gate; the two software entries user code may raise directly are
//! then opened up, and the table is activated with `lidt` through the
//! pseudo-descriptor.

use core::mem::{size_of, size_of_val};

use x86_64::structures::DescriptorTablePointer;
use x86_64::{PrivilegeLevel, VirtAddr};

use crate::segments;

pub const IDT_ENTRIES: usize = 256;

pub const PAGE_FAULT_VECTOR: u8 = 14;
pub const SYSCALL_VECTOR: u8 = 0x80;
pub const SWITCH_TO_USER_VECTOR: u8 = 120;
pub const SWITCH_TO_KERNEL_VECTOR: u8 = 121;

/// Gate kind. A trap gate leaves the interrupt-enable flag untouched on
/// entry; an interrupt gate clears it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    Interrupt = 0x0E,
    Trap = 0x0F,
}

const GATE_PRESENT: u8 = 0x80;

/// One dispatch table entry. The hardware wants the stub address split into
/// two halves around the selector and attribute bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    offset_low: u16,
    selector: u16,
    _reserved: u8,
    attr: u8,
    offset_high: u16,
}

const _: () = assert!(size_of::<Gate>() == 8);

impl Gate {
    pub const fn new(
        kind: GateKind,
        selector: x86_64::structures::gdt::SegmentSelector,
        offset: usize,
        dpl: PrivilegeLevel,
    ) -> Self {
        Self {
            offset_low: offset as u16,
            selector: selector.0,
            _reserved: 0,
            attr: GATE_PRESENT | ((dpl as u8) << 5) | kind as u8,
            offset_high: (offset >> 16) as u16,
        }
    }

    pub fn is_present(&self) -> bool {
        self.attr & GATE_PRESENT != 0
    }

    pub fn kind(&self) -> GateKind {
        if self.attr & 0x0F == GateKind::Trap as u8 {
            GateKind::Trap
        } else {
            GateKind::Interrupt
        }
    }

    pub fn dpl(&self) -> PrivilegeLevel {
        PrivilegeLevel::from_u16(u16::from((self.attr >> 5) & 0b11))
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn offset(&self) -> usize {
        (usize::from(self.offset_high) << 16) | usize::from(self.offset_low)
    }
}

/// The full 256-entry table mapping trap numbers to entry stubs.
pub struct DispatchTable {
    gates: [Gate; IDT_ENTRIES],
}

impl DispatchTable {
    /// Build the table over the generated entry stubs. Every slot is
    /// populated — vectors nothing routes still land in their stub and reach
    /// the dispatcher's unknown-trap arm.
    pub fn build(stubs: &[usize; IDT_ENTRIES]) -> Self {
        let mut gates: [Gate; IDT_ENTRIES] = core::array::from_fn(|vector| {
            Gate::new(
                GateKind::Interrupt,
                segments::KERNEL_CODE,
                stubs[vector],
                PrivilegeLevel::Ring0,
            )
        });

        // The two entries user code is allowed to raise directly. The system
        // call gate is a trap gate so interrupts stay enabled across the call.
        gates[usize::from(SWITCH_TO_USER_VECTOR)] = Gate::new(
            GateKind::Interrupt,
            segments::KERNEL_CODE,
            stubs[usize::from(SWITCH_TO_USER_VECTOR)],
            PrivilegeLevel::Ring3,
        );
        gates[usize::from(SYSCALL_VECTOR)] = Gate::new(
            GateKind::Trap,
            segments::KERNEL_CODE,
            stubs[usize::from(SYSCALL_VECTOR)],
            PrivilegeLevel::Ring3,
        );

        DispatchTable { gates }
    }

    pub fn gate(&self, vector: u8) -> &Gate {
        &self.gates[usize::from(vector)]
    }

    /// The pseudo-descriptor handed to the table-load instruction. Built once
    /// at boot and never mutated afterwards.
    pub fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: (size_of_val(&self.gates) - 1) as u16,
            base: VirtAddr::from_ptr(self.gates.as_ptr()),
        }
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod install {
    use super::{DispatchTable, IDT_ENTRIES};
    use spin::Lazy;
    use x86_64::structures::DescriptorTablePointer;

    extern "C" {
        /// Entry stub table generated alongside the low-level trap code.
        static __vectors: [usize; IDT_ENTRIES];
    }

    static IDT: Lazy<DispatchTable> =
        Lazy::new(|| DispatchTable::build(unsafe { &__vectors }));

    static IDT_POINTER: Lazy<DescriptorTablePointer> = Lazy::new(|| IDT.pointer());

    /// Build and activate the dispatch table. Called exactly once during
    /// boot, before interrupts are enabled.
    pub fn init() {
        unsafe { x86_64::instructions::tables::lidt(&IDT_POINTER) };
        log::info!("interrupt dispatch table loaded ({} gates)", IDT_ENTRIES);
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use install::init;

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_table() -> [usize; IDT_ENTRIES] {
        core::array::from_fn(|vector| 0x0010_0000 + vector * 16)
    }

    #[test]
    fn every_slot_is_populated_with_the_kernel_selector() {
        let stubs = stub_table();
        let table = DispatchTable::build(&stubs);
        for vector in 0..IDT_ENTRIES {
            let gate = table.gate(vector as u8);
            assert!(gate.is_present());
            assert_eq!(gate.selector(), segments::KERNEL_CODE.0);
            assert_eq!(gate.offset(), stubs[vector]);
        }
    }

    #[test]
    fn only_the_software_switch_vectors_are_user_invokable() {
        let table = DispatchTable::build(&stub_table());
        for vector in 0..IDT_ENTRIES {
            let expected = if vector == usize::from(SWITCH_TO_USER_VECTOR)
                || vector == usize::from(SYSCALL_VECTOR)
            {
                PrivilegeLevel::Ring3
            } else {
                PrivilegeLevel::Ring0
            };
            assert_eq!(table.gate(vector as u8).dpl(), expected, "vector {}", vector);
        }
    }

    #[test]
    fn only_the_syscall_gate_keeps_interrupts_enabled() {
        let table = DispatchTable::build(&stub_table());
        for vector in 0..IDT_ENTRIES {
            let expected = if vector == usize::from(SYSCALL_VECTOR) {
                GateKind::Trap
            } else {
                GateKind::Interrupt
            };
            assert_eq!(table.gate(vector as u8).kind(), expected, "vector {}", vector);
        }
    }

    #[test]
    fn pseudo_descriptor_covers_the_whole_table() {
        let table = DispatchTable::build(&stub_table());
        let pointer = table.pointer();
        assert_eq!(pointer.limit, (IDT_ENTRIES * size_of::<Gate>() - 1) as u16);
        assert_eq!(pointer.base.as_u64(), table.gates.as_ptr() as u64);
    }
}

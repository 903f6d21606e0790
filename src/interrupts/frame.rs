//! Trap frame layout and diagnostics.
//!
//! The structures here are the contract with the hand-written entry and
//! return stubs: the stub pushes exactly this shape on every trap, and the
//! return path reads the resume pointer directly below the frame to find the
//! frame it will restore. Field order and width are fixed; nothing may be
//! reordered or added without touching the stubs.

use core::fmt;
use core::mem::{offset_of, size_of};
use core::ptr;

use bitflags::bitflags;

use super::pic::PIC_1_OFFSET;
use crate::segments;

/// General-purpose register bank, in the order the entry stub pushes it.
/// `oesp` is the stack pointer slot the push-all sequence produces; it is
/// dead on restore but part of the layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

impl GpRegs {
    pub const fn new() -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebp: 0,
            oesp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
        }
    }
}

/// Snapshot of an interrupted execution context.
///
/// The fields from `err` down are pushed by the processor itself; everything
/// above is pushed by the entry stub. `esp` and `ss` are only present on the
/// stack when the trap crossed a privilege boundary — a frame taken in kernel
/// mode ends at `eflags`, which is why [`KERNEL_FRAME_SIZE`] exists.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    pub regs: GpRegs,
    pub gs: u16,
    _pad0: u16,
    pub fs: u16,
    _pad1: u16,
    pub es: u16,
    _pad2: u16,
    pub ds: u16,
    _pad3: u16,
    pub trapno: u32,
    pub err: u32,
    pub eip: usize,
    pub cs: u16,
    _pad4: u16,
    pub eflags: u32,
    pub esp: usize,
    pub ss: u16,
    _pad5: u16,
}

impl TrapFrame {
    pub const fn new() -> Self {
        Self {
            regs: GpRegs::new(),
            gs: 0,
            _pad0: 0,
            fs: 0,
            _pad1: 0,
            es: 0,
            _pad2: 0,
            ds: 0,
            _pad3: 0,
            trapno: 0,
            err: 0,
            eip: 0,
            cs: 0,
            _pad4: 0,
            eflags: 0,
            esp: 0,
            ss: 0,
            _pad5: 0,
        }
    }

    /// True iff the snapshot was taken while executing kernel code.
    pub fn is_kernel(&self) -> bool {
        self.cs == segments::KERNEL_CODE.0
    }
}

/// Size of the non-stack portion of a frame: what the stub pushes for a trap
/// that did not cross a privilege boundary. Derived from the layout here and
/// nowhere else.
pub const KERNEL_FRAME_SIZE: usize = offset_of!(TrapFrame, esp);

/// What the entry stub actually leaves on the stack: the frame, preceded by
/// the resume pointer the return path dereferences to find the frame to
/// restore. Retargeting that pointer is how the privilege switch redirects
/// resumption to a frame of a different size without moving the original.
#[repr(C)]
pub struct TrapRecord {
    pub resume: *mut TrapFrame,
    pub frame: TrapFrame,
}

impl TrapRecord {
    pub const fn new() -> Self {
        Self {
            resume: ptr::null_mut(),
            frame: TrapFrame::new(),
        }
    }
}

const _: () = assert!(offset_of!(TrapRecord, frame) == size_of::<*mut TrapFrame>());

/// The resume slot belonging to `frame`.
///
/// # Safety
///
/// `frame` must be the frame of a [`TrapRecord`] (equivalently: pushed by the
/// entry stub), so that the pointer-sized slot directly below it is the
/// resume pointer and nothing else.
pub unsafe fn resume_slot(frame: *mut TrapFrame) -> *mut *mut TrapFrame {
    frame.cast::<*mut TrapFrame>().sub(1)
}

bitflags! {
    /// Single-bit EFLAGS fields, named as the architecture names them.
    /// IOPL is a two-bit field and is handled separately via [`IOPL_MASK`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Eflags: u32 {
        const CF = 1 << 0;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const TF = 1 << 8;
        const IF = 1 << 9;
        const DF = 1 << 10;
        const OF = 1 << 11;
        const NT = 1 << 14;
        const RF = 1 << 16;
        const VM = 1 << 17;
        const AC = 1 << 18;
        const VIF = 1 << 19;
        const VIP = 1 << 20;
        const ID = 1 << 21;
    }
}

/// I/O privilege level field of EFLAGS, bits 12-13.
pub const IOPL_MASK: u32 = 0x3000;
pub const IOPL_SHIFT: u32 = 12;

const EXCEPTION_NAMES: [&str; 20] = [
    "Divide error",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "BOUND Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection",
    "Page Fault",
    "(unknown trap)",
    "x87 FPU Floating-Point Error",
    "Alignment Check",
    "Machine-Check",
    "SIMD Floating-Point Exception",
];

/// Human-readable name for a trap number. Total: every input yields a
/// non-empty name.
pub fn describe_trap(vector: u32) -> &'static str {
    if let Some(name) = EXCEPTION_NAMES.get(vector as usize).copied() {
        return name;
    }
    let irq_base = u32::from(PIC_1_OFFSET);
    if (irq_base..irq_base + 16).contains(&vector) {
        "Hardware Interrupt"
    } else {
        "(unknown trap)"
    }
}

impl fmt::Display for GpRegs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  edi  0x{:08x}", self.edi)?;
        writeln!(f, "  esi  0x{:08x}", self.esi)?;
        writeln!(f, "  ebp  0x{:08x}", self.ebp)?;
        writeln!(f, "  oesp 0x{:08x}", self.oesp)?;
        writeln!(f, "  ebx  0x{:08x}", self.ebx)?;
        writeln!(f, "  edx  0x{:08x}", self.edx)?;
        writeln!(f, "  ecx  0x{:08x}", self.ecx)?;
        writeln!(f, "  eax  0x{:08x}", self.eax)
    }
}

impl fmt::Display for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "trapframe at {:p}", self)?;
        write!(f, "{}", self.regs)?;
        writeln!(f, "  ds   0x----{:04x}", self.ds)?;
        writeln!(f, "  es   0x----{:04x}", self.es)?;
        writeln!(f, "  fs   0x----{:04x}", self.fs)?;
        writeln!(f, "  gs   0x----{:04x}", self.gs)?;
        writeln!(f, "  trap 0x{:08x} {}", self.trapno, describe_trap(self.trapno))?;
        writeln!(f, "  err  0x{:08x}", self.err)?;
        writeln!(f, "  eip  0x{:08x}", self.eip)?;
        writeln!(f, "  cs   0x----{:04x}", self.cs)?;
        write!(f, "  flag 0x{:08x} ", self.eflags)?;
        for (name, _) in Eflags::from_bits_truncate(self.eflags).iter_names() {
            write!(f, "{},", name)?;
        }
        writeln!(f, "IOPL={}", (self.eflags & IOPL_MASK) >> IOPL_SHIFT)?;
        if !self.is_kernel() {
            writeln!(f, "  esp  0x{:08x}", self.esp)?;
            writeln!(f, "  ss   0x----{:04x}", self.ss)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_slot_sits_directly_below_the_frame() {
        let mut record = TrapRecord::new();
        let slot = unsafe { resume_slot(&mut record.frame) };
        assert_eq!(slot, &mut record.resume as *mut *mut TrapFrame);
    }

    #[test]
    fn kernel_frame_omits_the_stack_tail() {
        assert_eq!(KERNEL_FRAME_SIZE, offset_of!(TrapFrame, esp));
        assert!(KERNEL_FRAME_SIZE < size_of::<TrapFrame>());
    }

    #[test]
    fn describe_trap_is_total() {
        for vector in 0..=255u32 {
            assert!(!describe_trap(vector).is_empty());
        }
        assert_eq!(describe_trap(0), "Divide error");
        assert_eq!(describe_trap(13), "General Protection");
        assert_eq!(describe_trap(14), "Page Fault");
        assert_eq!(describe_trap(15), "(unknown trap)");
        for irq in 0..16u32 {
            assert_eq!(
                describe_trap(u32::from(PIC_1_OFFSET) + irq),
                "Hardware Interrupt"
            );
        }
        assert_eq!(describe_trap(250), "(unknown trap)");
        assert_eq!(describe_trap(u32::MAX), "(unknown trap)");
    }

    #[test]
    fn kernel_frame_detection() {
        let mut tf = TrapFrame::new();
        tf.cs = crate::segments::KERNEL_CODE.0;
        assert!(tf.is_kernel());
        tf.cs = crate::segments::USER_CODE.0;
        assert!(!tf.is_kernel());
    }

    #[test]
    fn display_decodes_flags_and_iopl() {
        let mut tf = TrapFrame::new();
        tf.cs = crate::segments::KERNEL_CODE.0;
        tf.eflags = Eflags::IF.bits() | Eflags::ZF.bits() | IOPL_MASK;
        let text = format!("{}", tf);
        assert!(text.contains("IF,"));
        assert!(text.contains("ZF,"));
        assert!(text.contains("IOPL=3"));
    }

    #[test]
    fn stack_fields_render_only_for_user_frames() {
        let mut tf = TrapFrame::new();
        tf.cs = crate::segments::KERNEL_CODE.0;
        assert!(!format!("{}", tf).contains("  esp"));
        tf.cs = crate::segments::USER_CODE.0;
        tf.esp = 0xdeadbee0;
        tf.ss = crate::segments::USER_DATA.0;
        let text = format!("{}", tf);
        assert!(text.contains("  esp  0xdeadbee0"));
        assert!(text.contains("  ss   0x----0023"));
    }

    #[test]
    fn frame_names_its_own_trap() {
        let mut tf = TrapFrame::new();
        tf.cs = crate::segments::KERNEL_CODE.0;
        tf.trapno = 14;
        assert!(format!("{}", tf).contains("Page Fault"));
    }
}

//! 8259 PIC remapping and the hardware interrupt vector map.
//!
//! IRQ 0-15 are remapped above the CPU exception range:
//! - PIC 1: vectors 32-39 (IRQ 0-7)
//! - PIC 2: vectors 40-47 (IRQ 8-15)

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = 40;

#[cfg(target_arch = "x86_64")]
pub static PICS: spin::Mutex<pic8259::ChainedPics> =
    spin::Mutex::new(unsafe { pic8259::ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

// Hardware interrupt vectors the dispatcher routes, as the CPU sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,            // IRQ0
    Keyboard = PIC_1_OFFSET + 1,     // IRQ1
    Com1 = PIC_1_OFFSET + 4,         // IRQ4
    PrimaryAta = PIC_1_OFFSET + 14,  // IRQ14
    SecondaryAta = PIC_1_OFFSET + 15, // IRQ15
}

impl InterruptIndex {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn as_usize(self) -> usize {
        self.as_u8() as usize
    }
}

/// True iff `vector` belongs to the remapped hardware interrupt range.
pub fn is_hardware_interrupt(vector: u32) -> bool {
    let base = u32::from(PIC_1_OFFSET);
    (base..base + 16).contains(&vector)
}

//! Segment selectors shared with the boot code.
//!
//! The GDT itself is built by the boot path before this crate runs; the trap
//! core only needs the selector values to recognize which privilege level a
//! saved frame belongs to and to rewrite frames during privilege switches.
//! The layout is fixed: kernel code, kernel data, user code, user data.

use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

pub const KERNEL_CODE: SegmentSelector = SegmentSelector::new(1, PrivilegeLevel::Ring0);
pub const KERNEL_DATA: SegmentSelector = SegmentSelector::new(2, PrivilegeLevel::Ring0);
pub const USER_CODE: SegmentSelector = SegmentSelector::new(3, PrivilegeLevel::Ring3);
pub const USER_DATA: SegmentSelector = SegmentSelector::new(4, PrivilegeLevel::Ring3);

//! CPU Status Register (P register) flags.
//!
//! The 6502 status register is an 8-bit register that contains various flags
//! reflecting the state of the processor:
//!
//! ```text
//! 7  6  5  4  3  2  1  0
//! N  V  U  B  D  I  Z  C
//! │  │  │  │  │  │  │  └─ Carry
//! │  │  │  │  │  │  └──── Zero
//! │  │  │  │  │  └─────── Interrupt Disable
//! │  │  │  │  └────────── Decimal Mode (settable but does not alter arithmetic)
//! │  │  │  └───────────── Break (1 when pushed from PHP/BRK, 0 from IRQ/NMI)
//! │  │  └──────────────── Unused (always 1 when pushed to stack)
//! │  └─────────────────── Overflow
//! └────────────────────── Negative
//! ```
//!
//! The serialization order is part of the hardware contract: software
//! routinely pushes P, masks bits out of the stack copy, and pulls it back.
//! All packing and unpacking therefore happens through explicit bit
//! positions, never through field ordering.

use bitflags::bitflags;

bitflags! {
    /// CPU Status Register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Status: u8 {
        /// Carry flag - Set if the last operation carried out of bit 7
        /// or, for right shifts, out of bit 0.
        const C = 1 << 0;

        /// Zero flag - Set if the result of the last operation was zero.
        const Z = 1 << 1;

        /// Interrupt Disable flag - When set, IRQ interrupts are ignored.
        /// NMI interrupts are not affected.
        const I = 1 << 2;

        /// Decimal Mode flag - Settable and observable, but arithmetic
        /// ignores it (the NES variant of the 6502 has no BCD unit).
        const D = 1 << 3;

        /// Break flag - Distinguishes software interrupts from hardware ones.
        /// Forced to 1 in bytes pushed by PHP or BRK, 0 in bytes pushed by
        /// IRQ or NMI.
        const B = 1 << 4;

        /// Unused flag - Forced to 1 in every byte pushed to the stack.
        const U = 1 << 5;

        /// Overflow flag - Set if the last operation caused a signed overflow.
        const V = 1 << 6;

        /// Negative flag - Set if bit 7 of the result is set.
        const N = 1 << 7;
    }
}

impl Status {
    /// Initial status after power-on: I set, U set (0x24).
    pub const POWER_ON: Self = Self::I.union(Self::U);

    /// Creates a new status register in the power-on state.
    #[must_use]
    pub const fn new() -> Self {
        Self::POWER_ON
    }

    /// Sets or clears the Zero and Negative flags based on a value.
    #[inline]
    pub fn set_zn(&mut self, value: u8) {
        self.set(Self::Z, value == 0);
        self.set(Self::N, value & 0x80 != 0);
    }

    /// Serializes the register for a stack push.
    ///
    /// The U bit is forced set in the pushed byte. `software` is true for
    /// pushes performed by BRK and PHP, which additionally force the B bit;
    /// hardware interrupts (NMI/IRQ) push B clear.
    #[inline]
    #[must_use]
    pub const fn pushed(self, software: bool) -> u8 {
        let mut value = self.bits() | Self::U.bits();
        if software {
            value |= Self::B.bits();
        }
        value
    }

    /// Reconstructs the register from a byte pulled off the stack.
    ///
    /// All eight bits are written through, including B and U; the push path
    /// re-forces them, so a pulled B/U never leaks into a pushed byte with
    /// the wrong value.
    #[inline]
    #[must_use]
    pub const fn from_pulled(value: u8) -> Self {
        Self::from_bits_retain(value)
    }
}

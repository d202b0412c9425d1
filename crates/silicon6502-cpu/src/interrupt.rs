//! Interrupt types and their per-kind service parameters.
//!
//! The 6502 services four kinds of interrupt through one shared 7-cycle
//! sequence; the differences between them (vector location, whether PC and P
//! are pushed, how the B and I flags are treated) are captured here so the
//! sequence itself can stay generic.

use crate::vectors;

/// An interrupt kind: the three hardware lines plus the software BRK path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interrupt {
    /// Reset. Vector at `$FFFC`; nothing is pushed (the stack pointer is
    /// still decremented three times, which is how SP lands on `$FD`).
    Rst,
    /// Non-maskable interrupt. Vector at `$FFFA`.
    Nmi,
    /// Maskable interrupt request. Vector at `$FFFE`; ignored while the
    /// I flag is set.
    Irq,
    /// Software interrupt (the BRK instruction). Shares the `$FFFE` vector
    /// with IRQ but pushes P with the B flag set.
    Brk,
}

impl Interrupt {
    /// Memory location of the little-endian service vector.
    #[must_use]
    pub const fn vector(self) -> u16 {
        match self {
            Self::Rst => vectors::RESET,
            Self::Nmi => vectors::NMI,
            Self::Irq | Self::Brk => vectors::IRQ,
        }
    }

    /// Whether the I flag masks this interrupt.
    #[must_use]
    pub const fn maskable(self) -> bool {
        matches!(self, Self::Irq)
    }

    /// Whether the service sequence pushes PC and P.
    #[must_use]
    pub const fn pushes_pc(self) -> bool {
        !matches!(self, Self::Rst)
    }

    /// Value the B flag takes in the pushed status byte.
    #[must_use]
    pub const fn sets_b(self) -> bool {
        matches!(self, Self::Brk)
    }

    /// Whether the I flag is set while servicing.
    #[must_use]
    pub const fn sets_i(self) -> bool {
        !matches!(self, Self::Nmi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vectors() {
        assert_eq!(Interrupt::Nmi.vector(), 0xFFFA);
        assert_eq!(Interrupt::Rst.vector(), 0xFFFC);
        assert_eq!(Interrupt::Irq.vector(), 0xFFFE);
        assert_eq!(Interrupt::Brk.vector(), 0xFFFE);
    }

    #[test]
    fn test_service_parameters() {
        // Only IRQ is maskable
        assert!(Interrupt::Irq.maskable());
        assert!(!Interrupt::Nmi.maskable());
        assert!(!Interrupt::Rst.maskable());
        assert!(!Interrupt::Brk.maskable());

        // Only RST skips the pushes
        assert!(!Interrupt::Rst.pushes_pc());
        assert!(Interrupt::Nmi.pushes_pc());
        assert!(Interrupt::Irq.pushes_pc());
        assert!(Interrupt::Brk.pushes_pc());

        // Only BRK pushes B set
        assert!(Interrupt::Brk.sets_b());
        assert!(!Interrupt::Irq.sets_b());

        // All except NMI set I
        assert!(Interrupt::Rst.sets_i());
        assert!(Interrupt::Irq.sets_i());
        assert!(Interrupt::Brk.sets_i());
        assert!(!Interrupt::Nmi.sets_i());
    }
}

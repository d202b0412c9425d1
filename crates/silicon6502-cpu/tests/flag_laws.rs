//! Property tests for the arithmetic flag laws.
//!
//! Programs are assembled from random operands and run through the full
//! cycle-stepped core, then the resulting flags are compared against wide
//! integer models of the operations.

use proptest::prelude::*;
use silicon6502_cpu::{Bus, Cpu, Status};

struct TestBus {
    memory: [u8; 65536],
}

impl Bus for TestBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.memory[addr as usize]
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.memory[addr as usize] = value;
    }
}

/// Assembles `program` at $8000 and runs exactly `cycles` clocks after
/// reset.
fn run_program(program: &[u8], cycles: u32) -> Cpu {
    let mut bus = TestBus {
        memory: [0; 65536],
    };
    for (i, &byte) in program.iter().enumerate() {
        bus.memory[0x8000 + i] = byte;
    }
    bus.memory[0xFFFC] = 0x00;
    bus.memory[0xFFFD] = 0x80;

    let mut cpu = Cpu::new();
    cpu.reset(&mut bus).unwrap();
    for _ in 0..cycles {
        cpu.cycle(&mut bus).unwrap();
    }
    cpu
}

fn carry_op(carry_in: bool) -> u8 {
    if carry_in {
        0x38 // SEC
    } else {
        0x18 // CLC
    }
}

proptest! {
    #[test]
    fn adc_matches_wide_arithmetic(a in any::<u8>(), m in any::<u8>(), carry_in in any::<bool>()) {
        // CLC/SEC; LDA #a; ADC #m
        let cpu = run_program(&[carry_op(carry_in), 0xA9, a, 0x69, m], 6);
        let regs = cpu.registers();

        let wide = u16::from(a) + u16::from(m) + u16::from(carry_in);
        let result = wide as u8;

        prop_assert_eq!(regs.a, result);
        prop_assert_eq!(regs.status.contains(Status::C), wide > 0xFF);
        prop_assert_eq!(regs.status.contains(Status::Z), result == 0);
        prop_assert_eq!(regs.status.contains(Status::N), result & 0x80 != 0);
        // Signed overflow: inputs share a sign the result does not
        let signed_overflow = (!(a ^ m) & (a ^ result) & 0x80) != 0;
        prop_assert_eq!(regs.status.contains(Status::V), signed_overflow);
    }

    #[test]
    fn sbc_is_adc_of_complement(a in any::<u8>(), m in any::<u8>(), carry_in in any::<bool>()) {
        let sbc = run_program(&[carry_op(carry_in), 0xA9, a, 0xE9, m], 6);
        let adc = run_program(&[carry_op(carry_in), 0xA9, a, 0x69, !m], 6);

        prop_assert_eq!(sbc.registers().a, adc.registers().a);
        prop_assert_eq!(sbc.registers().status, adc.registers().status);
    }

    #[test]
    fn compare_sets_flags_without_mutating(reg in any::<u8>(), m in any::<u8>()) {
        // LDA #reg; CMP #m
        let cpu = run_program(&[0xA9, reg, 0xC9, m], 4);
        let regs = cpu.registers();

        prop_assert_eq!(regs.a, reg);
        prop_assert_eq!(regs.status.contains(Status::C), reg >= m);
        prop_assert_eq!(regs.status.contains(Status::Z), reg == m);
        let diff = reg.wrapping_sub(m);
        prop_assert_eq!(regs.status.contains(Status::N), diff & 0x80 != 0);
    }

    #[test]
    fn cpx_cpy_match_cmp(reg in any::<u8>(), m in any::<u8>()) {
        let cmp = run_program(&[0xA9, reg, 0xC9, m], 4);
        let cpx = run_program(&[0xA2, reg, 0xE0, m], 4);
        let cpy = run_program(&[0xA0, reg, 0xC0, m], 4);

        prop_assert_eq!(cpx.registers().status, cmp.registers().status);
        prop_assert_eq!(cpy.registers().status, cmp.registers().status);
        prop_assert_eq!(cpx.registers().x, reg);
        prop_assert_eq!(cpy.registers().y, reg);
    }

    #[test]
    fn asl_shifts_into_carry(a in any::<u8>()) {
        // LDA #a; ASL A
        let cpu = run_program(&[0xA9, a, 0x0A], 4);
        let regs = cpu.registers();

        prop_assert_eq!(regs.a, a << 1);
        prop_assert_eq!(regs.status.contains(Status::C), a & 0x80 != 0);
        prop_assert_eq!(regs.status.contains(Status::Z), a << 1 == 0);
    }

    #[test]
    fn rol_ror_round_trip(a in any::<u8>(), carry_in in any::<bool>()) {
        // CLC/SEC; LDA #a; ROL A; ROR A restores A and the carry
        let cpu = run_program(&[carry_op(carry_in), 0xA9, a, 0x2A, 0x6A], 8);
        let regs = cpu.registers();

        prop_assert_eq!(regs.a, a);
        prop_assert_eq!(regs.status.contains(Status::C), carry_in);
    }

    #[test]
    fn load_sets_zn(value in any::<u8>()) {
        let cpu = run_program(&[0xA9, value], 2);
        let regs = cpu.registers();

        prop_assert_eq!(regs.a, value);
        prop_assert_eq!(regs.status.contains(Status::Z), value == 0);
        prop_assert_eq!(regs.status.contains(Status::N), value & 0x80 != 0);
    }
}

//! Fixed-column disassembly of the current instruction, for trace logs.
//!
//! The format is `<machine code>  <MNE> <param>`: machine code occupies 8
//! columns (trailing spaces when shorter), the mnemonic is three upper-case
//! letters, and the parameter field is 23 columns wide, showing the operand,
//! the effective address, and the transferred value where meaningful. `->`
//! marks reads, `<-` marks writes.

use crate::cpu::Cpu;
use crate::instructions::{AddrMode, InstrType};

impl Cpu {
    /// Formats the most recently decoded instruction, or `None` if nothing
    /// has been fetched yet.
    ///
    /// The output is most useful at an instruction boundary, when the
    /// operand and latched value have settled; the log callback installed
    /// via [`Cpu::set_log_callback`] calls this at exactly that point.
    #[must_use]
    pub fn print_current_instruction(&self) -> Option<String> {
        let instr = self.cur_instr?;

        let machine_code = match instr.length() {
            1 => format!("{:02X}      ", self.opcode),
            2 => format!("{:02X} {:02X}   ", self.opcode, self.raw_operand & 0xFF),
            _ => format!(
                "{:02X} {:02X} {:02X}",
                self.opcode,
                self.raw_operand & 0xFF,
                self.raw_operand >> 8
            ),
        };

        // Reads show the value flowing out of memory, everything else shows
        // the value flowing in.
        let arrow = if instr.instr_type() == InstrType::Read {
            "->"
        } else {
            "<-"
        };

        let raw = self.raw_operand;
        let eff = self.eff_operand;
        let val = self.latched;

        let param = match instr.mode {
            AddrMode::Imm => format!("#${:02X}                   ", raw & 0xFF),
            AddrMode::Zrp => format!("${:02X}              {arrow} ${val:02X}", raw & 0xFF),
            AddrMode::Zpx | AddrMode::Zpy => {
                let index = if instr.mode == AddrMode::Zpx { 'X' } else { 'Y' };
                format!("${:02X},{index}   -> ${eff:04X} {arrow} ${val:02X}", raw & 0xFF)
            }
            AddrMode::Abs => format!("${raw:04X}            {arrow} ${val:02X}"),
            AddrMode::Abx | AddrMode::Aby => {
                let index = if instr.mode == AddrMode::Abx { 'X' } else { 'Y' };
                format!("${raw:04X},{index} -> ${eff:04X} {arrow} ${val:02X}")
            }
            AddrMode::Rel => format!("#${:02X}    -> ${eff:04X}       ", raw & 0xFF),
            AddrMode::Ind => format!("(${raw:04X}) -> ${eff:04X}       "),
            AddrMode::Izx => format!("(${:02X},X) -> ${eff:04X} {arrow} ${val:02X}", raw & 0xFF),
            AddrMode::Izy => format!("(${:02X}),Y -> ${eff:04X} {arrow} ${val:02X}", raw & 0xFF),
            AddrMode::Imp => "                       ".to_string(),
        };

        Some(format!("{machine_code}  {} {param}", instr.mnemonic))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Bus, Cpu};

    struct TestBus {
        memory: [u8; 0x10000],
    }

    impl Bus for TestBus {
        fn read(&mut self, addr: u16) -> u8 {
            self.memory[addr as usize]
        }

        fn write(&mut self, addr: u16, value: u8) {
            self.memory[addr as usize] = value;
        }
    }

    fn run_program(program: &[u8], cycles: u32) -> Cpu {
        let mut bus = TestBus {
            memory: [0; 0x10000],
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

    /// 8 columns of machine code, 2 spaces, 3-letter mnemonic, 1 space,
    /// 23 columns of parameter.
    const LINE_WIDTH: usize = 8 + 2 + 3 + 1 + 23;

    #[test]
    fn test_no_instruction_before_first_fetch() {
        let cpu = Cpu::new();
        assert!(cpu.print_current_instruction().is_none());
    }

    #[test]
    fn test_format_immediate() {
        let cpu = run_program(&[0xA9, 0x42], 2);
        let line = cpu.print_current_instruction().unwrap();
        assert_eq!(line.len(), LINE_WIDTH);
        assert!(line.starts_with("A9 42     LDA #$42"));
    }

    #[test]
    fn test_format_implied() {
        let cpu = run_program(&[0xEA], 2);
        let line = cpu.print_current_instruction().unwrap();
        assert_eq!(line.len(), LINE_WIDTH);
        assert!(line.starts_with("EA        NOP"));
    }

    #[test]
    fn test_format_zero_page_read() {
        let mut program = vec![0xA5, 0x10]; // LDA $10
        program.resize(8, 0xEA);
        let cpu = run_program(&program, 3);
        let line = cpu.print_current_instruction().unwrap();
        assert_eq!(line.len(), LINE_WIDTH);
        assert!(line.starts_with("A5 10     LDA $10"));
        assert!(line.contains("-> $00"));
    }

    #[test]
    fn test_format_zero_page_write() {
        // LDA #$42; STA $10
        let cpu = run_program(&[0xA9, 0x42, 0x85, 0x10], 5);
        let line = cpu.print_current_instruction().unwrap();
        assert_eq!(line.len(), LINE_WIDTH);
        assert!(line.starts_with("85 10     STA $10"));
        assert!(line.contains("<- $42"));
    }

    #[test]
    fn test_format_absolute() {
        let cpu = run_program(&[0xAD, 0x34, 0x12], 4); // LDA $1234
        let line = cpu.print_current_instruction().unwrap();
        assert_eq!(line.len(), LINE_WIDTH);
        assert!(line.starts_with("AD 34 12  LDA $1234"));
    }

    #[test]
    fn test_format_indexed_shows_effective_address() {
        // LDX #$01; LDA $10F0,X
        let cpu = run_program(&[0xA2, 0x01, 0xBD, 0xF0, 0x10], 6);
        let line = cpu.print_current_instruction().unwrap();
        assert_eq!(line.len(), LINE_WIDTH);
        assert!(line.starts_with("BD F0 10  LDA $10F0,X -> $10F1 -> $00"));
    }

    #[test]
    fn test_format_relative() {
        // LDA #$01; BNE +2
        let cpu = run_program(&[0xA9, 0x01, 0xD0, 0x02], 5);
        let line = cpu.print_current_instruction().unwrap();
        assert_eq!(line.len(), LINE_WIDTH);
        assert!(line.starts_with("D0 02     BNE #$02    -> $8006"));
    }
}

//! 6502 CPU core implementation.
//!
//! This module contains the CPU state machine: the register file, the
//! per-cycle dispatcher, the addressing-mode executors, the interrupt engine
//! with its one-cycle-delayed line sampler, and the operation phase shared
//! by all mnemonics.
//!
//! The driving primitive is [`Cpu::cycle`], which advances the processor by
//! exactly one clock. Memory reads and writes land on the same cycles as on
//! real hardware, including the dummy accesses of indexed addressing and
//! read-modify-write instructions.

use std::fmt;

use crate::bus::Bus;
use crate::instructions::{AddrMode, InstrType, Instruction, Mnemonic};
use crate::interrupt::Interrupt;
use crate::status::Status;
use crate::CpuError;

/// Bottom of the hardware stack page.
const STACK_BASE: u16 = 0x0100;

/// The 6502 register file.
///
/// The stack pointer indexes into `$0100-$01FF`; the status register
/// serializes with C in bit 0 through N in bit 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Program counter: address of the next byte to fetch.
    pub pc: u16,
    /// Stack pointer.
    pub sp: u8,
    /// Accumulator.
    pub a: u8,
    /// X index register.
    pub x: u8,
    /// Y index register.
    pub y: u8,
    /// Status register.
    pub status: Status,
}

impl Registers {
    /// Power-on register state: P = `$24` (I and U set), everything else
    /// zero. The reset sequence then decrements SP three times, landing it
    /// on `$FD`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pc: 0,
            sp: 0,
            a: 0,
            x: 0,
            y: 0,
            status: Status::POWER_ON,
        }
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware interrupt line levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Lines {
    nmi: bool,
    irq: bool,
    rst: bool,
}

/// Callback invoked at each opcode fetch with the previous instruction's
/// disassembly and a register snapshot.
type LogCallback = Box<dyn FnMut(&str, &Registers)>;

/// Cycle-stepped MOS 6502 CPU (NES variant, no decimal arithmetic).
///
/// All state is owned by this value; multiple independent cores can coexist.
/// Memory access goes through a host-supplied [`Bus`] passed to every call
/// that can touch memory.
///
/// # Example
///
/// ```no_run
/// use silicon6502_cpu::{Bus, Cpu};
///
/// struct SimpleBus {
///     memory: [u8; 65536],
/// }
///
/// impl Bus for SimpleBus {
///     fn read(&mut self, addr: u16) -> u8 {
///         self.memory[addr as usize]
///     }
///
///     fn write(&mut self, addr: u16, value: u8) {
///         self.memory[addr as usize] = value;
///     }
/// }
///
/// let mut bus = SimpleBus { memory: [0; 65536] };
/// let mut cpu = Cpu::new();
/// cpu.reset(&mut bus)?;
/// cpu.cycle(&mut bus)?;
/// # Ok::<(), silicon6502_cpu::CpuError>(())
/// ```
pub struct Cpu {
    regs: Registers,
    /// Total clock cycles ticked since power-on.
    cycles: u64,

    // ===== Per-instruction transient state =====
    /// Last fetched opcode byte.
    pub(crate) opcode: u8,
    /// Last decoded instruction; `None` until the first fetch.
    pub(crate) cur_instr: Option<Instruction>,
    /// Operand bytes as fetched from the instruction stream.
    pub(crate) raw_operand: u16,
    /// Effective address after indexing.
    pub(crate) eff_operand: u16,
    /// The byte read from or to be written to memory.
    pub(crate) latched: u8,
    /// 1-indexed cycle number within the current instruction.
    instr_cycle: u8,

    // ===== Interrupt engine =====
    /// Live line levels as driven by the host.
    lines: Lines,
    /// Snapshot of the lines from the end of the previous cycle. Polling
    /// observes this, which produces the hardware's one-cycle delay.
    sampled: Lines,
    /// Interrupt selected by the last poll, serviced at the next fetch.
    queued_interrupt: Option<Interrupt>,
    /// Interrupt currently being serviced.
    cur_interrupt: Option<Interrupt>,
    /// Armed when NMI asserts during the first four cycles of a BRK service;
    /// swaps the vector to NMI's on cycle 5.
    nmi_hijack: bool,

    log_hook: Option<LogCallback>,
}

impl Cpu {
    /// Creates a CPU in power-on state with a RST interrupt pre-queued, so
    /// the first seven cycles run the canonical reset sequence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            cycles: 0,
            opcode: 0,
            cur_instr: None,
            raw_operand: 0,
            eff_operand: 0,
            latched: 0,
            instr_cycle: 1,
            lines: Lines::default(),
            sampled: Lines::default(),
            queued_interrupt: Some(Interrupt::Rst),
            cur_interrupt: None,
            nmi_hijack: false,
            log_hook: None,
        }
    }

    /// Queues a RST and ticks seven cycles to complete the reset sequence.
    ///
    /// Afterwards SP is `$FD`, the I flag is set, and PC holds the
    /// little-endian word at `$FFFC`.
    ///
    /// # Errors
    ///
    /// Propagates [`CpuError`] from the underlying cycles; the reset
    /// sequence itself cannot halt.
    pub fn reset(&mut self, bus: &mut impl Bus) -> Result<(), CpuError> {
        self.queued_interrupt = Some(Interrupt::Rst);
        self.cur_interrupt = None;
        self.cur_instr = None;
        self.nmi_hijack = false;
        self.instr_cycle = 1;

        for _ in 0..7 {
            self.cycle(bus)?;
        }

        Ok(())
    }

    /// Advances the CPU by exactly one clock cycle.
    ///
    /// Interrupt lines are sampled at the end of the call, after any polling
    /// the dispatcher performed; a line raised during cycle N first becomes
    /// visible to polling at cycle N+1.
    ///
    /// # Errors
    ///
    /// Returns [`CpuError::Halted`] when a KIL/JAM opcode executes. The CPU
    /// must not be cycled further after that.
    pub fn cycle(&mut self, bus: &mut impl Bus) -> Result<(), CpuError> {
        self.cycles = self.cycles.wrapping_add(1);

        self.dispatch(bus)?;

        // Branches poll on their own schedule (cycle 2, and cycle 4 when
        // reached), never at instruction end.
        let rel_in_flight = matches!(self.cur_instr, Some(i) if i.mode == AddrMode::Rel);
        if self.instr_cycle == 0 && !rel_in_flight {
            self.poll_interrupts();
        }

        self.sampled = self.lines;
        self.instr_cycle = self.instr_cycle.wrapping_add(1);

        Ok(())
    }

    /// Current register state.
    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    /// Mutable register access, for harnesses that jump to an entry point
    /// or preload flags directly.
    #[must_use]
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    /// Total clock cycles ticked since power-on.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// 1-indexed cycle number within the current instruction (1 at an
    /// instruction boundary, 0 transiently at the end of a sequence).
    #[must_use]
    pub fn instruction_step(&self) -> u8 {
        self.instr_cycle
    }

    /// The most recently decoded instruction, if any.
    #[must_use]
    pub fn current_instruction(&self) -> Option<Instruction> {
        self.cur_instr
    }

    /// Raises the NMI line.
    pub fn raise_nmi_line(&mut self) {
        self.lines.nmi = true;
    }

    /// Clears the NMI line.
    pub fn clear_nmi_line(&mut self) {
        self.lines.nmi = false;
    }

    /// Raises the IRQ line. Level-sensitive: serviced repeatedly while held
    /// high with the I flag clear.
    pub fn raise_irq_line(&mut self) {
        self.lines.irq = true;
    }

    /// Clears the IRQ line.
    pub fn clear_irq_line(&mut self) {
        self.lines.irq = false;
    }

    /// Raises the RST line. The line clears itself when the reset is
    /// selected by polling.
    pub fn raise_rst_line(&mut self) {
        self.lines.rst = true;
    }

    /// Clears the RST line.
    pub fn clear_rst_line(&mut self) {
        self.lines.rst = false;
    }

    /// Queues an interrupt directly, bypassing the lines.
    ///
    /// Returns `false` if another interrupt is already queued.
    pub fn issue_interrupt(&mut self, interrupt: Interrupt) -> bool {
        if self.queued_interrupt.is_some() {
            return false;
        }
        self.queued_interrupt = Some(interrupt);
        true
    }

    /// Installs a callback invoked at each opcode fetch with the previous
    /// instruction's disassembly and a register snapshot.
    pub fn set_log_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&str, &Registers) + 'static,
    {
        self.log_hook = Some(Box::new(callback));
    }

    // =========================================================================
    // DISPATCHER
    // =========================================================================

    /// Performs the work of the current cycle: interrupt sequence step,
    /// opcode fetch, operand fetch, or addressing-mode execution.
    fn dispatch(&mut self, bus: &mut impl Bus) -> Result<(), CpuError> {
        if let Some(int) = self.cur_interrupt {
            self.step_interrupt(bus, int);
            return Ok(());
        }

        if self.instr_cycle == 1 {
            self.notify_log_hook();

            if let Some(int) = self.queued_interrupt.take() {
                log::trace!("servicing {int:?} interrupt (vector {:#06X})", int.vector());
                self.cur_instr = None;
                self.cur_interrupt = Some(int);
                self.step_interrupt(bus, int);
            } else {
                self.opcode = bus.read(self.regs.pc);
                self.cur_instr = Some(Instruction::decode(self.opcode));
                self.raw_operand = 0;
                self.eff_operand = 0;
                self.latched = 0;
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            return Ok(());
        }

        let Some(instr) = self.cur_instr else {
            debug_assert!(false, "cycle {} with no decoded instruction", self.instr_cycle);
            return Ok(());
        };

        // BRK runs the shared interrupt sequence, entering at cycle 2 (the
        // opcode fetch already happened on cycle 1).
        if instr.mnemonic == Mnemonic::BRK {
            self.cur_interrupt = Some(Interrupt::Brk);
            self.step_interrupt(bus, Interrupt::Brk);
            return Ok(());
        }

        if self.instr_cycle == 2 && instr.mode != AddrMode::Imp && instr.mode != AddrMode::Imm {
            // Branches poll here instead of at instruction end; a taken
            // branch without a page cross never re-polls.
            if instr.mode == AddrMode::Rel {
                self.poll_interrupts();
            }

            self.raw_operand |= u16::from(bus.read(self.regs.pc));
            self.regs.pc = self.regs.pc.wrapping_add(1);
            return Ok(());
        }

        match instr.instr_type() {
            InstrType::Jump => {
                if instr.mnemonic == Mnemonic::JSR {
                    self.exec_jsr(bus);
                } else {
                    self.exec_jmp(bus, instr);
                }
                Ok(())
            }
            InstrType::Return => {
                if instr.mnemonic == Mnemonic::RTI {
                    self.exec_rti(bus);
                } else {
                    self.exec_rts(bus);
                }
                Ok(())
            }
            InstrType::Branch => self.exec_branch(bus, instr),
            InstrType::Stack => {
                self.exec_stack(bus, instr);
                Ok(())
            }
            _ => match instr.mode {
                AddrMode::Imp => self.exec_implied(bus, instr),
                AddrMode::Imm => self.exec_immediate(bus, instr),
                AddrMode::Zrp => self.exec_zero_page(bus, instr),
                AddrMode::Zpx | AddrMode::Zpy => self.exec_zero_page_indexed(bus, instr),
                AddrMode::Abs => self.exec_absolute(bus, instr),
                AddrMode::Abx | AddrMode::Aby => self.exec_absolute_indexed(bus, instr),
                AddrMode::Izx => self.exec_indexed_indirect(bus, instr),
                AddrMode::Izy => self.exec_indirect_indexed(bus, instr),
                AddrMode::Ind | AddrMode::Rel => {
                    debug_assert!(false, "mode routed past its dedicated executor");
                    Ok(())
                }
            },
        }
    }

    /// Invokes the log hook with the previous instruction's disassembly.
    fn notify_log_hook(&mut self) {
        if self.log_hook.is_none() {
            return;
        }
        if let Some(text) = self.print_current_instruction() {
            let snapshot = self.regs;
            if let Some(hook) = self.log_hook.as_mut() {
                hook(&text, &snapshot);
            }
        }
    }

    // =========================================================================
    // INTERRUPT ENGINE
    // =========================================================================

    /// Selects a queued interrupt from the delayed line snapshot.
    /// Priority: NMI, then IRQ (if unmasked), then RST.
    fn poll_interrupts(&mut self) {
        if self.sampled.nmi {
            self.queued_interrupt = Some(Interrupt::Nmi);
        } else if self.sampled.irq && !self.regs.status.contains(Status::I) {
            self.queued_interrupt = Some(Interrupt::Irq);
        } else if self.sampled.rst {
            self.queued_interrupt = Some(Interrupt::Rst);
            self.lines.rst = false;
        }
    }

    /// One cycle of the 7-cycle interrupt service sequence.
    ///
    /// BRK enters at cycle 2; hardware interrupts start at cycle 1. An NMI
    /// asserting during cycles 1-4 of a BRK hijacks the vector on cycle 5.
    fn step_interrupt(&mut self, bus: &mut impl Bus, int: Interrupt) {
        debug_assert!((1..=7).contains(&self.instr_cycle));

        match self.instr_cycle {
            1 => {
                let _ = bus.read(self.regs.pc); // garbage read
                self.opcode = 0x00; // traces show the interrupt as a BRK

                match int {
                    Interrupt::Nmi => self.lines.nmi = false,
                    Interrupt::Irq => self.lines.irq = false,
                    Interrupt::Brk if self.lines.nmi => self.nmi_hijack = true,
                    _ => {}
                }
            }
            2 => {
                let _ = bus.read(self.regs.pc); // garbage read
                if int == Interrupt::Brk {
                    // BRK consumes a padding byte
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    if self.lines.nmi {
                        self.nmi_hijack = true;
                    }
                }
            }
            3 => {
                if int.pushes_pc() {
                    bus.write(STACK_BASE | u16::from(self.regs.sp), (self.regs.pc >> 8) as u8);
                }
                self.regs.sp = self.regs.sp.wrapping_sub(1);

                if int == Interrupt::Brk && self.lines.nmi {
                    self.nmi_hijack = true;
                }
            }
            4 => {
                if int.pushes_pc() {
                    bus.write(STACK_BASE | u16::from(self.regs.sp), (self.regs.pc & 0xFF) as u8);
                }
                self.regs.sp = self.regs.sp.wrapping_sub(1);

                if int == Interrupt::Brk && self.lines.nmi {
                    self.nmi_hijack = true;
                }
            }
            5 => {
                let mut int = int;
                if self.nmi_hijack {
                    int = Interrupt::Nmi;
                    self.cur_interrupt = Some(Interrupt::Nmi);
                    self.nmi_hijack = false;
                }

                if int.pushes_pc() {
                    self.regs.status.set(Status::B, int.sets_b());
                    let value = self.regs.status.pushed(int == Interrupt::Brk);
                    bus.write(STACK_BASE | u16::from(self.regs.sp), value);
                }
                self.regs.sp = self.regs.sp.wrapping_sub(1);
            }
            6 => {
                self.latched = bus.read(int.vector());
                if int.sets_i() {
                    self.regs.status.insert(Status::I);
                }
            }
            _ => {
                let high = bus.read(int.vector().wrapping_add(1));
                self.regs.pc = (u16::from(high) << 8) | u16::from(self.latched);
                self.instr_cycle = 0;
                self.cur_interrupt = None;
            }
        }
    }

    // =========================================================================
    // ADDRESSING-MODE EXECUTORS
    // =========================================================================

    /// Shared R/W/RMW finish sequence once the effective address is known.
    /// `offset` is the cycle on which the sequence begins.
    fn finish_rw(
        &mut self,
        bus: &mut impl Bus,
        instr: Instruction,
        offset: u8,
    ) -> Result<(), CpuError> {
        match instr.instr_type() {
            InstrType::Read => {
                debug_assert_eq!(self.instr_cycle, offset);

                self.latched = bus.read(self.eff_operand);
                self.do_operation(instr.mnemonic)?;
                self.instr_cycle = 0;
            }
            InstrType::Write => {
                debug_assert_eq!(self.instr_cycle, offset);

                self.do_operation(instr.mnemonic)?;
                bus.write(self.eff_operand, self.latched);
                self.instr_cycle = 0;
            }
            InstrType::ReadModifyWrite => {
                debug_assert!(self.instr_cycle >= offset && self.instr_cycle <= offset + 2);

                match self.instr_cycle - offset {
                    0 => self.latched = bus.read(self.eff_operand),
                    1 => {
                        // Dummy write of the unmodified value
                        bus.write(self.eff_operand, self.latched);
                        self.do_operation(instr.mnemonic)?;
                    }
                    _ => {
                        bus.write(self.eff_operand, self.latched);
                        self.instr_cycle = 0;
                    }
                }
            }
            _ => debug_assert!(false, "{} is not a memory-shaped instruction", instr.mnemonic),
        }
        Ok(())
    }

    /// IMP (2 cycles): dummy read of PC, then the operation on A or the
    /// registers directly.
    fn exec_implied(&mut self, bus: &mut impl Bus, instr: Instruction) -> Result<(), CpuError> {
        debug_assert_eq!(self.instr_cycle, 2);

        let _ = bus.read(self.regs.pc); // dummy read

        match instr.instr_type() {
            InstrType::Read => {
                self.latched = self.regs.a;
                self.do_operation(instr.mnemonic)?;
            }
            InstrType::Write => {
                self.do_operation(instr.mnemonic)?;
                self.regs.a = self.latched;
            }
            InstrType::ReadModifyWrite => {
                self.latched = self.regs.a;
                self.do_operation(instr.mnemonic)?;
                self.regs.a = self.latched;
            }
            _ => self.do_operation(instr.mnemonic)?,
        }

        self.instr_cycle = 0;
        Ok(())
    }

    /// IMM (2 cycles): fetch the operand byte and run the operation.
    fn exec_immediate(&mut self, bus: &mut impl Bus, instr: Instruction) -> Result<(), CpuError> {
        debug_assert_eq!(self.instr_cycle, 2);

        self.raw_operand |= u16::from(bus.read(self.regs.pc));
        self.regs.pc = self.regs.pc.wrapping_add(1);

        self.latched = (self.raw_operand & 0xFF) as u8;
        self.do_operation(instr.mnemonic)?;

        self.instr_cycle = 0;
        Ok(())
    }

    /// ZRP (3-5 cycles): the operand byte is the effective address.
    fn exec_zero_page(&mut self, bus: &mut impl Bus, instr: Instruction) -> Result<(), CpuError> {
        self.eff_operand = self.raw_operand;
        self.finish_rw(bus, instr, 3)
    }

    /// ZPX/ZPY (4-6 cycles): dummy read of the unindexed address, then the
    /// index is added with wraparound inside the zero page.
    fn exec_zero_page_indexed(
        &mut self,
        bus: &mut impl Bus,
        instr: Instruction,
    ) -> Result<(), CpuError> {
        debug_assert!((3..=6).contains(&self.instr_cycle));

        if self.instr_cycle == 3 {
            self.latched = bus.read(self.raw_operand); // dummy read
            let index = if instr.mode == AddrMode::Zpx {
                self.regs.x
            } else {
                self.regs.y
            };
            self.eff_operand = self.raw_operand.wrapping_add(u16::from(index)) & 0xFF;
            Ok(())
        } else {
            self.finish_rw(bus, instr, 4)
        }
    }

    /// ABS (4-6 cycles): fetch the high operand byte, then finish.
    fn exec_absolute(&mut self, bus: &mut impl Bus, instr: Instruction) -> Result<(), CpuError> {
        debug_assert!((3..=6).contains(&self.instr_cycle));

        if self.instr_cycle == 3 {
            self.raw_operand |= u16::from(bus.read(self.regs.pc)) << 8;
            self.regs.pc = self.regs.pc.wrapping_add(1);
            Ok(())
        } else {
            self.eff_operand = self.raw_operand;
            self.finish_rw(bus, instr, 4)
        }
    }

    /// ABX/ABY (4-7 cycles): the index is added to the low byte only; the
    /// read on cycle 4 goes to the possibly-wrong address, and the high byte
    /// is fixed up afterwards. Reads that did not cross skip the fixup.
    fn exec_absolute_indexed(
        &mut self,
        bus: &mut impl Bus,
        instr: Instruction,
    ) -> Result<(), CpuError> {
        debug_assert!((3..=8).contains(&self.instr_cycle));

        let index = if instr.mode == AddrMode::Abx {
            self.regs.x
        } else {
            self.regs.y
        };

        match self.instr_cycle {
            3 => {
                self.raw_operand |= u16::from(bus.read(self.regs.pc)) << 8;
                self.eff_operand = (self.raw_operand & 0xFF00)
                    | (self.raw_operand.wrapping_add(u16::from(index)) & 0xFF);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                Ok(())
            }
            4 => {
                self.latched = bus.read(self.eff_operand);
                if (self.raw_operand & 0xFF) + u16::from(index) >= 0x100 {
                    self.eff_operand = self.eff_operand.wrapping_add(0x100);
                } else if instr.instr_type() == InstrType::Read {
                    // High byte was already correct: the value just read is
                    // the operand, one cycle saved.
                    self.do_operation(instr.mnemonic)?;
                    self.instr_cycle = 0;
                }
                Ok(())
            }
            _ => self.finish_rw(bus, instr, 5),
        }
    }

    /// IZX (6-8 cycles): dummy read of the pointer base, X added with
    /// zero-page wraparound, then the effective address is read out of the
    /// zero page.
    fn exec_indexed_indirect(
        &mut self,
        bus: &mut impl Bus,
        instr: Instruction,
    ) -> Result<(), CpuError> {
        debug_assert!((3..=8).contains(&self.instr_cycle));

        match self.instr_cycle {
            3 => {
                let _ = bus.read(self.raw_operand); // dummy read
                self.raw_operand = (self.raw_operand & 0xFF00)
                    | (self.raw_operand.wrapping_add(u16::from(self.regs.x)) & 0xFF);
                Ok(())
            }
            4 => {
                self.eff_operand = u16::from(bus.read(self.raw_operand));
                Ok(())
            }
            5 => {
                let high_addr =
                    (self.raw_operand & 0xFF00) | (self.raw_operand.wrapping_add(1) & 0xFF);
                self.eff_operand |= u16::from(bus.read(high_addr)) << 8;
                Ok(())
            }
            _ => self.finish_rw(bus, instr, 6),
        }
    }

    /// IZY (5-8 cycles): the pointer is read from the zero page, Y is added
    /// to the low byte only, and the high byte is fixed up after the cycle-5
    /// read. Reads that did not cross finish on cycle 5.
    fn exec_indirect_indexed(
        &mut self,
        bus: &mut impl Bus,
        instr: Instruction,
    ) -> Result<(), CpuError> {
        debug_assert!((3..=8).contains(&self.instr_cycle));

        match self.instr_cycle {
            3 => {
                self.eff_operand = u16::from(bus.read(self.raw_operand));
                // Save the pointer low byte for the cycle-5 carry test
                self.latched = (self.eff_operand & 0xFF) as u8;
                Ok(())
            }
            4 => {
                let high_addr =
                    (self.raw_operand & 0xFF00) | (self.raw_operand.wrapping_add(1) & 0xFF);
                self.eff_operand |= u16::from(bus.read(high_addr)) << 8;
                self.eff_operand = (self.eff_operand & 0xFF00)
                    | (self.eff_operand.wrapping_add(u16::from(self.regs.y)) & 0xFF);
                Ok(())
            }
            5 => {
                let value = bus.read(self.eff_operand);
                if u16::from(self.latched) + u16::from(self.regs.y) >= 0x100 {
                    self.eff_operand = self.eff_operand.wrapping_add(0x100);
                } else if instr.instr_type() == InstrType::Read {
                    self.latched = value;
                    self.do_operation(instr.mnemonic)?;
                    self.instr_cycle = 0;
                } else {
                    self.latched = value;
                }
                Ok(())
            }
            _ => self.finish_rw(bus, instr, 6),
        }
    }

    // =========================================================================
    // JUMPS, RETURNS, STACK, BRANCHES
    // =========================================================================

    /// JMP: 3 cycles absolute; 5 cycles indirect, reproducing the hardware's
    /// page-boundary pointer bug.
    fn exec_jmp(&mut self, bus: &mut impl Bus, instr: Instruction) {
        match instr.mode {
            AddrMode::Abs => {
                debug_assert_eq!(self.instr_cycle, 3);

                self.raw_operand |= u16::from(bus.read(self.regs.pc)) << 8;
                self.regs.pc = self.raw_operand;
                self.instr_cycle = 0;
            }
            AddrMode::Ind => {
                debug_assert!((3..=5).contains(&self.instr_cycle));

                match self.instr_cycle {
                    3 => {
                        self.raw_operand |= u16::from(bus.read(self.regs.pc)) << 8;
                        self.regs.pc = self.regs.pc.wrapping_add(1);
                    }
                    4 => self.latched = bus.read(self.raw_operand),
                    _ => {
                        // The pointer's high byte never carries: with a
                        // pointer at $xxFF the second read wraps to $xx00.
                        let high_addr =
                            (self.raw_operand & 0xFF00) | (self.raw_operand.wrapping_add(1) & 0xFF);
                        self.eff_operand =
                            (u16::from(bus.read(high_addr)) << 8) | u16::from(self.latched);
                        self.regs.pc = self.eff_operand;
                        self.instr_cycle = 0;
                    }
                }
            }
            _ => debug_assert!(false, "JMP with mode {:?}", instr.mode),
        }
    }

    /// JSR (6 cycles). The pushed PC still points at the last byte of the
    /// JSR instruction; RTS compensates with its final increment.
    fn exec_jsr(&mut self, bus: &mut impl Bus) {
        debug_assert!((3..=6).contains(&self.instr_cycle));

        match self.instr_cycle {
            3 => {} // internal cycle, no observable bus activity
            4 => {
                bus.write(STACK_BASE | u16::from(self.regs.sp), (self.regs.pc >> 8) as u8);
                self.regs.sp = self.regs.sp.wrapping_sub(1);
            }
            5 => {
                bus.write(STACK_BASE | u16::from(self.regs.sp), (self.regs.pc & 0xFF) as u8);
                self.regs.sp = self.regs.sp.wrapping_sub(1);
            }
            _ => {
                self.raw_operand |= u16::from(bus.read(self.regs.pc)) << 8;
                self.eff_operand = self.raw_operand;
                self.regs.pc = self.raw_operand;
                self.instr_cycle = 0;
            }
        }
    }

    /// RTS (6 cycles).
    fn exec_rts(&mut self, bus: &mut impl Bus) {
        debug_assert!((2..=6).contains(&self.instr_cycle));

        match self.instr_cycle {
            2 => {
                let _ = bus.read(self.regs.pc); // dummy read
            }
            3 => self.regs.sp = self.regs.sp.wrapping_add(1),
            4 => {
                let low = bus.read(STACK_BASE | u16::from(self.regs.sp));
                self.regs.pc = (self.regs.pc & 0xFF00) | u16::from(low);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            5 => {
                let high = bus.read(STACK_BASE | u16::from(self.regs.sp));
                self.regs.pc = (self.regs.pc & 0x00FF) | (u16::from(high) << 8);
            }
            _ => {
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.instr_cycle = 0;
            }
        }
    }

    /// RTI (6 cycles). No PC increment at the end: the pushed address is the
    /// interrupted instruction itself.
    fn exec_rti(&mut self, bus: &mut impl Bus) {
        debug_assert!((2..=6).contains(&self.instr_cycle));

        match self.instr_cycle {
            2 => {
                let _ = bus.read(self.regs.pc); // dummy read
            }
            3 => self.regs.sp = self.regs.sp.wrapping_add(1),
            4 => {
                let value = bus.read(STACK_BASE | u16::from(self.regs.sp));
                self.regs.status = Status::from_pulled(value);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            5 => {
                let low = bus.read(STACK_BASE | u16::from(self.regs.sp));
                self.regs.pc = (self.regs.pc & 0xFF00) | u16::from(low);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            _ => {
                let high = bus.read(STACK_BASE | u16::from(self.regs.sp));
                self.regs.pc = (self.regs.pc & 0x00FF) | (u16::from(high) << 8);
                self.instr_cycle = 0;
            }
        }
    }

    /// PHA/PHP (3 cycles) and PLA/PLP (4 cycles).
    fn exec_stack(&mut self, bus: &mut impl Bus, instr: Instruction) {
        match instr.mnemonic {
            Mnemonic::PHA | Mnemonic::PHP => self.exec_push(bus, instr),
            Mnemonic::PLA | Mnemonic::PLP => self.exec_pull(bus, instr),
            _ => debug_assert!(false, "{} is not a stack instruction", instr.mnemonic),
        }
    }

    fn exec_push(&mut self, bus: &mut impl Bus, instr: Instruction) {
        debug_assert!((2..=3).contains(&self.instr_cycle));

        match self.instr_cycle {
            2 => {
                let _ = bus.read(self.regs.pc); // dummy read
            }
            _ => {
                let value = if instr.mnemonic == Mnemonic::PHA {
                    self.regs.a
                } else {
                    // PHP pushes with B and U forced set
                    self.regs.status.pushed(true)
                };
                bus.write(STACK_BASE | u16::from(self.regs.sp), value);
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                self.instr_cycle = 0;
            }
        }
    }

    fn exec_pull(&mut self, bus: &mut impl Bus, instr: Instruction) {
        debug_assert!((2..=4).contains(&self.instr_cycle));

        match self.instr_cycle {
            2 => {
                let _ = bus.read(self.regs.pc); // dummy read
            }
            3 => self.regs.sp = self.regs.sp.wrapping_add(1),
            _ => {
                let value = bus.read(STACK_BASE | u16::from(self.regs.sp));
                if instr.mnemonic == Mnemonic::PLA {
                    self.regs.a = value;
                    self.set_zn(value);
                } else {
                    // PLP writes all eight pulled bits through, B and U included
                    self.regs.status = Status::from_pulled(value);
                }
                self.instr_cycle = 0;
            }
        }
    }

    /// Branch executor (REL): 2 cycles untaken, 3 taken, 4 taken across a
    /// page. When the branch resolves early, the next opcode fetch happens
    /// on this same cycle via re-dispatch.
    fn exec_branch(&mut self, bus: &mut impl Bus, instr: Instruction) -> Result<(), CpuError> {
        debug_assert!((3..=4).contains(&self.instr_cycle));

        let offset = self.raw_operand as u8 as i8;

        if self.instr_cycle == 3 {
            self.latched = bus.read(self.regs.pc); // dummy read
            self.eff_operand = self.regs.pc.wrapping_add(offset as u16);

            let taken = match instr.mnemonic {
                Mnemonic::BCC => !self.regs.status.contains(Status::C),
                Mnemonic::BCS => self.regs.status.contains(Status::C),
                Mnemonic::BNE => !self.regs.status.contains(Status::Z),
                Mnemonic::BEQ => self.regs.status.contains(Status::Z),
                Mnemonic::BPL => !self.regs.status.contains(Status::N),
                Mnemonic::BMI => self.regs.status.contains(Status::N),
                Mnemonic::BVC => !self.regs.status.contains(Status::V),
                Mnemonic::BVS => self.regs.status.contains(Status::V),
                _ => {
                    debug_assert!(false, "{} is not a branch", instr.mnemonic);
                    false
                }
            };

            if taken {
                // Low-byte-only add; the high byte is fixed on cycle 4 if
                // the add carried or borrowed.
                self.latched = (self.regs.pc & 0xFF) as u8;
                self.regs.pc =
                    (self.regs.pc & 0xFF00) | (self.regs.pc.wrapping_add(offset as u16) & 0xFF);
                return Ok(());
            }

            // Not taken: no extra clock is consumed, the next opcode fetch
            // happens on this same cycle.
            self.instr_cycle = 1;
            return self.dispatch(bus);
        }

        // Cycle 4
        self.poll_interrupts();

        let old_pcl = self.latched;
        self.latched = bus.read(self.regs.pc); // dummy read

        let off = i16::from(offset);
        if off < 0 && -off > i16::from(old_pcl) {
            self.regs.pc = self.regs.pc.wrapping_sub(0x100);
        } else if off > 0 && u16::from(old_pcl) + (self.raw_operand & 0xFF) >= 0x100 {
            self.regs.pc = self.regs.pc.wrapping_add(0x100);
        } else {
            // No crossing: this cycle is already the next fetch.
            self.instr_cycle = 1;
            return self.dispatch(bus);
        }

        self.instr_cycle = 0;
        Ok(())
    }

    // =========================================================================
    // ALU HELPERS
    // =========================================================================

    /// Updates the Z and N flags from a value.
    fn set_zn(&mut self, value: u8) {
        self.regs.status.set_zn(value);
    }

    /// Add with carry. Decimal mode is ignored.
    fn do_adc(&mut self, value: u8) {
        let carry = u16::from(self.regs.status.contains(Status::C));
        let sum = u16::from(self.regs.a) + u16::from(value) + carry;
        let result = sum as u8;

        self.regs.status.set(Status::C, sum > 0xFF);
        // Signed overflow: both inputs share a sign the result does not
        self.regs.status.set(
            Status::V,
            (!(self.regs.a ^ value) & (self.regs.a ^ result) & 0x80) != 0,
        );

        self.regs.a = result;
        self.set_zn(result);
    }

    /// Subtract with carry: ADC of the one's complement.
    fn do_sbc(&mut self, value: u8) {
        self.do_adc(!value);
    }

    /// Compare: sets C/Z/N from `register - value` without modifying either.
    fn do_compare(&mut self, register: u8, value: u8) {
        self.regs.status.set(Status::C, register >= value);
        self.set_zn(register.wrapping_sub(value));
    }

    /// Shift or rotate `latched` one bit. The carry takes the bit shifted
    /// out; rotates feed the old carry into the vacated bit.
    fn do_shift(&mut self, right: bool, rotate: bool) {
        let input = self.latched;
        let mut result = if right { input >> 1 } else { input << 1 };

        if rotate {
            let carry = u8::from(self.regs.status.contains(Status::C));
            result |= if right { carry << 7 } else { carry };
        }

        self.regs.status.set(
            Status::C,
            if right {
                input & 0x01 != 0
            } else {
                input & 0x80 != 0
            },
        );
        self.set_zn(result);
        self.latched = result;
    }

    // =========================================================================
    // OPERATION PHASE
    // =========================================================================

    /// Runs a mnemonic's operation. On entry `latched` holds the operand
    /// byte (reads, RMW, immediate); write-shaped operations leave the byte
    /// to store in `latched`.
    ///
    /// # Errors
    ///
    /// Returns [`CpuError::Halted`] for KIL.
    #[allow(clippy::too_many_lines)]
    fn do_operation(&mut self, mnemonic: Mnemonic) -> Result<(), CpuError> {
        match mnemonic {
            // Loads and stores
            Mnemonic::LDA => {
                self.regs.a = self.latched;
                self.set_zn(self.regs.a);
            }
            Mnemonic::LDX => {
                self.regs.x = self.latched;
                self.set_zn(self.regs.x);
            }
            Mnemonic::LDY => {
                self.regs.y = self.latched;
                self.set_zn(self.regs.y);
            }
            Mnemonic::LAX => {
                self.regs.a = self.latched;
                self.regs.x = self.latched;
                self.set_zn(self.latched);
            }
            Mnemonic::STA => self.latched = self.regs.a,
            Mnemonic::STX => self.latched = self.regs.x,
            Mnemonic::STY => self.latched = self.regs.y,
            Mnemonic::SAX => self.latched = self.regs.a & self.regs.x,

            // Transfers
            Mnemonic::TAX => {
                self.regs.x = self.regs.a;
                self.set_zn(self.regs.x);
            }
            Mnemonic::TAY => {
                self.regs.y = self.regs.a;
                self.set_zn(self.regs.y);
            }
            Mnemonic::TSX => {
                self.regs.x = self.regs.sp;
                self.set_zn(self.regs.x);
            }
            Mnemonic::TXA => {
                self.regs.a = self.regs.x;
                self.set_zn(self.regs.a);
            }
            Mnemonic::TYA => {
                self.regs.a = self.regs.y;
                self.set_zn(self.regs.a);
            }
            Mnemonic::TXS => self.regs.sp = self.regs.x, // no flags

            // Arithmetic
            Mnemonic::ADC => self.do_adc(self.latched),
            Mnemonic::SBC => self.do_sbc(self.latched),
            Mnemonic::DEC => {
                self.latched = self.latched.wrapping_sub(1);
                self.set_zn(self.latched);
            }
            Mnemonic::DEX => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.set_zn(self.regs.x);
            }
            Mnemonic::DEY => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.set_zn(self.regs.y);
            }
            Mnemonic::INC => {
                self.latched = self.latched.wrapping_add(1);
                self.set_zn(self.latched);
            }
            Mnemonic::INX => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.set_zn(self.regs.x);
            }
            Mnemonic::INY => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.set_zn(self.regs.y);
            }
            Mnemonic::ISC => {
                self.latched = self.latched.wrapping_add(1);
                self.do_sbc(self.latched);
            }
            Mnemonic::DCP => {
                self.latched = self.latched.wrapping_sub(1);
                self.do_compare(self.regs.a, self.latched);
            }

            // Logic
            Mnemonic::AND => {
                self.regs.a &= self.latched;
                self.set_zn(self.regs.a);
            }
            Mnemonic::ORA => {
                self.regs.a |= self.latched;
                self.set_zn(self.regs.a);
            }
            Mnemonic::EOR => {
                self.regs.a ^= self.latched;
                self.set_zn(self.regs.a);
            }
            Mnemonic::BIT => {
                let value = self.latched;
                self.regs.status.set(Status::N, value & 0x80 != 0);
                self.regs.status.set(Status::V, value & 0x40 != 0);
                self.regs
                    .status
                    .set(Status::Z, (self.regs.a & value) == 0);
            }

            // Shifts and rotates (operate on `latched`; IMP routes A through it)
            Mnemonic::ASL => self.do_shift(false, false),
            Mnemonic::LSR => self.do_shift(true, false),
            Mnemonic::ROL => self.do_shift(false, true),
            Mnemonic::ROR => self.do_shift(true, true),
            Mnemonic::SLO => {
                self.do_shift(false, false);
                self.regs.a |= self.latched;
                self.set_zn(self.regs.a);
            }
            Mnemonic::RLA => {
                self.do_shift(false, true);
                self.regs.a &= self.latched;
                self.set_zn(self.regs.a);
            }
            Mnemonic::SRE => {
                self.do_shift(true, false);
                self.regs.a ^= self.latched;
                self.set_zn(self.regs.a);
            }
            Mnemonic::RRA => {
                self.do_shift(true, true);
                self.do_adc(self.latched);
            }
            Mnemonic::ANC => {
                self.regs.a &= self.latched;
                self.set_zn(self.regs.a);
                self.regs.status.set(Status::C, self.regs.a & 0x80 != 0);
            }
            Mnemonic::ALR => {
                self.latched &= self.regs.a;
                self.do_shift(true, false);
                self.regs.a = self.latched;
            }
            Mnemonic::ARR => {
                self.regs.a &= self.latched;
                let carry = u8::from(self.regs.status.contains(Status::C));
                self.regs.a = (self.regs.a >> 1) | (carry << 7);
                self.set_zn(self.regs.a);
                self.regs.status.set(Status::C, self.regs.a & 0x40 != 0);
                self.regs.status.set(
                    Status::V,
                    ((self.regs.a >> 6) ^ (self.regs.a >> 5)) & 1 != 0,
                );
            }
            Mnemonic::AXS => {
                let anded = self.regs.a & self.regs.x;
                self.regs.status.set(Status::C, anded >= self.latched);
                self.regs.x = anded.wrapping_sub(self.latched);
                self.set_zn(self.regs.x);
            }
            Mnemonic::XAA => {
                self.regs.a = (self.regs.a | 0xEE) & self.regs.x & self.latched;
                self.set_zn(self.regs.a);
            }
            Mnemonic::LAS => {
                let result = self.latched & self.regs.sp;
                self.regs.a = result;
                self.regs.x = result;
                self.regs.sp = result;
                self.set_zn(result);
            }

            // Unstable high-byte stores
            Mnemonic::TAS => {
                self.regs.sp = self.regs.a & self.regs.x;
                self.latched = self.regs.sp & ((self.raw_operand >> 8) as u8).wrapping_add(1);
            }
            Mnemonic::SAY => {
                self.latched = self.regs.y & ((self.raw_operand >> 8) as u8).wrapping_add(1);
            }
            Mnemonic::XAS => {
                self.latched = self.regs.x & ((self.raw_operand >> 8) as u8).wrapping_add(1);
            }
            Mnemonic::AXA => {
                self.latched =
                    (self.regs.a & self.regs.x) & ((self.raw_operand >> 8) as u8).wrapping_add(1);
            }

            // Compares and flag operations
            Mnemonic::CMP => self.do_compare(self.regs.a, self.latched),
            Mnemonic::CPX => self.do_compare(self.regs.x, self.latched),
            Mnemonic::CPY => self.do_compare(self.regs.y, self.latched),
            Mnemonic::CLC => self.regs.status.remove(Status::C),
            Mnemonic::SEC => self.regs.status.insert(Status::C),
            Mnemonic::CLI => self.regs.status.remove(Status::I),
            Mnemonic::SEI => self.regs.status.insert(Status::I),
            Mnemonic::CLV => self.regs.status.remove(Status::V),
            Mnemonic::CLD => self.regs.status.remove(Status::D),
            Mnemonic::SED => self.regs.status.insert(Status::D),

            Mnemonic::NOP => {}

            Mnemonic::KIL => {
                let pc = self.regs.pc.wrapping_sub(1);
                log::error!("KIL opcode {:#04X} encountered at {pc:#06X}; halting", self.opcode);
                return Err(CpuError::Halted {
                    opcode: self.opcode,
                    pc,
                });
            }

            _ => debug_assert!(false, "{mnemonic} has no operation phase"),
        }

        Ok(())
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("regs", &self.regs)
            .field("cycles", &self.cycles)
            .field("instr_cycle", &self.instr_cycle)
            .field("cur_instr", &self.cur_instr)
            .field("cur_interrupt", &self.cur_interrupt)
            .field("queued_interrupt", &self.queued_interrupt)
            .finish_non_exhaustive()
    }
}

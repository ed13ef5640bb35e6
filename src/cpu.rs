// The chip behind the NINTENDO GAME BOY: The sharp LR35902.
use super::memory::Memory;
use super::register::Flag::{C, H, N, Z};
use super::register::Register;

// Machine cycles per base opcode (1 machine cycle = 4 T-cycles). Conditional
// branches list their not-taken cost here; the taken surcharge is added by
// the executor. Undocumented opcodes are given one cycle so a locked-up CPU
// still reports nonzero time.
//  0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
const OP_CYCLES: [u32; 256] = [
    1, 3, 2, 2, 1, 1, 2, 1, 5, 2, 2, 2, 1, 1, 2, 1, // 0
    1, 3, 2, 2, 1, 1, 2, 1, 3, 2, 2, 2, 1, 1, 2, 1, // 1
    2, 3, 2, 2, 1, 1, 2, 1, 2, 2, 2, 2, 1, 1, 2, 1, // 2
    2, 3, 2, 2, 3, 3, 3, 1, 2, 2, 2, 2, 1, 1, 2, 1, // 3
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 4
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 5
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 6
    2, 2, 2, 2, 2, 2, 1, 2, 1, 1, 1, 1, 1, 1, 2, 1, // 7
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 8
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 9
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // a
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // b
    2, 3, 3, 4, 3, 4, 2, 4, 2, 4, 3, 0, 3, 6, 2, 4, // c
    2, 3, 3, 1, 3, 4, 2, 4, 2, 4, 3, 1, 3, 1, 2, 4, // d
    3, 3, 2, 1, 1, 4, 2, 4, 4, 1, 4, 1, 1, 1, 2, 4, // e
    3, 3, 2, 1, 1, 4, 2, 4, 3, 2, 4, 1, 1, 1, 2, 4, // f
];

pub struct Cpu {
    pub reg: Register,
    pub halted: bool,
    // An undocumented opcode freezes the CPU for good; the scheduler is
    // expected to notice and bail out.
    pub locked: bool,
    pub ime: bool,
    // EI and DI do not change IME themselves. They arm one of these latches,
    // which commits after the following instruction has completed.
    pub ime_enable_pending: bool,
    pub ime_disable_pending: bool,
}

// ALU helpers shared between the base and CB tables. Flag behavior is where
// most emulator bugs live, so each helper owns the full rule for its
// operation.
impl Cpu {
    fn imm(&mut self, mem: &mut dyn Memory) -> u8 {
        let v = mem.get(self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(1);
        v
    }

    fn imm_word(&mut self, mem: &mut dyn Memory) -> u16 {
        let v = mem.get_word(self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(2);
        v
    }

    pub(crate) fn stack_add(&mut self, mem: &mut dyn Memory, v: u16) {
        self.reg.sp = self.reg.sp.wrapping_sub(2);
        mem.set_word(self.reg.sp, v);
    }

    pub(crate) fn stack_pop(&mut self, mem: &mut dyn Memory) -> u16 {
        let r = mem.get_word(self.reg.sp);
        self.reg.sp = self.reg.sp.wrapping_add(2);
        r
    }

    // ADD n to A. H from bit 3, C from bit 7.
    fn alu_add(&mut self, n: u8) {
        let a = self.reg.a;
        let r = a.wrapping_add(n);
        self.reg.set_flag(C, u16::from(a) + u16::from(n) > 0x00ff);
        self.reg.set_flag(H, (a & 0x0f) + (n & 0x0f) > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // ADD n plus the carry flag to A.
    fn alu_adc(&mut self, n: u8) {
        let a = self.reg.a;
        let c = u8::from(self.reg.get_flag(C));
        let r = a.wrapping_add(n).wrapping_add(c);
        self.reg.set_flag(C, u16::from(a) + u16::from(n) + u16::from(c) > 0x00ff);
        self.reg.set_flag(H, (a & 0x0f) + (n & 0x0f) + c > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // SUB n from A. C is the borrow flag, H the borrow from bit 4.
    fn alu_sub(&mut self, n: u8) {
        let a = self.reg.a;
        let r = a.wrapping_sub(n);
        self.reg.set_flag(C, u16::from(a) < u16::from(n));
        self.reg.set_flag(H, (a & 0x0f) < (n & 0x0f));
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // SUB n plus the carry flag from A.
    fn alu_sbc(&mut self, n: u8) {
        let a = self.reg.a;
        let c = u8::from(self.reg.get_flag(C));
        let r = a.wrapping_sub(n).wrapping_sub(c);
        self.reg.set_flag(C, u16::from(a) < u16::from(n) + u16::from(c));
        self.reg.set_flag(H, (a & 0x0f) < (n & 0x0f) + c);
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // AND always sets H, the one oddball among the logic ops.
    fn alu_and(&mut self, n: u8) {
        let r = self.reg.a & n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_or(&mut self, n: u8) {
        let r = self.reg.a | n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_xor(&mut self, n: u8) {
        let r = self.reg.a ^ n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // CP is SUB with the result discarded.
    fn alu_cp(&mut self, n: u8) {
        let r = self.reg.a;
        self.alu_sub(n);
        self.reg.a = r;
    }

    // INC/DEC leave the carry flag alone.
    fn alu_inc(&mut self, a: u8) -> u8 {
        let r = a.wrapping_add(1);
        self.reg.set_flag(H, (a & 0x0f) + 0x01 > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_dec(&mut self, a: u8) -> u8 {
        let r = a.wrapping_sub(1);
        self.reg.set_flag(H, a & 0x0f == 0x00);
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // ADD HL,nn. Half-carry comes out of bit 11 here, and Z is untouched.
    fn alu_add_hl(&mut self, n: u16) {
        let a = self.reg.get_hl();
        let r = a.wrapping_add(n);
        self.reg.set_flag(C, a > 0xffff - n);
        self.reg.set_flag(H, (a & 0x07ff) + (n & 0x07ff) > 0x07ff);
        self.reg.set_flag(N, false);
        self.reg.set_hl(r);
    }

    // Signed-immediate SP addition, shared by ADD SP,e and LD HL,SP+e. The
    // flags are computed on the low byte as if it were an 8-bit add; Z and N
    // are always clear.
    fn alu_add_sp(&mut self, mem: &mut dyn Memory) -> u16 {
        let a = self.reg.sp;
        let b = i16::from(self.imm(mem) as i8) as u16;
        self.reg.set_flag(C, (a & 0x00ff) + (b & 0x00ff) > 0x00ff);
        self.reg.set_flag(H, (a & 0x000f) + (b & 0x000f) > 0x000f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, false);
        a.wrapping_add(b)
    }

    fn alu_swap(&mut self, a: u8) -> u8 {
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, a == 0x00);
        (a >> 4) | (a << 4)
    }

    // Decimal adjust after a BCD add or subtract. N decides the direction,
    // H/C what was carried; C reports whether the high digit was adjusted.
    fn alu_daa(&mut self) {
        let mut a = self.reg.a;
        let mut adjust = if self.reg.get_flag(C) { 0x60 } else { 0x00 };
        if self.reg.get_flag(H) {
            adjust |= 0x06;
        }
        if !self.reg.get_flag(N) {
            if a & 0x0f > 0x09 {
                adjust |= 0x06;
            }
            if a > 0x99 {
                adjust |= 0x60;
            }
            a = a.wrapping_add(adjust);
        } else {
            a = a.wrapping_sub(adjust);
        }
        self.reg.set_flag(C, adjust >= 0x60);
        self.reg.set_flag(H, false);
        self.reg.set_flag(Z, a == 0x00);
        self.reg.a = a;
    }

    fn alu_cpl(&mut self) {
        self.reg.a = !self.reg.a;
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, true);
    }

    fn alu_ccf(&mut self) {
        let v = !self.reg.get_flag(C);
        self.reg.set_flag(C, v);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
    }

    fn alu_scf(&mut self) {
        self.reg.set_flag(C, true);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
    }

    // The rotate and shift family. In the CB table Z follows the result; the
    // four bare accumulator forms (RLCA etc.) overwrite Z with 0 afterwards.
    fn alu_rlc(&mut self, a: u8) -> u8 {
        let c = a & 0x80 != 0x00;
        let r = (a << 1) | u8::from(c);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_rl(&mut self, a: u8) -> u8 {
        let c = a & 0x80 != 0x00;
        let r = (a << 1) | u8::from(self.reg.get_flag(C));
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_rrc(&mut self, a: u8) -> u8 {
        let c = a & 0x01 != 0x00;
        let r = if c { 0x80 | (a >> 1) } else { a >> 1 };
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_rr(&mut self, a: u8) -> u8 {
        let c = a & 0x01 != 0x00;
        let r = if self.reg.get_flag(C) { 0x80 | (a >> 1) } else { a >> 1 };
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_sla(&mut self, a: u8) -> u8 {
        let c = a & 0x80 != 0x00;
        let r = a << 1;
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // Arithmetic shift right: bit 7 is duplicated.
    fn alu_sra(&mut self, a: u8) -> u8 {
        let c = a & 0x01 != 0x00;
        let r = (a >> 1) | (a & 0x80);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_srl(&mut self, a: u8) -> u8 {
        let c = a & 0x01 != 0x00;
        let r = a >> 1;
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // BIT b: Z mirrors the inverse of the tested bit, C survives.
    fn alu_bit(&mut self, a: u8, b: u8) {
        let r = a & (1 << b) == 0x00;
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r);
    }

    fn alu_set(&mut self, a: u8, b: u8) -> u8 {
        a | (1 << b)
    }

    fn alu_res(&mut self, a: u8, b: u8) -> u8 {
        a & !(1 << b)
    }

    // Relative jump. The displacement is signed and applies to the PC after
    // the displacement byte has been fetched.
    fn alu_jr(&mut self, mem: &mut dyn Memory) {
        let n = self.imm(mem) as i8;
        self.reg.pc = (i32::from(self.reg.pc) + i32::from(n)) as u16;
    }
}

impl Cpu {
    pub fn power_up() -> Self {
        Self {
            reg: Register::power_up(),
            halted: false,
            locked: false,
            ime: true,
            ime_enable_pending: false,
            ime_disable_pending: false,
        }
    }

    // Runs one instruction and returns the T-cycles it consumed. A halted
    // CPU burns the 4-cycle idle fetch and leaves PC alone.
    pub fn next(&mut self, mem: &mut dyn Memory) -> u32 {
        // An armed EI/DI from the previous instruction commits now, before
        // this instruction dispatches. Interrupt servicing happens between
        // scheduler ticks, so the instruction after EI always completes with
        // interrupts still blocked.
        if self.ime_enable_pending {
            self.ime = true;
            self.ime_enable_pending = false;
        }
        if self.ime_disable_pending {
            self.ime = false;
            self.ime_disable_pending = false;
        }
        if self.halted {
            return 4;
        }
        self.ex(mem) * 4
    }

    // Operand index decoding for the CB table: 0..=7 maps to
    // B, C, D, E, H, L, (HL), A.
    fn get_r(&self, mem: &dyn Memory, i: u8) -> u8 {
        match i {
            0x00 => self.reg.b,
            0x01 => self.reg.c,
            0x02 => self.reg.d,
            0x03 => self.reg.e,
            0x04 => self.reg.h,
            0x05 => self.reg.l,
            0x06 => mem.get(self.reg.get_hl()),
            _ => self.reg.a,
        }
    }

    fn set_r(&mut self, mem: &mut dyn Memory, i: u8, v: u8) {
        match i {
            0x00 => self.reg.b = v,
            0x01 => self.reg.c = v,
            0x02 => self.reg.d = v,
            0x03 => self.reg.e = v,
            0x04 => self.reg.h = v,
            0x05 => self.reg.l = v,
            0x06 => mem.set(self.reg.get_hl(), v),
            _ => self.reg.a = v,
        }
    }

    // The CB-prefixed table decomposes on bits 7..6 (operation group), 5..3
    // (rotate kind or bit index) and 2..0 (operand), so eight arms cover all
    // 256 encodings.
    fn ex_cb(&mut self, mem: &mut dyn Memory, op: u8) -> u32 {
        let i = op & 0x07;
        let b = (op >> 3) & 0x07;
        match op >> 6 {
            0x00 => {
                let v = self.get_r(mem, i);
                let r = match b {
                    0x00 => self.alu_rlc(v),
                    0x01 => self.alu_rrc(v),
                    0x02 => self.alu_rl(v),
                    0x03 => self.alu_rr(v),
                    0x04 => self.alu_sla(v),
                    0x05 => self.alu_sra(v),
                    0x06 => self.alu_swap(v),
                    _ => self.alu_srl(v),
                };
                self.set_r(mem, i, r);
            }
            0x01 => {
                let v = self.get_r(mem, i);
                self.alu_bit(v, b);
            }
            0x02 => {
                let r = self.alu_res(self.get_r(mem, i), b);
                self.set_r(mem, i, r);
            }
            _ => {
                let r = self.alu_set(self.get_r(mem, i), b);
                self.set_r(mem, i, r);
            }
        }
        // (HL) operands pay for the extra bus accesses; BIT only reads.
        if i == 0x06 {
            if op >> 6 == 0x01 {
                3
            } else {
                4
            }
        } else {
            2
        }
    }

    #[allow(clippy::cognitive_complexity)]
    fn ex(&mut self, mem: &mut dyn Memory) -> u32 {
        let opcode = self.imm(mem);
        // Conditional jumps/calls/returns record whether they branched; the
        // surcharge at the bottom depends on it.
        let mut taken = false;
        match opcode {
            // NOP
            0x00 => {}
            // LD rr,nn / LD SP,nn
            0x01 => {
                let v = self.imm_word(mem);
                self.reg.set_bc(v);
            }
            0x11 => {
                let v = self.imm_word(mem);
                self.reg.set_de(v);
            }
            0x21 => {
                let v = self.imm_word(mem);
                self.reg.set_hl(v);
            }
            0x31 => self.reg.sp = self.imm_word(mem),
            // LD (BC)/(DE),A and back
            0x02 => mem.set(self.reg.get_bc(), self.reg.a),
            0x12 => mem.set(self.reg.get_de(), self.reg.a),
            0x0a => self.reg.a = mem.get(self.reg.get_bc()),
            0x1a => self.reg.a = mem.get(self.reg.get_de()),
            // LD (HL±),A and LD A,(HL±)
            0x22 => {
                let a = self.reg.get_hl();
                mem.set(a, self.reg.a);
                self.reg.set_hl(a.wrapping_add(1));
            }
            0x32 => {
                let a = self.reg.get_hl();
                mem.set(a, self.reg.a);
                self.reg.set_hl(a.wrapping_sub(1));
            }
            0x2a => {
                let a = self.reg.get_hl();
                self.reg.a = mem.get(a);
                self.reg.set_hl(a.wrapping_add(1));
            }
            0x3a => {
                let a = self.reg.get_hl();
                self.reg.a = mem.get(a);
                self.reg.set_hl(a.wrapping_sub(1));
            }
            // INC rr / DEC rr, no flags
            0x03 => {
                let v = self.reg.get_bc().wrapping_add(1);
                self.reg.set_bc(v);
            }
            0x13 => {
                let v = self.reg.get_de().wrapping_add(1);
                self.reg.set_de(v);
            }
            0x23 => {
                let v = self.reg.get_hl().wrapping_add(1);
                self.reg.set_hl(v);
            }
            0x33 => self.reg.sp = self.reg.sp.wrapping_add(1),
            0x0b => {
                let v = self.reg.get_bc().wrapping_sub(1);
                self.reg.set_bc(v);
            }
            0x1b => {
                let v = self.reg.get_de().wrapping_sub(1);
                self.reg.set_de(v);
            }
            0x2b => {
                let v = self.reg.get_hl().wrapping_sub(1);
                self.reg.set_hl(v);
            }
            0x3b => self.reg.sp = self.reg.sp.wrapping_sub(1),
            // INC r / DEC r
            0x04 => self.reg.b = self.alu_inc(self.reg.b),
            0x0c => self.reg.c = self.alu_inc(self.reg.c),
            0x14 => self.reg.d = self.alu_inc(self.reg.d),
            0x1c => self.reg.e = self.alu_inc(self.reg.e),
            0x24 => self.reg.h = self.alu_inc(self.reg.h),
            0x2c => self.reg.l = self.alu_inc(self.reg.l),
            0x3c => self.reg.a = self.alu_inc(self.reg.a),
            0x05 => self.reg.b = self.alu_dec(self.reg.b),
            0x0d => self.reg.c = self.alu_dec(self.reg.c),
            0x15 => self.reg.d = self.alu_dec(self.reg.d),
            0x1d => self.reg.e = self.alu_dec(self.reg.e),
            0x25 => self.reg.h = self.alu_dec(self.reg.h),
            0x2d => self.reg.l = self.alu_dec(self.reg.l),
            0x3d => self.reg.a = self.alu_dec(self.reg.a),
            // INC (HL) / DEC (HL) act on the memory byte
            0x34 => {
                let a = self.reg.get_hl();
                let v = mem.get(a);
                let v = self.alu_inc(v);
                mem.set(a, v);
            }
            0x35 => {
                let a = self.reg.get_hl();
                let v = mem.get(a);
                let v = self.alu_dec(v);
                mem.set(a, v);
            }
            // LD r,n
            0x06 => self.reg.b = self.imm(mem),
            0x0e => self.reg.c = self.imm(mem),
            0x16 => self.reg.d = self.imm(mem),
            0x1e => self.reg.e = self.imm(mem),
            0x26 => self.reg.h = self.imm(mem),
            0x2e => self.reg.l = self.imm(mem),
            0x3e => self.reg.a = self.imm(mem),
            0x36 => {
                let a = self.reg.get_hl();
                let v = self.imm(mem);
                mem.set(a, v);
            }
            // Accumulator rotates. Unlike their CB twins these force Z off.
            0x07 => {
                self.reg.a = self.alu_rlc(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x0f => {
                self.reg.a = self.alu_rrc(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x17 => {
                self.reg.a = self.alu_rl(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x1f => {
                self.reg.a = self.alu_rr(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            // LD (nn),SP
            0x08 => {
                let a = self.imm_word(mem);
                mem.set_word(a, self.reg.sp);
            }
            // ADD HL,rr
            0x09 => self.alu_add_hl(self.reg.get_bc()),
            0x19 => self.alu_add_hl(self.reg.get_de()),
            0x29 => self.alu_add_hl(self.reg.get_hl()),
            0x39 => self.alu_add_hl(self.reg.sp),
            // STOP behaves as HALT here; the mandatory 0x00 pad byte is
            // consumed so execution resumes past it.
            0x10 => {
                self.halted = true;
                self.reg.pc = self.reg.pc.wrapping_add(1);
            }
            // JR e / JR cc,e
            0x18 => self.alu_jr(mem),
            0x20 => {
                if !self.reg.get_flag(Z) {
                    self.alu_jr(mem);
                    taken = true;
                } else {
                    self.reg.pc = self.reg.pc.wrapping_add(1);
                }
            }
            0x28 => {
                if self.reg.get_flag(Z) {
                    self.alu_jr(mem);
                    taken = true;
                } else {
                    self.reg.pc = self.reg.pc.wrapping_add(1);
                }
            }
            0x30 => {
                if !self.reg.get_flag(C) {
                    self.alu_jr(mem);
                    taken = true;
                } else {
                    self.reg.pc = self.reg.pc.wrapping_add(1);
                }
            }
            0x38 => {
                if self.reg.get_flag(C) {
                    self.alu_jr(mem);
                    taken = true;
                } else {
                    self.reg.pc = self.reg.pc.wrapping_add(1);
                }
            }
            // DAA, CPL, SCF, CCF
            0x27 => self.alu_daa(),
            0x2f => self.alu_cpl(),
            0x37 => self.alu_scf(),
            0x3f => self.alu_ccf(),
            // LD r,r'. The diagonal encodings are plain NOPs, and 0x76 is
            // HALT.
            0x40 => {}
            0x41 => self.reg.b = self.reg.c,
            0x42 => self.reg.b = self.reg.d,
            0x43 => self.reg.b = self.reg.e,
            0x44 => self.reg.b = self.reg.h,
            0x45 => self.reg.b = self.reg.l,
            0x46 => self.reg.b = mem.get(self.reg.get_hl()),
            0x47 => self.reg.b = self.reg.a,
            0x48 => self.reg.c = self.reg.b,
            0x49 => {}
            0x4a => self.reg.c = self.reg.d,
            0x4b => self.reg.c = self.reg.e,
            0x4c => self.reg.c = self.reg.h,
            0x4d => self.reg.c = self.reg.l,
            0x4e => self.reg.c = mem.get(self.reg.get_hl()),
            0x4f => self.reg.c = self.reg.a,
            0x50 => self.reg.d = self.reg.b,
            0x51 => self.reg.d = self.reg.c,
            0x52 => {}
            0x53 => self.reg.d = self.reg.e,
            0x54 => self.reg.d = self.reg.h,
            0x55 => self.reg.d = self.reg.l,
            0x56 => self.reg.d = mem.get(self.reg.get_hl()),
            0x57 => self.reg.d = self.reg.a,
            0x58 => self.reg.e = self.reg.b,
            0x59 => self.reg.e = self.reg.c,
            0x5a => self.reg.e = self.reg.d,
            0x5b => {}
            0x5c => self.reg.e = self.reg.h,
            0x5d => self.reg.e = self.reg.l,
            0x5e => self.reg.e = mem.get(self.reg.get_hl()),
            0x5f => self.reg.e = self.reg.a,
            0x60 => self.reg.h = self.reg.b,
            0x61 => self.reg.h = self.reg.c,
            0x62 => self.reg.h = self.reg.d,
            0x63 => self.reg.h = self.reg.e,
            0x64 => {}
            0x65 => self.reg.h = self.reg.l,
            0x66 => self.reg.h = mem.get(self.reg.get_hl()),
            0x67 => self.reg.h = self.reg.a,
            0x68 => self.reg.l = self.reg.b,
            0x69 => self.reg.l = self.reg.c,
            0x6a => self.reg.l = self.reg.d,
            0x6b => self.reg.l = self.reg.e,
            0x6c => self.reg.l = self.reg.h,
            0x6d => {}
            0x6e => self.reg.l = mem.get(self.reg.get_hl()),
            0x6f => self.reg.l = self.reg.a,
            0x70 => mem.set(self.reg.get_hl(), self.reg.b),
            0x71 => mem.set(self.reg.get_hl(), self.reg.c),
            0x72 => mem.set(self.reg.get_hl(), self.reg.d),
            0x73 => mem.set(self.reg.get_hl(), self.reg.e),
            0x74 => mem.set(self.reg.get_hl(), self.reg.h),
            0x75 => mem.set(self.reg.get_hl(), self.reg.l),
            0x76 => self.halted = true,
            0x77 => mem.set(self.reg.get_hl(), self.reg.a),
            0x78 => self.reg.a = self.reg.b,
            0x79 => self.reg.a = self.reg.c,
            0x7a => self.reg.a = self.reg.d,
            0x7b => self.reg.a = self.reg.e,
            0x7c => self.reg.a = self.reg.h,
            0x7d => self.reg.a = self.reg.l,
            0x7e => self.reg.a = mem.get(self.reg.get_hl()),
            0x7f => {}
            // The 8-bit ALU block, one row per operation
            0x80 => self.alu_add(self.reg.b),
            0x81 => self.alu_add(self.reg.c),
            0x82 => self.alu_add(self.reg.d),
            0x83 => self.alu_add(self.reg.e),
            0x84 => self.alu_add(self.reg.h),
            0x85 => self.alu_add(self.reg.l),
            0x86 => {
                let v = mem.get(self.reg.get_hl());
                self.alu_add(v);
            }
            0x87 => self.alu_add(self.reg.a),
            0x88 => self.alu_adc(self.reg.b),
            0x89 => self.alu_adc(self.reg.c),
            0x8a => self.alu_adc(self.reg.d),
            0x8b => self.alu_adc(self.reg.e),
            0x8c => self.alu_adc(self.reg.h),
            0x8d => self.alu_adc(self.reg.l),
            0x8e => {
                let v = mem.get(self.reg.get_hl());
                self.alu_adc(v);
            }
            0x8f => self.alu_adc(self.reg.a),
            0x90 => self.alu_sub(self.reg.b),
            0x91 => self.alu_sub(self.reg.c),
            0x92 => self.alu_sub(self.reg.d),
            0x93 => self.alu_sub(self.reg.e),
            0x94 => self.alu_sub(self.reg.h),
            0x95 => self.alu_sub(self.reg.l),
            0x96 => {
                let v = mem.get(self.reg.get_hl());
                self.alu_sub(v);
            }
            0x97 => self.alu_sub(self.reg.a),
            0x98 => self.alu_sbc(self.reg.b),
            0x99 => self.alu_sbc(self.reg.c),
            0x9a => self.alu_sbc(self.reg.d),
            0x9b => self.alu_sbc(self.reg.e),
            0x9c => self.alu_sbc(self.reg.h),
            0x9d => self.alu_sbc(self.reg.l),
            0x9e => {
                let v = mem.get(self.reg.get_hl());
                self.alu_sbc(v);
            }
            0x9f => self.alu_sbc(self.reg.a),
            0xa0 => self.alu_and(self.reg.b),
            0xa1 => self.alu_and(self.reg.c),
            0xa2 => self.alu_and(self.reg.d),
            0xa3 => self.alu_and(self.reg.e),
            0xa4 => self.alu_and(self.reg.h),
            0xa5 => self.alu_and(self.reg.l),
            0xa6 => {
                let v = mem.get(self.reg.get_hl());
                self.alu_and(v);
            }
            0xa7 => self.alu_and(self.reg.a),
            0xa8 => self.alu_xor(self.reg.b),
            0xa9 => self.alu_xor(self.reg.c),
            0xaa => self.alu_xor(self.reg.d),
            0xab => self.alu_xor(self.reg.e),
            0xac => self.alu_xor(self.reg.h),
            0xad => self.alu_xor(self.reg.l),
            0xae => {
                let v = mem.get(self.reg.get_hl());
                self.alu_xor(v);
            }
            0xaf => self.alu_xor(self.reg.a),
            0xb0 => self.alu_or(self.reg.b),
            0xb1 => self.alu_or(self.reg.c),
            0xb2 => self.alu_or(self.reg.d),
            0xb3 => self.alu_or(self.reg.e),
            0xb4 => self.alu_or(self.reg.h),
            0xb5 => self.alu_or(self.reg.l),
            0xb6 => {
                let v = mem.get(self.reg.get_hl());
                self.alu_or(v);
            }
            0xb7 => self.alu_or(self.reg.a),
            0xb8 => self.alu_cp(self.reg.b),
            0xb9 => self.alu_cp(self.reg.c),
            0xba => self.alu_cp(self.reg.d),
            0xbb => self.alu_cp(self.reg.e),
            0xbc => self.alu_cp(self.reg.h),
            0xbd => self.alu_cp(self.reg.l),
            0xbe => {
                let v = mem.get(self.reg.get_hl());
                self.alu_cp(v);
            }
            0xbf => self.alu_cp(self.reg.a),
            // RET / RET cc / RETI
            0xc9 => self.reg.pc = self.stack_pop(mem),
            0xc0 => {
                if !self.reg.get_flag(Z) {
                    self.reg.pc = self.stack_pop(mem);
                    taken = true;
                }
            }
            0xc8 => {
                if self.reg.get_flag(Z) {
                    self.reg.pc = self.stack_pop(mem);
                    taken = true;
                }
            }
            0xd0 => {
                if !self.reg.get_flag(C) {
                    self.reg.pc = self.stack_pop(mem);
                    taken = true;
                }
            }
            0xd8 => {
                if self.reg.get_flag(C) {
                    self.reg.pc = self.stack_pop(mem);
                    taken = true;
                }
            }
            // RETI re-enables interrupts with no delay.
            0xd9 => {
                self.reg.pc = self.stack_pop(mem);
                self.ime = true;
            }
            // POP rr / PUSH rr
            0xc1 => {
                let v = self.stack_pop(mem);
                self.reg.set_bc(v);
            }
            0xd1 => {
                let v = self.stack_pop(mem);
                self.reg.set_de(v);
            }
            0xe1 => {
                let v = self.stack_pop(mem);
                self.reg.set_hl(v);
            }
            0xf1 => {
                let v = self.stack_pop(mem);
                self.reg.set_af(v);
            }
            0xc5 => {
                let v = self.reg.get_bc();
                self.stack_add(mem, v);
            }
            0xd5 => {
                let v = self.reg.get_de();
                self.stack_add(mem, v);
            }
            0xe5 => {
                let v = self.reg.get_hl();
                self.stack_add(mem, v);
            }
            0xf5 => {
                let v = self.reg.get_af();
                self.stack_add(mem, v);
            }
            // JP nn / JP cc,nn / JP HL
            0xc3 => self.reg.pc = self.imm_word(mem),
            0xe9 => self.reg.pc = self.reg.get_hl(),
            0xc2 => {
                let pc = self.imm_word(mem);
                if !self.reg.get_flag(Z) {
                    self.reg.pc = pc;
                    taken = true;
                }
            }
            0xca => {
                let pc = self.imm_word(mem);
                if self.reg.get_flag(Z) {
                    self.reg.pc = pc;
                    taken = true;
                }
            }
            0xd2 => {
                let pc = self.imm_word(mem);
                if !self.reg.get_flag(C) {
                    self.reg.pc = pc;
                    taken = true;
                }
            }
            0xda => {
                let pc = self.imm_word(mem);
                if self.reg.get_flag(C) {
                    self.reg.pc = pc;
                    taken = true;
                }
            }
            // CALL nn / CALL cc,nn
            0xcd => {
                let nn = self.imm_word(mem);
                let pc = self.reg.pc;
                self.stack_add(mem, pc);
                self.reg.pc = nn;
            }
            0xc4 => {
                let nn = self.imm_word(mem);
                if !self.reg.get_flag(Z) {
                    let pc = self.reg.pc;
                    self.stack_add(mem, pc);
                    self.reg.pc = nn;
                    taken = true;
                }
            }
            0xcc => {
                let nn = self.imm_word(mem);
                if self.reg.get_flag(Z) {
                    let pc = self.reg.pc;
                    self.stack_add(mem, pc);
                    self.reg.pc = nn;
                    taken = true;
                }
            }
            0xd4 => {
                let nn = self.imm_word(mem);
                if !self.reg.get_flag(C) {
                    let pc = self.reg.pc;
                    self.stack_add(mem, pc);
                    self.reg.pc = nn;
                    taken = true;
                }
            }
            0xdc => {
                let nn = self.imm_word(mem);
                if self.reg.get_flag(C) {
                    let pc = self.reg.pc;
                    self.stack_add(mem, pc);
                    self.reg.pc = nn;
                    taken = true;
                }
            }
            // RST n
            0xc7 | 0xcf | 0xd7 | 0xdf | 0xe7 | 0xef | 0xf7 | 0xff => {
                let pc = self.reg.pc;
                self.stack_add(mem, pc);
                self.reg.pc = u16::from(opcode & 0x38);
            }
            // ALU on immediate
            0xc6 => {
                let v = self.imm(mem);
                self.alu_add(v);
            }
            0xce => {
                let v = self.imm(mem);
                self.alu_adc(v);
            }
            0xd6 => {
                let v = self.imm(mem);
                self.alu_sub(v);
            }
            0xde => {
                let v = self.imm(mem);
                self.alu_sbc(v);
            }
            0xe6 => {
                let v = self.imm(mem);
                self.alu_and(v);
            }
            0xee => {
                let v = self.imm(mem);
                self.alu_xor(v);
            }
            0xf6 => {
                let v = self.imm(mem);
                self.alu_or(v);
            }
            0xfe => {
                let v = self.imm(mem);
                self.alu_cp(v);
            }
            // The 0xFF00 page loads
            0xe0 => {
                let a = 0xff00 | u16::from(self.imm(mem));
                mem.set(a, self.reg.a);
            }
            0xf0 => {
                let a = 0xff00 | u16::from(self.imm(mem));
                self.reg.a = mem.get(a);
            }
            0xe2 => mem.set(0xff00 | u16::from(self.reg.c), self.reg.a),
            0xf2 => self.reg.a = mem.get(0xff00 | u16::from(self.reg.c)),
            // LD (nn),A / LD A,(nn)
            0xea => {
                let a = self.imm_word(mem);
                mem.set(a, self.reg.a);
            }
            0xfa => {
                let a = self.imm_word(mem);
                self.reg.a = mem.get(a);
            }
            // ADD SP,e / LD HL,SP+e / LD SP,HL
            0xe8 => self.reg.sp = self.alu_add_sp(mem),
            0xf8 => {
                let v = self.alu_add_sp(mem);
                self.reg.set_hl(v);
            }
            0xf9 => self.reg.sp = self.reg.get_hl(),
            // DI / EI arm the latch; see next().
            0xf3 => self.ime_disable_pending = true,
            0xfb => self.ime_enable_pending = true,
            // The CB prefix selects the secondary table.
            0xcb => {
                let cb = self.imm(mem);
                return self.ex_cb(mem, cb);
            }
            // Holes in the opcode map freeze the CPU on real hardware.
            0xd3 | 0xdb | 0xdd | 0xe3 | 0xe4 | 0xeb | 0xec | 0xed | 0xf4 | 0xfc | 0xfd => {
                rog::println!("Illegal opcode 0x{:02x} at 0x{:04x}", opcode, self.reg.pc.wrapping_sub(1));
                self.halted = true;
                self.locked = true;
            }
        }
        let ecycle = if taken {
            match opcode {
                0x20 | 0x28 | 0x30 | 0x38 | 0xc2 | 0xca | 0xd2 | 0xda => 1,
                _ => 3,
            }
        } else {
            0
        };
        OP_CYCLES[opcode as usize] + ecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use crate::mmunit::Mmunit;

    // A machine whose program starts at the reset PC (0x0100), padded into a
    // 32KB no-MBC image.
    fn machine(prog: &[u8]) -> (Cpu, Mmunit) {
        let mut rom = vec![0x00; 0x8000];
        rom[0x0147] = 0x00;
        rom[0x0100..0x0100 + prog.len()].copy_from_slice(prog);
        let cart = Cartridge::from_bytes(rom).unwrap();
        (Cpu::power_up(), Mmunit::power_up(cart))
    }

    fn f(cpu: &Cpu) -> u8 {
        (cpu.reg.get_af() & 0x00ff) as u8
    }

    #[test]
    fn ld_b_immediate() {
        let (mut cpu, mut mem) = machine(&[0x06, 0xab]);
        let cycles = cpu.next(&mut mem);
        assert_eq!(cycles, 8);
        assert_eq!(cpu.reg.b, 0xab);
        assert_eq!(cpu.reg.pc, 0x0102);
        assert_eq!(f(&cpu), 0xb0);
    }

    #[test]
    fn add_sets_half_carry() {
        let (mut cpu, mut mem) = machine(&[0x3e, 0x0f, 0x80]);
        cpu.reg.b = 0x01;
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x10);
        assert_eq!(f(&cpu), 0x20);
        assert_eq!(cpu.reg.pc, 0x0103);
    }

    #[test]
    fn add_wraps_to_zero_with_carries() {
        let (mut cpu, mut mem) = machine(&[0x3e, 0xff, 0x80]);
        cpu.reg.b = 0x01;
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x00);
        assert_eq!(f(&cpu), 0xb0);
    }

    #[test]
    fn adc_includes_the_carry() {
        let (mut cpu, mut mem) = machine(&[0x3e, 0xff, 0x80, 0x88]);
        cpu.reg.b = 0x01;
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        // A=0x00, C=1; ADC A,B folds the carry in.
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x02);
        assert_eq!(f(&cpu), 0x00);
    }

    #[test]
    fn sub_and_cp_flags() {
        let (mut cpu, mut mem) = machine(&[0x3e, 0x10, 0x90, 0xfe, 0x01]);
        cpu.reg.b = 0x01;
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        // 0x10 - 0x01 borrows from bit 4 only.
        assert_eq!(cpu.reg.a, 0x0f);
        assert_eq!(f(&cpu), 0x60);
        // CP leaves A alone but rewrites the flags.
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x0f);
        assert_eq!(f(&cpu), 0x40);
    }

    #[test]
    fn sbc_borrows_through_carry() {
        let (mut cpu, mut mem) = machine(&[0x37, 0x3e, 0x00, 0x98]);
        cpu.reg.b = 0x00;
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        // 0x00 - 0x00 - carry = 0xff with both borrows set.
        assert_eq!(cpu.reg.a, 0xff);
        assert_eq!(f(&cpu), 0x70);
    }

    #[test]
    fn and_or_xor_flags() {
        let (mut cpu, mut mem) = machine(&[0x3e, 0x0f, 0xe6, 0xf0, 0xf6, 0x00, 0xee, 0x00]);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x00);
        assert_eq!(f(&cpu), 0xa0);
        cpu.next(&mut mem);
        assert_eq!(f(&cpu), 0x80);
        cpu.next(&mut mem);
        assert_eq!(f(&cpu), 0x80);
    }

    #[test]
    fn inc_dec_preserve_carry() {
        let (mut cpu, mut mem) = machine(&[0x37, 0x04, 0x05]);
        cpu.reg.b = 0xff;
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.b, 0x00);
        // Z and H from the increment, C still set from SCF.
        assert_eq!(f(&cpu), 0xb0);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.b, 0xff);
        assert_eq!(f(&cpu), 0x70);
    }

    #[test]
    fn inc_dec_on_hl_memory() {
        let (mut cpu, mut mem) = machine(&[0x34, 0x35, 0x35]);
        cpu.reg.set_hl(0xc123);
        mem.set(0xc123, 0x0f);
        cpu.next(&mut mem);
        assert_eq!(mem.get(0xc123), 0x10);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(mem.get(0xc123), 0x0e);
    }

    #[test]
    fn ld_hl_immediate_word() {
        let (mut cpu, mut mem) = machine(&[0x21, 0xad, 0xde]);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.h, 0xde);
        assert_eq!(cpu.reg.l, 0xad);
        assert_eq!(cpu.reg.pc, 0x0103);
    }

    #[test]
    fn ldi_ldd_move_hl() {
        let (mut cpu, mut mem) = machine(&[0x22, 0x3a]);
        cpu.reg.set_hl(0xc000);
        cpu.reg.a = 0x5a;
        cpu.next(&mut mem);
        assert_eq!(mem.get(0xc000), 0x5a);
        assert_eq!(cpu.reg.get_hl(), 0xc001);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x00);
        assert_eq!(cpu.reg.get_hl(), 0xc000);
    }

    #[test]
    fn jp_absolute() {
        let (mut cpu, mut mem) = machine(&[0xc3, 0xad, 0xde]);
        let cycles = cpu.next(&mut mem);
        assert_eq!(cycles, 16);
        assert_eq!(cpu.reg.pc, 0xdead);
    }

    #[test]
    fn jp_hl() {
        let (mut cpu, mut mem) = machine(&[0xe9]);
        cpu.reg.set_hl(0x4321);
        assert_eq!(cpu.next(&mut mem), 4);
        assert_eq!(cpu.reg.pc, 0x4321);
    }

    #[test]
    fn jr_backwards() {
        let (mut cpu, mut mem) = machine(&[0x00, 0x18, 0xfe]);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        // Displacement applies after the operand fetch: 0x0103 - 2.
        assert_eq!(cpu.reg.pc, 0x0101);
    }

    #[test]
    fn jr_conditional_cycles() {
        // Z is set at reset, so JR NZ falls through and JR Z branches.
        let (mut cpu, mut mem) = machine(&[0x20, 0x10, 0x28, 0x10]);
        assert_eq!(cpu.next(&mut mem), 8);
        assert_eq!(cpu.reg.pc, 0x0102);
        assert_eq!(cpu.next(&mut mem), 12);
        assert_eq!(cpu.reg.pc, 0x0114);
    }

    #[test]
    fn jp_conditional_on_carry() {
        let (mut cpu, mut mem) = machine(&[0xd2, 0x00, 0x20, 0xda, 0x00, 0x30]);
        // C is set at reset: JP NC not taken, JP C taken.
        assert_eq!(cpu.next(&mut mem), 12);
        assert_eq!(cpu.reg.pc, 0x0103);
        assert_eq!(cpu.next(&mut mem), 16);
        assert_eq!(cpu.reg.pc, 0x3000);
    }

    #[test]
    fn call_pushes_the_return_address() {
        let (mut cpu, mut mem) = machine(&[0xcd, 0xce, 0xfa]);
        let cycles = cpu.next(&mut mem);
        assert_eq!(cycles, 24);
        assert_eq!(cpu.reg.pc, 0xface);
        assert_eq!(cpu.reg.sp, 0xfffc);
        assert_eq!(mem.get(0xfffd), 0x01);
        assert_eq!(mem.get(0xfffc), 0x03);
    }

    #[test]
    fn call_and_ret_round_trip() {
        let mut prog = vec![0xcd, 0x10, 0x01];
        prog.resize(0x10, 0x00);
        prog.push(0xc9); // 0x0110: RET
        let (mut cpu, mut mem) = machine(&prog);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.pc, 0x0110);
        let cycles = cpu.next(&mut mem);
        assert_eq!(cycles, 16);
        assert_eq!(cpu.reg.pc, 0x0103);
        assert_eq!(cpu.reg.sp, 0xfffe);
    }

    #[test]
    fn ret_conditional_cycles() {
        let (mut cpu, mut mem) = machine(&[0xc0, 0xc8]);
        cpu.stack_add(&mut mem, 0x1234);
        // Z set at reset: RET NZ is 8 cycles, RET Z 20.
        assert_eq!(cpu.next(&mut mem), 8);
        assert_eq!(cpu.reg.pc, 0x0101);
        assert_eq!(cpu.next(&mut mem), 20);
        assert_eq!(cpu.reg.pc, 0x1234);
    }

    #[test]
    fn rst_vectors() {
        let (mut cpu, mut mem) = machine(&[0xef]);
        assert_eq!(cpu.next(&mut mem), 16);
        assert_eq!(cpu.reg.pc, 0x0028);
        assert_eq!(mem.get_word(cpu.reg.sp), 0x0101);
    }

    #[test]
    fn push_pop_identity() {
        let (mut cpu, mut mem) = machine(&[0xc5, 0xd1]);
        cpu.reg.set_bc(0xbeef);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.get_de(), 0xbeef);
        assert_eq!(cpu.reg.sp, 0xfffe);
    }

    #[test]
    fn pop_af_masks_the_low_nibble() {
        let (mut cpu, mut mem) = machine(&[0x01, 0xff, 0x12, 0xc5, 0xf1]);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.get_af(), 0x12f0);
    }

    #[test]
    fn ld_nn_sp_stores_both_bytes() {
        let (mut cpu, mut mem) = machine(&[0x08, 0x00, 0xc0]);
        assert_eq!(cpu.next(&mut mem), 20);
        assert_eq!(mem.get_word(0xc000), 0xfffe);
    }

    #[test]
    fn add_hl_preserves_z() {
        let (mut cpu, mut mem) = machine(&[0x09]);
        cpu.reg.set_hl(0x0fff);
        cpu.reg.set_bc(0x0001);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.get_hl(), 0x1000);
        // H from bit 11, Z untouched from reset.
        assert_eq!(f(&cpu), 0xa0);
    }

    #[test]
    fn add_hl_carry_from_bit_15() {
        let (mut cpu, mut mem) = machine(&[0x39]);
        cpu.reg.set_hl(0xffff);
        cpu.reg.sp = 0x0001;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.get_hl(), 0x0000);
        assert_eq!(f(&cpu), 0xb0);
    }

    #[test]
    fn ld_hl_sp_plus_e_flags() {
        let (mut cpu, mut mem) = machine(&[0xf8, 0x08]);
        cpu.reg.sp = 0xfff8;
        assert_eq!(cpu.next(&mut mem), 12);
        assert_eq!(cpu.reg.get_hl(), 0x0000);
        assert_eq!(f(&cpu), 0x30);
        assert_eq!(cpu.reg.sp, 0xfff8);
    }

    #[test]
    fn add_sp_negative_offset() {
        let (mut cpu, mut mem) = machine(&[0xe8, 0xfe]);
        cpu.reg.sp = 0x0100;
        assert_eq!(cpu.next(&mut mem), 16);
        assert_eq!(cpu.reg.sp, 0x00fe);
    }

    #[test]
    fn ldh_uses_the_ff00_page() {
        let (mut cpu, mut mem) = machine(&[0xe0, 0x80, 0xf0, 0x80]);
        cpu.reg.a = 0x77;
        cpu.next(&mut mem);
        assert_eq!(mem.get(0xff80), 0x77);
        cpu.reg.a = 0x00;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x77);
    }

    #[test]
    fn daa_after_addition() {
        let (mut cpu, mut mem) = machine(&[0x3e, 0x15, 0xc6, 0x27, 0x27]);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x42);
        assert!(!cpu.reg.get_flag(C));
    }

    #[test]
    fn daa_carries_past_99() {
        let (mut cpu, mut mem) = machine(&[0x3e, 0x99, 0xc6, 0x01, 0x27]);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x00);
        assert!(cpu.reg.get_flag(Z));
        assert!(cpu.reg.get_flag(C));
    }

    #[test]
    fn daa_after_subtraction() {
        let (mut cpu, mut mem) = machine(&[0x3e, 0x42, 0xd6, 0x15, 0x27]);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x27);
    }

    #[test]
    fn cpl_scf_ccf() {
        let (mut cpu, mut mem) = machine(&[0x2f, 0x37, 0x3f]);
        cpu.reg.a = 0xf0;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x0f);
        assert!(cpu.reg.get_flag(N) && cpu.reg.get_flag(H));
        cpu.next(&mut mem);
        assert!(cpu.reg.get_flag(C));
        assert!(!cpu.reg.get_flag(N) && !cpu.reg.get_flag(H));
        cpu.next(&mut mem);
        assert!(!cpu.reg.get_flag(C));
    }

    #[test]
    fn rlca_forces_z_off() {
        let (mut cpu, mut mem) = machine(&[0x07, 0x07]);
        cpu.reg.a = 0x80;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x01);
        assert!(cpu.reg.get_flag(C));
        assert!(!cpu.reg.get_flag(Z));
        // Rotating 0x01 left of 0x80... A=0x01 -> 0x02, no carry, and even a
        // zero result would leave Z clear on the accumulator forms.
        cpu.reg.a = 0x00;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x00);
        assert!(!cpu.reg.get_flag(Z));
    }

    #[test]
    fn rra_shifts_through_carry() {
        let (mut cpu, mut mem) = machine(&[0x37, 0x1f]);
        cpu.reg.a = 0x02;
        cpu.next(&mut mem);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x81);
        assert!(!cpu.reg.get_flag(C));
    }

    #[test]
    fn cb_bit_seven_of_a() {
        let (mut cpu, mut mem) = machine(&[0xcb, 0x7f]);
        cpu.reg.a = 0x80;
        let cycles = cpu.next(&mut mem);
        assert_eq!(cycles, 8);
        assert!(!cpu.reg.get_flag(Z));
        assert!(!cpu.reg.get_flag(N));
        assert!(cpu.reg.get_flag(H));
        // C predates the BIT and survives it.
        assert!(cpu.reg.get_flag(C));
    }

    #[test]
    fn cb_bit_on_cleared_bit_sets_z() {
        let (mut cpu, mut mem) = machine(&[0xcb, 0x40]);
        cpu.reg.b = 0xfe;
        cpu.next(&mut mem);
        assert!(cpu.reg.get_flag(Z));
    }

    #[test]
    fn cb_set_and_res() {
        let (mut cpu, mut mem) = machine(&[0xcb, 0xc0, 0xcb, 0x80]);
        cpu.reg.b = 0x00;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.b, 0x01);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.b, 0x00);
    }

    #[test]
    fn cb_rotates_set_z_on_zero_result() {
        let (mut cpu, mut mem) = machine(&[0xcb, 0x20]);
        cpu.reg.b = 0x80;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.b, 0x00);
        assert!(cpu.reg.get_flag(Z));
        assert!(cpu.reg.get_flag(C));
    }

    #[test]
    fn cb_swap_nibbles() {
        let (mut cpu, mut mem) = machine(&[0xcb, 0x37]);
        cpu.reg.a = 0xf1;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x1f);
        assert_eq!(f(&cpu), 0x00);
    }

    #[test]
    fn cb_on_hl_memory() {
        let (mut cpu, mut mem) = machine(&[0xcb, 0xc6, 0xcb, 0x46, 0xcb, 0x3e]);
        cpu.reg.set_hl(0xc080);
        // SET 0,(HL)
        assert_eq!(cpu.next(&mut mem), 16);
        assert_eq!(mem.get(0xc080), 0x01);
        // BIT 0,(HL) only reads, 12 cycles.
        assert_eq!(cpu.next(&mut mem), 12);
        assert!(!cpu.reg.get_flag(Z));
        // SRL (HL)
        assert_eq!(cpu.next(&mut mem), 16);
        assert_eq!(mem.get(0xc080), 0x00);
        assert!(cpu.reg.get_flag(C));
    }

    #[test]
    fn sra_keeps_the_sign_bit() {
        let (mut cpu, mut mem) = machine(&[0xcb, 0x2f]);
        cpu.reg.a = 0x81;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0xc0);
        assert!(cpu.reg.get_flag(C));
    }

    #[test]
    fn halt_freezes_pc_and_idles() {
        let (mut cpu, mut mem) = machine(&[0x76, 0x00]);
        cpu.next(&mut mem);
        assert!(cpu.halted);
        assert_eq!(cpu.reg.pc, 0x0101);
        assert_eq!(cpu.next(&mut mem), 4);
        assert_eq!(cpu.reg.pc, 0x0101);
    }

    #[test]
    fn stop_consumes_the_pad_byte() {
        let (mut cpu, mut mem) = machine(&[0x10, 0x00, 0x00]);
        cpu.next(&mut mem);
        assert!(cpu.halted);
        assert_eq!(cpu.reg.pc, 0x0102);
    }

    #[test]
    fn illegal_opcode_locks_the_cpu() {
        let (mut cpu, mut mem) = machine(&[0xd3]);
        let cycles = cpu.next(&mut mem);
        assert!(cycles > 0);
        assert!(cpu.halted);
        assert!(cpu.locked);
    }

    #[test]
    fn ei_takes_effect_one_instruction_late() {
        let (mut cpu, mut mem) = machine(&[0xf3, 0x00, 0xfb, 0x00, 0x00]);
        cpu.next(&mut mem); // DI armed
        assert!(cpu.ime);
        cpu.next(&mut mem); // NOP, DI commits first
        assert!(!cpu.ime);
        cpu.next(&mut mem); // EI armed
        assert!(!cpu.ime);
        cpu.next(&mut mem); // NOP, EI commits first
        assert!(cpu.ime);
    }

    #[test]
    fn reti_restores_ime_immediately() {
        let (mut cpu, mut mem) = machine(&[0xd9]);
        cpu.ime = false;
        cpu.stack_add(&mut mem, 0x0150);
        cpu.next(&mut mem);
        assert!(cpu.ime);
        assert_eq!(cpu.reg.pc, 0x0150);
    }

    #[test]
    fn sequential_instructions_advance_pc_by_length() {
        let (mut cpu, mut mem) = machine(&[0x00, 0x3e, 0x01, 0x01, 0x34, 0x12, 0xcb, 0x47]);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.pc, 0x0101);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.pc, 0x0103);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.pc, 0x0106);
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.pc, 0x0108);
    }

    #[test]
    fn f_low_nibble_stays_zero_across_a_program() {
        let prog = [0x3e, 0x0f, 0xc6, 0x01, 0x27, 0x2f, 0x37, 0x3f, 0x07, 0x17, 0xcb, 0x37, 0x05];
        let (mut cpu, mut mem) = machine(&prog);
        for _ in 0..9 {
            cpu.next(&mut mem);
            assert_eq!(f(&cpu) & 0x0f, 0x00);
        }
    }
}

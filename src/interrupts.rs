// Interrupt servicing, run once per scheduler tick after the timer has been
// advanced. Five sources share the IF/IE registers, bit 0 (V-Blank) having
// the highest priority:
//
// | Bit | Source    | Vector |
// |-----|-----------|--------|
// |  0  | V-Blank   | 0x0040 |
// |  1  | LCD STAT  | 0x0048 |
// |  2  | Timer     | 0x0050 |
// |  3  | Serial    | 0x0058 |
// |  4  | Joypad    | 0x0060 |
//
// A pending and enabled request always wakes a halted CPU, even with IME off;
// the jump to the vector only happens when IME is on.
use super::cpu::Cpu;
use super::memory::Memory;

// Cost of a dispatch: two idle machine cycles, the PC push and the vector
// fetch, 20 T-cycles in total.
const DISPATCH_CYCLES: u32 = 20;

pub fn handle(cpu: &mut Cpu, mem: &mut dyn Memory) -> u32 {
    let intf = mem.get(0xff0f);
    let inte = mem.get(0xffff);
    let pending = intf & inte & 0x1f;
    if cpu.halted && pending != 0x00 {
        cpu.halted = false;
    }
    if !cpu.ime || pending == 0x00 {
        return 0;
    }
    // Lowest set bit wins.
    let n = pending.trailing_zeros() as u16;
    cpu.ime = false;
    mem.set(0xff0f, intf & !(1 << n));
    let pc = cpu.reg.pc;
    cpu.stack_add(mem, pc);
    cpu.reg.pc = 0x0040 | (n << 3);
    DISPATCH_CYCLES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use crate::mmunit::Mmunit;

    fn machine() -> (Cpu, Mmunit) {
        let mut rom = vec![0x00; 0x8000];
        rom[0x0147] = 0x00;
        let cart = Cartridge::from_bytes(rom).unwrap();
        (Cpu::power_up(), Mmunit::power_up(cart))
    }

    #[test]
    fn nothing_pending_is_a_no_op() {
        let (mut cpu, mut mem) = machine();
        assert_eq!(handle(&mut cpu, &mut mem), 0);
        assert_eq!(cpu.reg.pc, 0x0100);
        assert!(cpu.ime);
    }

    #[test]
    fn dispatch_jumps_to_the_vector() {
        let (mut cpu, mut mem) = machine();
        mem.set(0xffff, 0x04);
        mem.set(0xff0f, 0x04);
        assert_eq!(handle(&mut cpu, &mut mem), 20);
        assert_eq!(cpu.reg.pc, 0x0050);
        assert_eq!(cpu.reg.sp, 0xfffc);
        assert_eq!(mem.get_word(0xfffc), 0x0100);
        assert!(!cpu.ime);
        assert_eq!(mem.get(0xff0f) & 0x04, 0x00);
    }

    #[test]
    fn vblank_outranks_everything() {
        let (mut cpu, mut mem) = machine();
        mem.set(0xffff, 0x1f);
        mem.set(0xff0f, 0x11);
        handle(&mut cpu, &mut mem);
        assert_eq!(cpu.reg.pc, 0x0040);
        // Only the serviced bit is cleared.
        assert_eq!(mem.get(0xff0f), 0x10);
    }

    #[test]
    fn masked_requests_do_not_dispatch() {
        let (mut cpu, mut mem) = machine();
        mem.set(0xffff, 0x01);
        mem.set(0xff0f, 0x1e);
        assert_eq!(handle(&mut cpu, &mut mem), 0);
        assert_eq!(cpu.reg.pc, 0x0100);
    }

    #[test]
    fn pending_request_wakes_halt_without_ime() {
        let (mut cpu, mut mem) = machine();
        cpu.halted = true;
        cpu.ime = false;
        mem.set(0xffff, 0x08);
        mem.set(0xff0f, 0x08);
        assert_eq!(handle(&mut cpu, &mut mem), 0);
        assert!(!cpu.halted);
        // The request stays pending for when IME comes back.
        assert_eq!(mem.get(0xff0f), 0x08);
        assert_eq!(cpu.reg.pc, 0x0100);
    }

    #[test]
    fn halted_cpu_with_ime_wakes_and_dispatches() {
        let (mut cpu, mut mem) = machine();
        cpu.halted = true;
        mem.set(0xffff, 0x10);
        mem.set(0xff0f, 0x10);
        assert_eq!(handle(&mut cpu, &mut mem), 20);
        assert!(!cpu.halted);
        assert_eq!(cpu.reg.pc, 0x0060);
    }
}

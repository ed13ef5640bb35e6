// The timer in the GameBoy has a selectable frequency of 4096, 16384, 65536
// or 262144 Hertz. That frequency increments the Timer Counter (TIMA); when
// it overflows an interrupt is requested and TIMA is reloaded from the Timer
// Modulo (TMA).
//
// All four registers hang off one 16-bit counter that is bumped once per
// T-cycle. DIV (FF04) is simply its high byte. TIMA increments whenever the
// counter bit selected by TAC goes from 1 to 0, which is what makes a write
// to DIV able to tick TIMA: zeroing the counter while the watched bit is
// high is a falling edge like any other.
//
// See: http://gbdev.gg8.se/wiki/articles/Timer_and_Divider_Registers
use super::intf::{Flag, Intf};
use std::cell::RefCell;
use std::rc::Rc;

pub struct Timer {
    intf: Rc<RefCell<Intf>>,
    // Free-running counter, incremented every T-cycle. Bits 8..=15 are DIV.
    internal: u16,
    tima: u8,
    tma: u8,
    // Bit  2   - Timer Enable
    // Bits 1-0 - Input Clock Select
    //            00: 4096 Hz    01: 262144 Hz    10: 65536 Hz    11: 16384 Hz
    tac: u8,
}

impl Timer {
    pub fn power_up(intf: Rc<RefCell<Intf>>) -> Self {
        Self { intf, internal: 0x0000, tima: 0x00, tma: 0x00, tac: 0x00 }
    }

    pub fn get(&self, a: u16) -> u8 {
        match a {
            0xff04 => (self.internal >> 8) as u8,
            0xff05 => self.tima,
            0xff06 => self.tma,
            0xff07 => self.tac,
            _ => panic!("Unsupported address"),
        }
    }

    pub fn set(&mut self, a: u16, v: u8) {
        match a {
            0xff04 => {
                // Writing any value clears the whole internal counter, not
                // just the visible DIV byte. If the watched bit was high the
                // reset itself is a falling edge and TIMA ticks.
                let edge = self.watched_bit();
                self.internal = 0x0000;
                if self.enabled() && edge {
                    self.tick_tima();
                }
            }
            0xff05 => self.tima = v,
            0xff06 => self.tma = v,
            0xff07 => self.tac = v,
            _ => panic!("Unsupported address"),
        }
    }

    pub fn next(&mut self, cycles: u32) {
        for _ in 0..cycles {
            let prev = self.internal;
            self.internal = self.internal.wrapping_add(1);
            if !self.enabled() {
                continue;
            }
            let mask = 1 << self.watched_bit_index();
            if prev & mask != 0 && self.internal & mask == 0 {
                self.tick_tima();
            }
        }
    }

    fn enabled(&self) -> bool {
        self.tac & 0x04 != 0x00
    }

    fn watched_bit_index(&self) -> u32 {
        match self.tac & 0x03 {
            0x00 => 9,
            0x01 => 3,
            0x02 => 5,
            _ => 7,
        }
    }

    fn watched_bit(&self) -> bool {
        self.internal & (1 << self.watched_bit_index()) != 0x0000
    }

    fn tick_tima(&mut self) {
        self.tima = self.tima.wrapping_add(1);
        if self.tima == 0x00 {
            self.tima = self.tma;
            self.intf.borrow_mut().hi(Flag::Timer);
        }
    }
}

use dmg::memory::Memory;
use dmg::motherboard::MotherBoard;

fn main() {
    rog::reg("dmg");
    rog::reg("dmg::cartridge");

    let mut rom = String::from("");
    {
        let mut ap = argparse::ArgumentParser::new();
        ap.set_description("Game Boy (DMG) emulator");
        ap.refer(&mut rom).add_argument("rom", argparse::Store, "Rom name");
        ap.parse_args_or_exit();
    }

    let mut mbrd = match MotherBoard::power_up(&rom) {
        Ok(mbrd) => mbrd,
        Err(e) => {
            rog::println!("Failed to load {}: {}", rom, e);
            std::process::exit(1);
        }
    };

    loop {
        mbrd.next();
        if mbrd.cpu.locked {
            rog::println!("Cpu is locked up at 0x{:04x}, giving up", mbrd.cpu.reg.pc);
            std::process::exit(1);
        }
        // A halted cpu with every interrupt source masked can never wake;
        // that is as clean as a shutdown gets on this machine.
        if mbrd.cpu.halted && mbrd.mmu.get(0xffff) & 0x1f == 0x00 {
            break;
        }
    }
}

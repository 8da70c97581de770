use color_eyre::eyre::Result;

use log::LevelFilter;
use simple_logger::SimpleLogger;
use vm8::cpu::Cpu;
use vm8::memory::Ram;
use vm8::write_instructions;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap(); // logging

    let mut mem = Ram::default();
    let mut cpu = Cpu::new();

    use vm8::cpu::Instruction::*;
    write_instructions!(mem : 0 =>
        LDI, 0, 10, // counter
        LDI, 1, 1,  // step
        LDI, 2, 0,  // floor
        LDI, 3, 15, // loop head
        LDI, 4, 27, // end
        PRN, 0,     // 15
        SUB, 0, 1,
        CMP, 0, 2,
        JEQ, 4,
        JMP, 3,
        HLT         // 27
    );

    cpu.run(&mut mem)?;

    Ok(())
}

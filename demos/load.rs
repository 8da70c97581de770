use color_eyre::eyre::Result;

use log::LevelFilter;
use simple_logger::SimpleLogger;
use vm8::cpu::Cpu;
use vm8::memory::Ram;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap(); // logging

    let mut mem = Ram::from_file("demos/programs/mult.ls8").unwrap();
    let mut cpu = Cpu::new();

    cpu.run(&mut mem)?;

    Ok(())
}

use std::env;

use color_eyre::eyre::{eyre, Result};
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

    let path = env::args()
        .nth(1)
        .ok_or_else(|| eyre!("usage: vm8 <program image>"))?;

    // Load errors have already been reported individually by the loader.
    let mut memory = Ram::from_file(&path)
        .map_err(|errors| eyre!("failed to load `{}` ({} error(s))", path, errors.len()))?;

    let mut cpu = Cpu::new();
    cpu.run(&mut memory)
}

#![no_main]

use libfuzzer_sys::fuzz_target;
use vuitanta::assembler::Assembler;
use vuitanta::config::Config;

fuzz_target!(|data: &[u8]| {
    let assembly = Assembler::new(Config::default()).assemble(data, None);
    if let Ok(assembly) = assembly {
        let _ = assembly.write_listing(std::io::sink());
    }
});

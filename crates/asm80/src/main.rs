use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use vuitanta::assembler::Assembler;
use vuitanta::config::{get_configuration, Config};
use vuitanta::errors::Severity;
use vuitanta::isa::{hex_literal, instruction_set, Cpu};
use vuitanta::objfile::read_object_file;

/// Two-pass assembler for the Intel 8080 and 8085 microprocessors.
#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Assemble the instructions given on this file. The standard input is used
    /// when this argument is not given. With `--disassemble` this is the object
    /// file to be disassembled instead.
    file: Option<String>,

    /// Configuration to be used. It can be the identifier of one of the
    /// configurations baked into this application ('intel8080' or
    /// 'intel8085'), or the path to a TOML file. Defaults to 'intel8080'.
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Place the object code into the given <OUT> file. Defaults to `out.obj`.
    #[arg(short = 'o', long)]
    out: Option<String>,

    /// Write the listing into the given <LST> file, or into the standard output
    /// if it's '-'.
    #[arg(short = 'l', long)]
    listing: Option<String>,

    /// CPU to be assumed until the source selects one. It overrides the one
    /// from the configuration.
    #[arg(long)]
    cpu: Option<String>,

    /// Treat warnings as errors.
    #[arg(short = 'W', value_name = "Error")]
    w: Option<String>,

    /// Disassemble the given object file instead of assembling a source file.
    #[arg(short = 'd', long, default_value_t = false)]
    disassemble: bool,

    /// Show debug messages.
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_target(false).format_timestamp(None).init();
}

// Prints the instructions contained on the given object file.
fn disassemble(file: &str, cpu: Cpu) -> Result<()> {
    let object = read_object_file(Path::new(file))
        .with_context(|| format!("Could not read object file '{}'", file))?;
    let isa = instruction_set(cpu);
    let mut stdout = io::stdout().lock();

    writeln!(stdout, "; module {}", object.module_name())?;
    for segment in object.segments() {
        writeln!(
            stdout,
            "; segment {} at {:04X}",
            segment.name(),
            segment.offset()
        )?;

        let bytes = segment.bytes();
        let mut idx = 0;
        while idx < bytes.len() {
            let (size, text) = match isa.decode(&bytes[idx..]) {
                Some(decoded) => (decoded.size, decoded.text),
                None => (1, format!("DB {}", hex_literal(bytes[idx] as u16, 2))),
            };
            let hex: Vec<String> = bytes[idx..idx + size]
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect();
            let address = segment.offset().wrapping_add(idx as u16);

            writeln!(stdout, "{:04X}  {:<10}{}", address, hex.join(" "), text)?;
            idx += size;
        }
    }

    Ok(())
}

// Exit status for the given amount of errors, saturated at 255.
fn exit_code(error_count: usize) -> i32 {
    error_count.min(255) as i32
}

// Returns the module name to be used for the given input file.
fn module_from(config: &Config, file: Option<&String>) -> Option<String> {
    if config.module.is_some() {
        return config.module.clone();
    }
    file.and_then(|f| Path::new(f).file_stem())
        .map(|stem| stem.to_string_lossy().to_uppercase())
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    // Select the configuration.
    let id = args.config.unwrap_or("intel8080".to_string());
    let mut config = match get_configuration(&id) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(cpu) = &args.cpu {
        config.cpu = cpu.parse().map_err(anyhow::Error::msg)?;
    }

    // Check if warnings have to be treated as errors.
    if let Some(value) = args.w {
        if value.to_lowercase() != "error" {
            bail!("The '-W' flag can only be used as '-Werror'");
        }
        config.warnings_as_errors = true;
    }

    if args.disassemble {
        let Some(file) = &args.file else {
            bail!("An object file is required for disassembling");
        };
        return disassemble(file, config.cpu);
    }

    // Select the input stream.
    let input: Box<dyn Read> = match &args.file {
        Some(file) => {
            if !Path::new(file).is_file() {
                bail!("Input file must be a valid file");
            }
            Box::new(File::open(file)?)
        }
        None => Box::new(io::stdin()),
    };

    // And assemble.
    let module = module_from(&config, args.file.as_ref());
    let assembler = Assembler::new(config);
    let assembly = match assembler.assemble(input, module.as_deref()) {
        Ok(assembly) => assembly,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    for message in assembly.diagnostics.messages() {
        match message.severity {
            Severity::Warning => eprintln!("warning: {}", message),
            Severity::Error | Severity::Exception => eprintln!("error: {}", message),
        }
    }

    match args.listing.as_deref() {
        Some("-") => {
            assembly.write_listing(io::stdout().lock())?;
        }
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Could not create listing file '{}'", path))?;
            assembly.write_listing(io::BufWriter::new(file))?.flush()?;
        }
        None => {}
    }

    let error_count = assembly.num_errors();
    if error_count == 0 {
        let out = args.out.unwrap_or(String::from("out.obj"));
        assembly
            .write_object(Path::new(&out))
            .with_context(|| format!("Could not write object file '{}'", out))?;
    }

    std::process::exit(exit_code(error_count));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_saturates() {
        assert_eq!(exit_code(0), 0);
        assert_eq!(exit_code(3), 3);
        assert_eq!(exit_code(255), 255);
        assert_eq!(exit_code(256), 255);
        assert_eq!(exit_code(100_000), 255);
    }

    #[test]
    fn module_names() {
        let config = Config::default();
        assert_eq!(
            module_from(&config, Some(&String::from("src/boot.asm"))).as_deref(),
            Some("BOOT")
        );
        assert_eq!(module_from(&config, None), None);

        let config = Config {
            module: Some(String::from("MONITOR")),
            ..Default::default()
        };
        assert_eq!(
            module_from(&config, Some(&String::from("boot.asm"))).as_deref(),
            Some("MONITOR")
        );
    }
}

use crate::config::Config;
use crate::errors::{AssemblerException, ErrorHandler, ObjectFileError};
use crate::listing::write_listing;
use crate::object::ObjectCode;
use crate::objfile::write_object_file;
use crate::parser::{Parser, Program, DEFAULT_MODULE};
use std::io::{self, Read, Write};
use std::path::Path;

/// The outcome of assembling a source unit: what the parser produced plus all
/// the messages that were reported along the way.
pub struct Assembly {
    pub source: String,
    pub program: Program,
    pub diagnostics: ErrorHandler,
    config: Config,
}

impl Assembly {
    pub fn object_code(&self) -> &ObjectCode {
        &self.program.object
    }

    pub fn num_errors(&self) -> usize {
        self.diagnostics.num_errors() + self.diagnostics.num_exceptions()
    }

    /// Returns true if the object code can be used.
    pub fn succeeded(&self) -> bool {
        self.num_errors() == 0
    }

    /// Writes the listing of this assembly into `out` with the configured
    /// columns.
    pub fn write_listing<W: Write>(&self, out: W) -> io::Result<W> {
        write_listing(
            out,
            &self.source,
            &self.program,
            &self.diagnostics,
            self.config.listing,
        )
    }

    /// Writes the object code into the file at `path`.
    pub fn write_object(&self, path: &Path) -> Result<(), ObjectFileError> {
        write_object_file(path, &self.program.object)
    }
}

/// Runs the whole pipeline for a given configuration.
pub struct Assembler {
    config: Config,
}

impl Assembler {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reads the whole source from `reader` and assembles it. The module name
    /// is `module`, or the configured one, or DEFAULT_MODULE. Only failing to
    /// read the source is an error here: problems in the source itself are
    /// reported in the returned assembly.
    pub fn assemble(
        &self,
        mut reader: impl Read,
        module: Option<&str>,
    ) -> Result<Assembly, AssemblerException> {
        let mut source = String::new();
        if let Err(e) = reader.read_to_string(&mut source) {
            return Err(AssemblerException::new(format!(
                "could not read source: {}",
                e
            )));
        }
        Ok(self.assemble_source(source, module))
    }

    /// Same as `assemble` but for a source which is already in memory.
    pub fn assemble_source(&self, source: String, module: Option<&str>) -> Assembly {
        let module = module
            .or(self.config.module.as_deref())
            .unwrap_or(DEFAULT_MODULE);
        log::debug!("assembling module {}", module);

        let mut diagnostics = ErrorHandler::new();
        let mut parser = Parser::new(&source, &mut diagnostics)
            .with_cpu(self.config.cpu)
            .with_module(module);
        parser.parse();
        let program = parser.finish();

        if self.config.warnings_as_errors {
            diagnostics.promote_warnings();
        }

        Assembly {
            source,
            program,
            diagnostics,
            config: self.config.clone(),
        }
    }
}

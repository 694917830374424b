use crate::errors::ConfigError;
use crate::isa::Cpu;
use crate::listing::ListingColumns;
use std::path::Path;
use toml::{Table, Value};

type Result<T> = std::result::Result<T, ConfigError>;

/// Settings for an assembler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// CPU in use until the source selects one with the CPU directive.
    pub cpu: Cpu,

    /// Name of the module written into the object file. When it's not given,
    /// front ends pick one from the input file.
    pub module: Option<String>,

    pub warnings_as_errors: bool,
    pub listing: ListingColumns,
}

fn error(message: String) -> ConfigError {
    ConfigError { message }
}

// Returns the configuration for the given built-in identifier, if any.
fn builtin(id: &str) -> Option<Config> {
    match id {
        "intel8080" => Some(Config::default()),
        "intel8085" => Some(Config {
            cpu: Cpu::Intel8085,
            ..Default::default()
        }),
        _ => None,
    }
}

fn section<'a>(table: &'a Table, name: &str) -> Result<Option<&'a Table>> {
    match table.get(name) {
        Some(Value::Table(t)) => Ok(Some(t)),
        Some(_) => Err(error(format!("'{}' must be a section", name))),
        None => Ok(None),
    }
}

fn string_value<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| error(format!("'{}' must be a string", key)))
}

fn column_value(value: &Value, key: &str) -> Result<usize> {
    match value.as_integer() {
        Some(n) => usize::try_from(n)
            .map_err(|_| error(format!("'{}' must be a positive number", key))),
        None => Err(error(format!("'{}' must be a number", key))),
    }
}

fn parse_assembler(table: &Table, config: &mut Config) -> Result<()> {
    for (key, value) in table {
        match key.as_str() {
            "cpu" => {
                config.cpu = string_value(value, "assembler.cpu")?
                    .parse()
                    .map_err(error)?;
            }
            "module" => {
                let module = string_value(value, "assembler.module")?;
                if module.is_empty() {
                    return Err(error(String::from("'assembler.module' cannot be empty")));
                }
                config.module = Some(module.to_string());
            }
            "warnings_as_errors" => {
                config.warnings_as_errors = value.as_bool().ok_or_else(|| {
                    error(String::from("'assembler.warnings_as_errors' must be a boolean"))
                })?;
            }
            other => return Err(error(format!("unknown key 'assembler.{}'", other))),
        }
    }
    Ok(())
}

fn parse_listing(table: &Table, columns: &mut ListingColumns) -> Result<()> {
    for (key, value) in table {
        let name = format!("listing.{}", key);
        let field = match key.as_str() {
            "address" => &mut columns.address,
            "label" => &mut columns.label,
            "mnemonic" => &mut columns.mnemonic,
            "comment" => &mut columns.comment,
            _ => return Err(error(format!("unknown key '{}'", name))),
        };
        *field = column_value(value, &name)?;
    }
    Ok(())
}

/// Parses the contents of a TOML configuration. Missing keys keep their
/// default values.
pub fn parse_configuration(text: &str) -> Result<Config> {
    let table: Table = text
        .parse()
        .map_err(|e: toml::de::Error| error(format!("bad configuration: {}", e.message())))?;
    let mut config = Config::default();

    for key in table.keys() {
        if key != "assembler" && key != "listing" {
            return Err(error(format!("unknown section '{}'", key)));
        }
    }
    if let Some(assembler) = section(&table, "assembler")? {
        parse_assembler(assembler, &mut config)?;
    }
    if let Some(listing) = section(&table, "listing")? {
        parse_listing(listing, &mut config.listing)?;
    }

    Ok(config)
}

/// Returns the configuration identified by `id`, which is either the name of
/// a built-in configuration ("intel8080" or "intel8085") or the path to a TOML
/// file.
pub fn get_configuration(id: &str) -> Result<Config> {
    if let Some(config) = builtin(id) {
        return Ok(config);
    }

    let path = Path::new(id);
    if !path.is_file() {
        return Err(error(format!(
            "'{}' is neither a built-in configuration nor a file",
            id
        )));
    }
    log::debug!("reading configuration from {}", path.display());

    let text = std::fs::read_to_string(path)
        .map_err(|e| error(format!("could not read '{}': {}", id, e)))?;
    parse_configuration(&text)
}

//! Export filtering over the textual wasm IR.
//!
//! The IR is processed as a sequence of line records. A line is either an
//! export declaration (`(export "name" ...)` as the first token) or anything
//! else. Two fixed tables act on export declarations only:
//!
//! - [`DROPPED_EXPORT_PREFIXES`]: runtime scaffolding that is removed.
//! - [`EXPORT_RENAMES`]: the four user-facing exports, shortened to one letter.
//!
//! Every other line passes through untouched and in order.

/// Exports whose names start with one of these are removed.
pub const DROPPED_EXPORT_PREFIXES: &[&str] = &["stack", "_initialize", "__indirect_function_table"];

/// Exports with exactly these names are renamed.
pub const EXPORT_RENAMES: &[(&str, &str)] = &[
    ("memory", "m"),
    ("title", "d"),
    ("setup", "s"),
    ("process", "p"),
];

const EXPORT_OPEN: &str = "(export \"";

/// One line of IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrLine<'a> {
    /// An export declaration.
    Export {
        /// Whitespace before `(export`.
        indent: &'a str,
        /// Declared export name.
        name: &'a str,
        /// Everything after the closing quote of the name.
        rest: &'a str,
    },
    /// Any other line, verbatim.
    Other(&'a str),
}

impl<'a> IrLine<'a> {
    /// Classify a single line.
    pub fn parse(line: &'a str) -> Self {
        let body = line.trim_start();
        let indent = &line[..line.len() - body.len()];

        let Some(after_open) = body.strip_prefix(EXPORT_OPEN) else {
            return IrLine::Other(line);
        };
        let Some(close) = after_open.find('"') else {
            return IrLine::Other(line);
        };

        IrLine::Export {
            indent,
            name: &after_open[..close],
            rest: &after_open[close + 1..],
        }
    }

    /// Export name, if this is an export declaration.
    pub fn export_name(&self) -> Option<&'a str> {
        match self {
            IrLine::Export { name, .. } => Some(*name),
            IrLine::Other(_) => None,
        }
    }
}

/// Whether an export with this name is runtime scaffolding.
pub fn is_dropped_export(name: &str) -> bool {
    DROPPED_EXPORT_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Short name for a user-facing export, if it has one.
pub fn renamed_export(name: &str) -> Option<&'static str> {
    EXPORT_RENAMES
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| *to)
}

/// Apply the drop and rename tables to one line.
///
/// Returns `None` when the line is removed.
pub fn rewrite_line(line: &str) -> Option<String> {
    match IrLine::parse(line) {
        IrLine::Export { name, .. } if is_dropped_export(name) => None,
        IrLine::Export { indent, name, rest } => match renamed_export(name) {
            Some(short) => Some(format!("{indent}{EXPORT_OPEN}{short}\"{rest}")),
            None => Some(line.to_string()),
        },
        IrLine::Other(line) => Some(line.to_string()),
    }
}

/// Filter and rename exports across a whole IR text.
///
/// Idempotent: filtering already filtered IR changes nothing.
pub fn filter_exports(ir: &str) -> String {
    ir.split('\n')
        .filter_map(rewrite_line)
        .collect::<Vec<_>>()
        .join("\n")
}

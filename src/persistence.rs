//! Text persistence for network state.
//!
//! State is written as nested blocks:
//!
//! ```text
//!  BEGIN 'Connections'
//! num_columns: 16
//! boost_factors: 1,1,1.5,1
//! segment: 0|12|3|7|4,9,11
//!  END 'Connections'
//! ```
//!
//! Every field sits on its own line as `name: value`. Inside a value, record
//! fields are separated by `|` and sequence elements by `,`. Floats use the
//! shortest representation that parses back to the identical value, so a
//! restored network behaves exactly like the saved one.
//!
//! The module only talks to [`std::io::Write`] and [`std::io::BufRead`]
//! handles; where the text ends up is up to the caller.

use crate::error::{CorticalError, Result};
use crate::utils::Random;
use std::fmt::Display;
use std::io::{BufRead, Write};
use std::str::FromStr;

/// Separator between the fields of a record.
pub const PARAMETER_DELIMITER: char = '|';

/// Separator between sequence elements.
pub const ELEMENTS_DELIMITER: char = ',';

/// Separator between a field name and its value.
pub const KEY_VALUE_DELIMITER: &str = ": ";

/// Writes tagged blocks and fields to a text stream.
pub struct HtmWriter<W: Write> {
    out: W,
}

impl<W: Write> HtmWriter<W> {
    /// Wraps an output stream.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Opens a block.
    pub fn begin(&mut self, type_name: &str) -> Result<()> {
        writeln!(self.out, " BEGIN '{type_name}' ")?;
        Ok(())
    }

    /// Closes a block.
    pub fn end(&mut self, type_name: &str) -> Result<()> {
        writeln!(self.out, " END '{type_name}' ")?;
        Ok(())
    }

    /// Writes a scalar field.
    pub fn field<T: Display>(&mut self, name: &str, value: T) -> Result<()> {
        writeln!(self.out, "{name}{KEY_VALUE_DELIMITER}{value}")?;
        Ok(())
    }

    /// Writes a sequence field.
    pub fn list<T: Display>(&mut self, name: &str, values: &[T]) -> Result<()> {
        write!(self.out, "{name}{KEY_VALUE_DELIMITER}")?;
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                write!(self.out, "{ELEMENTS_DELIMITER}")?;
            }
            write!(self.out, "{value}")?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    /// Writes a record whose parts are already formatted.
    pub fn record(&mut self, name: &str, parts: &[String]) -> Result<()> {
        let mut line = String::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                line.push(PARAMETER_DELIMITER);
            }
            line.push_str(part);
        }
        self.field(name, line)
    }
}

/// Reads tagged blocks and fields written by [`HtmWriter`].
pub struct HtmReader<R: BufRead> {
    input: R,
    line_no: usize,
    peeked: Option<String>,
}

impl<R: BufRead> HtmReader<R> {
    /// Wraps an input stream.
    pub fn new(input: R) -> Self {
        Self {
            input,
            line_no: 0,
            peeked: None,
        }
    }

    /// One-based number of the last line read.
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    /// Builds a parse error at the current line.
    pub fn error(&self, message: impl Into<String>) -> CorticalError {
        CorticalError::Parse {
            line: self.line_no,
            message: message.into(),
        }
    }

    fn read_raw(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.peeked.take() {
            return Ok(Some(line));
        }
        loop {
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = line.trim_end_matches(['\r', '\n']);
            if !line.trim().is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
    }

    /// Next non-empty line.
    pub fn next_line(&mut self) -> Result<String> {
        self.read_raw()?
            .ok_or_else(|| self.error("unexpected end of stream"))
    }

    /// Returns whether the next line opens a block of the given type.
    pub fn peek_begin(&mut self, type_name: &str) -> Result<bool> {
        if self.peeked.is_none() {
            self.peeked = self.read_raw()?;
        }
        Ok(self
            .peeked
            .as_deref()
            .is_some_and(|line| line.trim() == format!("BEGIN '{type_name}'")))
    }

    fn expect_tag(&mut self, tag: &str, type_name: &str) -> Result<()> {
        let line = self.next_line()?;
        let expected = format!("{tag} '{type_name}'");
        if line.trim() == expected {
            Ok(())
        } else {
            Err(self.error(format!("expected `{expected}`, found `{}`", line.trim())))
        }
    }

    /// Consumes the opening line of a block.
    pub fn expect_begin(&mut self, type_name: &str) -> Result<()> {
        self.expect_tag("BEGIN", type_name)
    }

    /// Consumes the closing line of a block.
    pub fn expect_end(&mut self, type_name: &str) -> Result<()> {
        self.expect_tag("END", type_name)
    }

    /// Raw value of the next field, which must be called `name`.
    pub fn field(&mut self, name: &str) -> Result<String> {
        let line = self.next_line()?;
        match line.split_once(KEY_VALUE_DELIMITER.trim_end()) {
            Some((key, value)) if key == name => Ok(value.strip_prefix(' ').unwrap_or(value).to_string()),
            _ => Err(self.error(format!("expected field `{name}`, found `{line}`"))),
        }
    }

    /// Parses the next field as a scalar.
    pub fn parse<T: FromStr>(&mut self, name: &str) -> Result<T> {
        let value = self.field(name)?;
        self.parse_value(&value)
    }

    /// Parses the next field as a sequence.
    pub fn parse_list<T: FromStr>(&mut self, name: &str) -> Result<Vec<T>> {
        let value = self.field(name)?;
        self.parse_elements(&value)
    }

    /// Splits the next field into its record parts.
    pub fn parse_record(&mut self, name: &str) -> Result<Vec<String>> {
        let value = self.field(name)?;
        Ok(value.split(PARAMETER_DELIMITER).map(str::to_string).collect())
    }

    /// Parses a single value.
    pub fn parse_value<T: FromStr>(&self, value: &str) -> Result<T> {
        value
            .trim()
            .parse()
            .map_err(|_| self.error(format!("cannot parse `{value}`")))
    }

    /// Parses a `,`-separated sequence; an empty string is an empty sequence.
    pub fn parse_elements<T: FromStr>(&self, value: &str) -> Result<Vec<T>> {
        if value.trim().is_empty() {
            return Ok(Vec::new());
        }
        value.split(ELEMENTS_DELIMITER).map(|v| self.parse_value(v)).collect()
    }
}

/// Types that can be checkpointed to and restored from the text format.
pub trait Persist: Sized {
    /// Tag used in the `BEGIN`/`END` lines.
    const TYPE_NAME: &'static str;

    /// Writes the full state as one block.
    fn persist<W: Write>(&self, writer: &mut HtmWriter<W>) -> Result<()>;

    /// Reads one block written by [`Persist::persist`].
    fn restore<R: BufRead>(reader: &mut HtmReader<R>) -> Result<Self>;

    /// Persists into a string.
    fn to_text(&self) -> Result<String> {
        let mut writer = HtmWriter::new(Vec::new());
        self.persist(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| CorticalError::InternalError(e.to_string()))
    }

    /// Restores from a string.
    fn from_text(text: &str) -> Result<Self> {
        Self::restore(&mut HtmReader::new(text.as_bytes()))
    }
}

/// Formats an optional value, `-` standing for `None`.
pub(crate) fn fmt_opt<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Parses a value written by [`fmt_opt`].
pub(crate) fn parse_opt<T: FromStr, R: BufRead>(reader: &HtmReader<R>, value: &str) -> Result<Option<T>> {
    if value.trim() == "-" {
        Ok(None)
    } else {
        reader.parse_value(value).map(Some)
    }
}

/// Joins values with the elements delimiter.
pub(crate) fn join<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(&ELEMENTS_DELIMITER.to_string())
}

impl Persist for Random {
    const TYPE_NAME: &'static str = "Random";

    fn persist<W: Write>(&self, writer: &mut HtmWriter<W>) -> Result<()> {
        let (seed, stream, word_pos) = self.state();
        writer.begin(Self::TYPE_NAME)?;
        writer.record("state", &[seed.to_string(), stream.to_string(), word_pos.to_string()])?;
        writer.end(Self::TYPE_NAME)
    }

    fn restore<R: BufRead>(reader: &mut HtmReader<R>) -> Result<Self> {
        reader.expect_begin(Self::TYPE_NAME)?;
        let parts = reader.parse_record("state")?;
        if parts.len() != 3 {
            return Err(reader.error("random state needs seed|stream|position"));
        }
        let random = Random::from_state(
            reader.parse_value(&parts[0])?,
            reader.parse_value(&parts[1])?,
            reader.parse_value(&parts[2])?,
        );
        reader.expect_end(Self::TYPE_NAME)?;
        Ok(random)
    }
}

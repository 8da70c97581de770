//! Program images are plain text; a line carries a byte only if it starts
//! with a binary digit:
//!
//! ```text
//! # mult.ls8: multiply 8 by 9 and print the result
//! 10000010 # LDI R0,8
//! 00000000
//! 00001000
//! ```

use std::borrow::Cow;
use std::error;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::{fmt, str::Lines};

use super::{Byte, Memory, Ram, Word, RAM_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    ImageNotFound,
    InvalidLiteral,
    ImageTooLarge { address: usize },
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadErrorKind::ImageNotFound => f.write_str("program image not found"),
            LoadErrorKind::InvalidLiteral => f.write_str("invalid binary literal"),
            LoadErrorKind::ImageTooLarge { address } => {
                write!(f, "memory has no address `0x{:x}`", address)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    kind: LoadErrorKind,
    context: Option<Cow<'static, str>>,
    line_nr: usize,
}

impl LoadError {
    fn new<C, S>(kind: LoadErrorKind, context: C, line_nr: usize) -> Self
    where
        C: Into<Option<S>>,
        S: Into<Cow<'static, str>>,
    {
        Self {
            kind,
            context: context.into().map(|inner| inner.into()),
            line_nr,
        }
    }

    pub fn kind(&self) -> LoadErrorKind {
        self.kind
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(
                f,
                "error [ln: {}]: {} - {}",
                self.line_nr, self.kind, context
            )
        } else {
            write!(f, "error [ln: {}]: {}", self.line_nr, self.kind)
        }
    }
}

impl error::Error for LoadError {}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;

/// Populates a fresh [`Ram`] from a textual program image
#[derive(Debug, Clone)]
pub struct Loader<'a> {
    lines: Lines<'a>,
    line_nr: usize,
    address: usize,
    memory: Ram,
}

impl<'a> Loader<'a> {
    /// Creates a new loader over `data`
    pub fn new(data: &'a str) -> Self {
        Self {
            lines: data.lines(),
            line_nr: 0,
            address: 0,
            memory: Ram::default(),
        }
    }

    /// Consumes `self` and loads the whole image into memory, starting at
    /// address 0.
    ///
    /// # Errors
    ///
    /// All errors which may occur are collected and returned at the end.
    pub fn load(mut self) -> Result<Ram, Vec<LoadError>> {
        let mut errors = Vec::new();

        while let Some(res) = self.load_next_line() {
            if let Err(err) = res {
                log::error!("{}", err);
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(self.memory)
        } else {
            Err(errors)
        }
    }

    /// Tries to load the next line of the image. A line is significant only
    /// if its first character is a binary digit; everything else is
    /// commentary and skipped.
    fn load_next_line(&mut self) -> Option<Result<()>> {
        let line = self.lines.next()?;
        self.line_nr += 1;

        if !matches!(line.as_bytes().first(), Some(b'0') | Some(b'1')) {
            return Some(Ok(()));
        }

        // Everything from `#` onward on a significant line is a comment.
        let token = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        }
        .trim();

        let byte = match Byte::from_str_radix(token, 2) {
            Ok(byte) => byte,
            Err(_) => {
                return Some(Err(LoadError::new(
                    LoadErrorKind::InvalidLiteral,
                    format!("failed to parse `{}` as a binary byte", token),
                    self.line_nr,
                )))
            }
        };

        Some(self.write_byte(byte))
    }

    /// Stores `byte` at the next sequential address
    fn write_byte(&mut self, byte: Byte) -> Result<()> {
        if self.address >= RAM_SIZE {
            return Err(LoadError::new(
                LoadErrorKind::ImageTooLarge {
                    address: self.address,
                },
                "program image does not fit into memory",
                self.line_nr,
            ));
        }

        self.memory.write_byte(self.address as Word, byte);
        self.address += 1;

        Ok(())
    }
}

impl Memory<RAM_SIZE> {
    /// Loads a program image from the file at `path`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Vec<LoadError>> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|err| {
            vec![LoadError::new(
                LoadErrorKind::ImageNotFound,
                format!("`{}`: {}", path.display(), err),
                0,
            )]
        })?;

        Loader::new(&data).load()
    }
}

impl FromStr for Memory<RAM_SIZE> {
    type Err = Vec<LoadError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Loader::new(s).load()
    }
}

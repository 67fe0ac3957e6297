//! Result and errors.
use std::{
    fmt::{self, Display, Formatter},
    io,
};

use crate::constants::{Address, PROGRAM_MAX_SIZE, STACK_SIZE};

pub type Chip8Result<T> = std::result::Result<T, Chip8Error>;

#[derive(Debug)]
pub enum Chip8Error {
    /// Attempt to load a bytecode program that can't fit in memory.
    ProgramTooLarge { size: usize },
    /// The program bytes could not be read from their source.
    SourceUnavailable(io::Error),
    /// Subroutine call while the call stack is full.
    StackOverflow { pc: Address },
    /// Subroutine return while the call stack is empty.
    StackUnderflow { pc: Address },
    Fmt(fmt::Error),
}

impl Display for Chip8Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProgramTooLarge { size } => write!(
                f,
                "program too large for VM memory: {size} bytes, maximum is {PROGRAM_MAX_SIZE}"
            ),
            Self::SourceUnavailable(err) => write!(f, "failed to read program: {err}"),
            Self::StackOverflow { pc } => write!(
                f,
                "call stack overflow at {pc:04X}: nesting exceeds {STACK_SIZE} levels"
            ),
            Self::StackUnderflow { pc } => {
                write!(f, "call stack underflow at {pc:04X}: return outside subroutine")
            }
            Self::Fmt(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Chip8Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SourceUnavailable(err) => Some(err),
            Self::Fmt(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Chip8Error {
    fn from(err: io::Error) -> Self {
        Chip8Error::SourceUnavailable(err)
    }
}

impl From<fmt::Error> for Chip8Error {
    fn from(err: fmt::Error) -> Self {
        Chip8Error::Fmt(err)
    }
}

use std::fmt::{self, Display, Formatter};
use std::io;

// Everything that can go wrong while bringing the machine up. Once emulation
// is running, every bus access is total and nothing here can occur.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    RomTooSmall(usize),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "{}", e),
            Error::RomTooSmall(n) => {
                write!(f, "Rom is {} bytes, the cartridge header requires at least 0x150", n)
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

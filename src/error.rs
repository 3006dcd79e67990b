//! CLI Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("failed to set up {_0}")]
    Setup(#[error(not(source))] &'static str),
    #[display("{_0} failed")]
    Command(#[error(not(source))] &'static str),
    #[display("failed to write output")]
    Output,
}

use std::fmt;

use failure::Backtrace;
use failure::Context;
use failure::Fail;

/// Error information returned by the consumer coordination engine.
#[derive(Debug)]
pub struct Error(Context<ErrorKind>);

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.0.get_context().clone()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error(inner)
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.0.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.0.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Exhaustive list of possible errors emitted by this crate.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "could not decode work unit or outcome payload")]
    Decode,

    #[fail(display = "could not encode work unit or outcome payload")]
    Encode,

    #[fail(display = "failed to create kafka fetch connection to '{}:{}'", _0, _1)]
    KafkaConnect(String, u16),

    #[fail(display = "kafka fetch request against '{}:{}' failed", _0, _1)]
    KafkaFetch(String, u16),

    #[fail(display = "failed to build redis connection pool")]
    RedisPool,

    #[fail(display = "redis '{}' operation failed", _0)]
    RedisOp(&'static str),

    #[fail(display = "unable to spawn thread for '{}'", _0)]
    SpawnThread(&'static str),
}

/// Short form alias for functions returning `Error`s.
pub type Result<T> = ::std::result::Result<T, Error>;

use crate::value::UnknownHandleType;

/// A managed exception raised at or across the native boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Exception {
    #[error("ArgumentError: wrong number of arguments ({given} for {expected}) in `{method}'")]
    Argument {
        method: String,
        expected: usize,
        given: usize,
        backtrace: Vec<String>,
    },

    #[error("RuntimeError: {message}")]
    Runtime { message: String },

    #[error("TypeError: wrong argument type (expected {expected})")]
    Type { expected: &'static str },

    #[error("LoadError: {message}")]
    Load { message: String },

    #[error("NoMethodError: undefined method `{name}'")]
    NoMethod { name: String },

    #[error("{class}: {message}")]
    Raised {
        class: String,
        message: String,
        backtrace: Vec<String>,
    },
}

impl Exception {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::Load {
            message: message.into(),
        }
    }

    pub fn backtrace(&self) -> &[String] {
        match self {
            Self::Argument { backtrace, .. } | Self::Raised { backtrace, .. } => backtrace,
            _ => &[],
        }
    }
}

impl From<UnknownHandleType> for Exception {
    fn from(_: UnknownHandleType) -> Self {
        Self::runtime("requested object for unknown handle type")
    }
}

/// Conditions the bridge cannot recover from.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("attempted to dereference an invalid handle 0x{0:x}")]
    InvalidHandle(usize),

    #[error("attempted to dereference an unknown handle 0x{0:x}")]
    UnknownHandle(usize),

    #[error("exception raised with no active exception point: {0}")]
    Unanchored(Exception),

    #[error("no execution environment on this thread")]
    NoEnvironment,

    #[error("execution environment re-initialized during an active crossing")]
    EnvironmentBusy,
}

impl FatalError {
    /// Log a diagnostic and abort the process.
    #[cold]
    pub fn abort(self) -> ! {
        log::error!("fatal: {self}");
        eprintln!("fatal: {self}");
        std::process::abort()
    }
}

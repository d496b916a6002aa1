use core::fmt;

use crate::status::error_string;

/// The closed failure taxonomy returned by every public operation.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// No compute device could be discovered or selected.
    NoDevice,
    /// Loading, compiling or resolving the entry point of a kernel failed.
    UnableToBuildKernel,
    /// Enqueueing or launching a kernel failed.
    UnableToExecuteKernel,
    /// Allocation, transfer, binding or queue lifecycle failures.
    GeneralFail,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoDevice => "No compute device could be discovered or selected.",
            ErrorKind::UnableToBuildKernel => "Unable to build the kernel.",
            ErrorKind::UnableToExecuteKernel => "Unable to execute the kernel.",
            ErrorKind::GeneralFail => "General failure.",
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// [`ErrorKind`] plus `Ok`, for callers that want a single status value per call.
/// # Example
/// ```
/// use sico::{Error, ErrorKind, State};
///
/// let ok: sico::Result<()> = Ok(());
/// assert_eq!(State::of(&ok), State::Ok);
///
/// let failed: sico::Result<()> = Err(Error::new(ErrorKind::NoDevice, "empty registry"));
/// assert_eq!(State::of(&failed), State::NoDevice);
/// ```
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum State {
    Ok,
    NoDevice,
    UnableToBuildKernel,
    UnableToExecuteKernel,
    GeneralFail,
}

impl State {
    #[inline]
    pub fn of<T>(result: &Result<T>) -> State {
        match result {
            Ok(_) => State::Ok,
            Err(err) => err.kind().into(),
        }
    }
}

impl From<ErrorKind> for State {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoDevice => State::NoDevice,
            ErrorKind::UnableToBuildKernel => State::UnableToBuildKernel,
            ErrorKind::UnableToExecuteKernel => State::UnableToExecuteKernel,
            ErrorKind::GeneralFail => State::GeneralFail,
        }
    }
}

/// Where in the invocation pipeline an [`Error`] was raised.
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum Stage {
    Discovery,
    Selection,
    Context,
    Config,
    SourceLoad,
    ProgramBuild,
    EntryPoint,
    Allocation,
    Upload,
    ArgumentBinding,
    Launch,
    Synchronize,
    Download,
    Queue,
    Release,
}

/// The error type of this crate.
///
/// Besides the [`ErrorKind`] it carries whatever diagnostics were available
/// when the failure was observed: the runtime status code, the index of the
/// failing parameter and the compiler's build log.
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    stage: Option<Stage>,
    message: String,
    code: Option<i32>,
    param: Option<usize>,
    build_log: Option<String>,
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error {
            kind,
            stage: None,
            message: message.into(),
            code: None,
            param: None,
            build_log: None,
        }
    }

    #[inline]
    pub fn general(stage: Stage, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::GeneralFail, message).at(stage)
    }

    #[inline]
    pub fn no_device(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::NoDevice, message).at(Stage::Selection)
    }

    #[inline]
    pub fn build(stage: Stage, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::UnableToBuildKernel, message).at(stage)
    }

    #[inline]
    pub fn execute(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::UnableToExecuteKernel, message).at(Stage::Launch)
    }

    #[inline]
    pub fn at(mut self, stage: Stage) -> Error {
        self.stage = Some(stage);
        self
    }

    #[inline]
    pub fn with_code(mut self, code: i32) -> Error {
        self.code = Some(code);
        self
    }

    #[inline]
    pub fn with_param(mut self, idx: usize) -> Error {
        self.param = Some(idx);
        self
    }

    #[inline]
    pub fn with_build_log(mut self, log: impl Into<String>) -> Error {
        self.build_log = Some(log.into());
        self
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The raw status code reported by the underlying runtime.
    #[inline]
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// The decoded name of [`Error::code`], e.g. `CL_INVALID_KERNEL_NAME`.
    #[inline]
    pub fn code_name(&self) -> Option<&'static str> {
        self.code.map(error_string)
    }

    /// Index of the parameter that failed to allocate, upload, bind or download.
    #[inline]
    pub fn param(&self) -> Option<usize> {
        self.param
    }

    /// The full compiler output for build failures, verbatim.
    #[inline]
    pub fn build_log(&self) -> Option<&str> {
        self.build_log.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.message)?;

        if let Some(idx) = self.param {
            write!(f, " (param {idx})")?;
        }
        if let Some(code) = self.code {
            write!(f, " (error {})", error_string(code))?;
        }
        if let Some(log) = &self.build_log {
            write!(f, "\n\n{log}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for Error {}

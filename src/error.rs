use thiserror::Error;

/// Errors produced anywhere in the IPC runtime.
///
/// `Status` carries a transaction-level status (a negated errno, as put on
/// the wire by the kernel or by a peer's `BC_REPLY` with `STATUS_CODE` set);
/// everything else is a local failure that never reached the driver.
#[derive(Error, Debug)]
pub enum Error {
    #[error("stdio error")]
    StdioError(#[from] std::io::Error),
    #[error("nix error")]
    NixError(#[from] nix::Error),
    #[error("utf-16 error")]
    Utf16Error(#[from] std::string::FromUtf16Error),
    #[error("utf-8 error")]
    Utf8Error(#[from] std::string::FromUtf8Error),
    #[error("deserialization error")]
    DeserializationError,
    #[error("bad enum value")]
    BadEnumValue,
    #[error("object/offset mismatch at cursor")]
    ObjectOffsetMismatch,
    #[error("unknown device path {0:?}")]
    UnknownDevice(String),
    #[error("config error: {0}")]
    ConfigError(String),
    /// A transaction-level failure: a negated errno such as `-ESTALE`
    /// (dead object), `-EINVAL` (no request body for an unknown code) or
    /// the status carried by `BR_FAILED_REPLY`/`BR_DEAD_REPLY`.
    #[error("transaction status {0}")]
    Status(i32),
}

impl Error {
    /// The dead-object short circuit: transacting against a `RemoteObject`
    /// whose `dead` flag is set never touches the driver.
    pub const ESTALE: i32 = -nix::libc::ESTALE;
    pub const EINVAL: i32 = -nix::libc::EINVAL;

    pub fn status(code: i32) -> Self {
        Error::Status(code)
    }
}

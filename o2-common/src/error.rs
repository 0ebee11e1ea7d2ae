use thiserror::Error;

/// Every public operation that can fail returns exactly one of these kinds.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The process was used before [`crate::ensemble_name_valid`] succeeded, ie. before
    /// initialization.
    #[error("process is not initialized")]
    NotInitialized,
    /// A service name was empty, too long, or contained `/`.
    #[error("bad service name")]
    BadServiceName,
    /// An address did not start with `/` or could not be split into service and rest.
    #[error("bad address")]
    BadAddress,
    /// A message's type tag and payload were inconsistent, or a bundle's framing didn't add up.
    #[error("malformed message")]
    MalformedMessage,
    /// A `connect()` to a peer or OSC TCP delegate failed.
    #[error("tcp connect failed")]
    TcpConnectFail,
    /// A `send()` on a stream or datagram socket failed.
    #[error("send failed")]
    SendFail,
    /// `getaddrinfo`-equivalent resolution of a hostname failed.
    #[error("hostname resolution failed")]
    HostnameResolutionFail,
    /// Allocating a message or table entry failed.
    #[error("allocation failed")]
    AllocationFail,
    /// Attempted to create something (service, tap, bridge port) that already exists.
    #[error("already exists")]
    AlreadyExists,
    /// Looked up a service, peer, or tap that isn't in the relevant table.
    #[error("not found")]
    NotFound,
    /// A scheduled send was attempted with a future timestamp before the clock converged.
    #[error("clock is not synchronized")]
    UnsynchronizedClock,
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

//! Error type shared by the kernel queries and the argument buffer decoder.

use thiserror::Error;

/// Result type alias for process table queries.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A `sysctl` query failed. Carries the `errno` reported by the kernel.
    #[error("kernel query failed: {}", std::io::Error::from_raw_os_error(*.0))]
    Kernel(i32),

    /// The raw argument buffer does not have the expected layout.
    #[error("malformed argument buffer: {0}")]
    MalformedInput(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Capture `errno` right after a failed libc call.
    #[cfg_attr(not(target_vendor = "apple"), allow(dead_code))]
    pub(crate) fn last_os_error() -> Self {
        let err = std::io::Error::last_os_error();
        Error::Kernel(err.raw_os_error().unwrap_or(libc::EIO))
    }

    /// The kernel status code, if this is a kernel failure.
    pub fn kernel_code(&self) -> Option<i32> {
        match self {
            Error::Kernel(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedInput(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_error_renders_os_message() {
        let err = Error::Kernel(libc::ESRCH);
        assert_eq!(err.kernel_code(), Some(libc::ESRCH));
        let expected = std::io::Error::from_raw_os_error(libc::ESRCH).to_string();
        assert_eq!(err.to_string(), format!("kernel query failed: {expected}"));
    }

    #[test]
    fn wrapped_errors_are_transparent() {
        let err: Error = anyhow::anyhow!("out of memory").into();
        assert_eq!(err.to_string(), "out of memory");
        assert_eq!(err.kernel_code(), None);
        assert!(!err.is_malformed());
    }

    #[test]
    fn malformed_input_names_the_check() {
        let err = Error::MalformedInput("missing path terminator");
        assert!(err.is_malformed());
        assert_eq!(
            err.to_string(),
            "malformed argument buffer: missing path terminator"
        );
    }
}

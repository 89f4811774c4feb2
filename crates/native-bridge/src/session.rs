//! Process-wide init/deinit bracketing for the native library.

use std::ffi::CString;

use crate::error::LibraryError;
use crate::ffi::{ForeignApi, NativeLibrary};

pub use sys_native::AllocPolicy;

/// Program name passed as the first library argument by default.
pub const DEFAULT_PROGRAM: &str = "native-bridge";

/// Configuration for starting a [`LibrarySession`].
///
/// The options are turned into the argument vector the native library
/// parses at init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryOptions {
    program: String,
    policy: AllocPolicy,
    quarantine_limit: Option<usize>,
    extra_args: Vec<String>,
}

impl LibraryOptions {
    /// Creates options with the default program name and allocation policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_owned(),
            policy: AllocPolicy::default(),
            quarantine_limit: None,
            extra_args: Vec::new(),
        }
    }

    /// Sets the program name (`argv[0]`).
    #[must_use]
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets what the library does with released objects.
    ///
    /// The default quarantine keeps every released block until the session
    /// ends unless [`quarantine_limit`](Self::quarantine_limit) bounds it.
    #[must_use]
    pub const fn policy(mut self, policy: AllocPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bounds the number of quarantined blocks.
    ///
    /// Once the bound is exceeded the oldest block is returned to the system
    /// allocator and its address may be handed out again.
    #[must_use]
    pub const fn quarantine_limit(mut self, limit: usize) -> Self {
        self.quarantine_limit = Some(limit);
        self
    }

    /// Appends a raw argument, passed through unchanged.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// The argument vector, program name first.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.program.clone()];
        if self.policy != AllocPolicy::default() {
            let policy = match self.policy {
                AllocPolicy::Quarantine => "quarantine",
                AllocPolicy::Pooled => "pooled",
            };
            args.push(format!("--nat-alloc={policy}"));
        }
        if let Some(limit) = self.quarantine_limit {
            args.push(format!("--nat-quarantine-limit={limit}"));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// The argument vector as C strings.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::InvalidArgument`] if an argument contains a
    /// NUL byte.
    pub fn to_c_args(&self) -> Result<Vec<CString>, LibraryError> {
        self.to_args()
            .into_iter()
            .map(|arg| {
                CString::new(arg).map_err(|e| {
                    LibraryError::InvalidArgument(String::from_utf8_lossy(&e.into_vec()).into_owned())
                })
            })
            .collect()
    }
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the native library initialized for as long as it lives.
///
/// Dropping the session matches the init with a deinit. Sessions nest: the
/// library is torn down when the last one is dropped.
#[derive(Debug)]
pub struct LibrarySession<A: ForeignApi = NativeLibrary> {
    api: A,
}

impl LibrarySession<NativeLibrary> {
    /// Starts a session on the bundled native library with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the library refuses to initialize.
    pub fn native() -> Result<Self, LibraryError> {
        Self::init(NativeLibrary, &LibraryOptions::new())
    }
}

impl<A: ForeignApi> LibrarySession<A> {
    /// Initializes `api` with `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument cannot be passed to C or the library
    /// refuses to initialize.
    pub fn init(api: A, options: &LibraryOptions) -> Result<Self, LibraryError> {
        let args = options.to_c_args()?;
        api.init(&args).inspect_err(|err| {
            tracing::error!(%err, "native library init failed");
        })?;
        tracing::debug!(args = ?options.to_args(), "native library initialized");
        Ok(Self { api })
    }

    /// The API this session keeps initialized.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }
}

impl<A: ForeignApi> Drop for LibrarySession<A> {
    fn drop(&mut self) {
        self.api.deinit();
        tracing::debug!("native library deinitialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{ForeignCall, RecordingLibrary};

    #[test]
    fn test_default_args_are_just_the_program() {
        assert_eq!(LibraryOptions::new().to_args(), vec![DEFAULT_PROGRAM]);
    }

    #[test]
    fn test_options_build_library_arguments() {
        let args = LibraryOptions::new()
            .program("reuse-test")
            .policy(AllocPolicy::Pooled)
            .quarantine_limit(16)
            .arg("--verbose")
            .to_args();
        assert_eq!(
            args,
            vec![
                "reuse-test",
                "--nat-alloc=pooled",
                "--nat-quarantine-limit=16",
                "--verbose"
            ]
        );
    }

    #[test]
    fn test_nul_in_argument_is_rejected() {
        let err = LibraryOptions::new().arg("bad\0arg").to_c_args().unwrap_err();
        assert!(matches!(err, LibraryError::InvalidArgument(_)));
    }

    #[test]
    fn test_session_brackets_init_and_deinit() {
        let library = RecordingLibrary::new();
        {
            let session = LibrarySession::init(&library, &LibraryOptions::new().program("t")).unwrap();
            assert!(std::ptr::eq(*session.api(), &library));
        }
        assert_eq!(
            library.calls(),
            vec![ForeignCall::Init(vec!["t".into()]), ForeignCall::Deinit]
        );
    }

    #[test]
    fn test_failed_init_does_not_deinit() {
        let library = RecordingLibrary::failing_init(LibraryError::Conflict);
        let err = LibrarySession::init(&library, &LibraryOptions::new()).unwrap_err();
        assert_eq!(err, LibraryError::Conflict);
        assert!(!library.calls().contains(&ForeignCall::Deinit));
    }

    #[test]
    fn test_native_session_initializes_library() {
        let session = LibrarySession::native().unwrap();
        assert!(session.api().is_initialized());
    }
}

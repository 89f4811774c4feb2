use std::ffi::{c_char, c_int, CStr};

const ALLOC_PREFIX: &str = "--nat-alloc=";
const QUARANTINE_LIMIT_PREFIX: &str = "--nat-quarantine-limit=";

/// What happens to a block once its last owner releases it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AllocPolicy {
    /// Poison the block and keep it out of circulation until teardown.
    ///
    /// Unless a quarantine limit is set, held memory grows with the total
    /// number of allocations made during the session.
    #[default]
    Quarantine,
    /// Poison the block and hand it out again on the next allocation of the
    /// same kind, most recently freed first.
    Pooled,
}

/// Session options parsed from the `nat_init` argument vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitOptions {
    pub policy: AllocPolicy,
    /// Maximum number of quarantined blocks; `None` keeps all of them.
    pub quarantine_limit: Option<usize>,
}

/// Argument that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadArgument(pub String);

impl InitOptions {
    /// Parses `--nat-*` options; everything else is left for the caller.
    pub fn parse<'a, I>(args: I) -> Result<Self, BadArgument>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut options = Self::default();
        for arg in args {
            if let Some(value) = arg.strip_prefix(ALLOC_PREFIX) {
                options.policy = match value {
                    "quarantine" => AllocPolicy::Quarantine,
                    "pooled" => AllocPolicy::Pooled,
                    _ => return Err(BadArgument(arg.to_owned())),
                };
            } else if let Some(value) = arg.strip_prefix(QUARANTINE_LIMIT_PREFIX) {
                let limit = value
                    .parse::<usize>()
                    .map_err(|_| BadArgument(arg.to_owned()))?;
                options.quarantine_limit = Some(limit);
            }
        }
        Ok(options)
    }

    /// Parses a C argument vector.
    ///
    /// # Safety
    ///
    /// `argv` must be null or point to `argc` pointers, each null or a valid
    /// NUL-terminated string.
    pub unsafe fn from_argv(argc: c_int, argv: *const *const c_char) -> Result<Self, BadArgument> {
        let count = usize::try_from(argc).unwrap_or(0);
        if argv.is_null() || count == 0 {
            return Ok(Self::default());
        }
        let mut args = Vec::with_capacity(count);
        for i in 0..count {
            // SAFETY: guaranteed by the caller.
            let arg = unsafe { *argv.add(i) };
            if arg.is_null() {
                continue;
            }
            // SAFETY: non-null entries are NUL-terminated strings.
            let arg = unsafe { CStr::from_ptr(arg) };
            let arg = arg
                .to_str()
                .map_err(|_| BadArgument(arg.to_string_lossy().into_owned()))?;
            args.push(arg);
        }
        Self::parse(args)
    }
}

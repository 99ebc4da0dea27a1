use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(core::ffi::c_int);

impl Error {
    #[inline]
    pub fn as_isize(self) -> isize {
        self.0 as isize
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(errno::error_info(self.as_isize()))
    }
}

pub type KResult<T = isize> = core::result::Result<T, Error>;

pub mod errno {
    macro_rules! declare_errno {
        ($($name:tt, $errno:literal, $desc:literal,)*) => {
            $(#[doc = $desc]
            pub const $name: super::Error = super::Error($errno);)*
            pub fn error_info(errno: isize) -> &'static str {
                match errno {
                    $($errno => ::core::concat!(stringify!($name), ", ", $desc),)*
                    _ => "unknown error",
                }
            }
        };
    }

    #[rustfmt::skip]
    declare_errno!(
        ENOENT,         -2,     "No such file or directory.",
        EIO,            -5,     "I/O error.",
        EBADF,          -9,     "Bad file number.",
        ENOMEM,         -12,    "Out of memory",
        EFAULT,         -14,    "Bad address.",
        EEXIST,         -17,    "File exists.",
        EINVAL,         -22,    "Invalid argument.",
        ENOSPC,         -28,    "No space left on device.",
    );
}

#[cfg(test)]
mod tests {
    use super::errno;

    #[test]
    fn error_info_names_errno() {
        assert_eq!(errno::error_info(errno::EFAULT.as_isize()), "EFAULT, Bad address.");
        assert_eq!(errno::error_info(-4096), "unknown error");
    }
}

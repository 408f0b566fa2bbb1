use std::fmt;


#[derive(Debug)]
pub enum Error {
    ObjectInMemoryLayout,
    NotGrowable { requested: usize, current: usize },
    InvalidRange { index: usize, length: usize, available: usize },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectInMemoryLayout
                => write!(f, "object files cannot be given in memory layout"),
            Self::NotGrowable { requested, current }
                => write!(f, "cannot resize buffer of {:#X} bytes to {:#X} bytes", current, requested),
            Self::InvalidRange { index, length, available }
                => write!(f, "range of {:#X} bytes at {:#X} exceeds the {:#X} available bytes", length, index, available),
        }
    }
}
impl std::error::Error for Error {
}

pub(crate) mod logger;
pub(crate) mod raw;
pub(crate) mod signals;

pub(crate) mod color;
pub(crate) mod log;
pub(crate) mod outcome;
pub(crate) mod stats;

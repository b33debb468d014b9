mod abstractions;
mod facade;
mod system;

pub(crate) use abstractions::*;
pub(crate) use facade::*;
pub(crate) use system::*;

pub mod copy;
pub mod inspect;

pub use copy::*;
pub use inspect::*;

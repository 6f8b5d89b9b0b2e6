//! PowerScribe RAS client module.

mod powerscribe;
pub mod soap;
pub mod xml;

pub use powerscribe::*;

#[macro_use]
extern crate async_trait;

pub mod datatype;
pub mod iterator;
pub mod record;
pub mod value;

mod arrayvec;
mod assert;
mod namespace;

pub use arrayvec::{ArrayStr, ArrayVec};
pub use namespace::{ShortTypename, short_typename};

#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

#[macro_use] mod macros;

pub mod layer;
pub mod managed;
pub mod time;
pub mod wire;

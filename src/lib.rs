#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
extern crate bitcoin;

pub mod arbitration;
pub mod error;
pub mod protocol;
pub mod task;
pub mod trade;
pub mod transport;
pub mod utill;
pub mod wallet;

#![doc = include_str!("../README.md")]

pub mod utils;
pub mod rng;
pub mod keyfn;
mod spooky;
mod family;
mod table;
mod serial;
mod error;

pub use error::Error;
pub use serial::ParseError;
pub use table::{
    BuildConf, Table, DEFAULT_LOADING_FACTOR, DEFAULT_TIMEOUT_MS, EMPTY_VAL, HASH_MULTIPLIER,
};

pub use dyn_size_of::GetSize;

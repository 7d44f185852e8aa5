//! TD Ameritrade REST Integration
//!
//! User principals and option chain discovery.

mod client;

pub use client::TdAmeritradeClient;

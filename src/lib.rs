//! pitax - Polish capital-gains (PIT) calculator for brokerage order history
//!
//! This library ingests broker orders, matches sales against purchases FIFO,
//! converts amounts into PLN with NBP historical rates and keeps one
//! capital-gains and one PIT report per user and tax year up to date.

pub mod config;
pub mod db;
pub mod error;
pub mod fx;
pub mod orders;
pub mod pipeline;
pub mod tax;
pub mod utils;

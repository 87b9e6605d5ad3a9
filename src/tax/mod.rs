// Tax module - FIFO capital gains and PIT (Polish personal income tax) figures

pub mod capital_gains;
pub mod cost_basis;
pub mod pit;

pub use capital_gains::CapitalGainsPreview;
pub use cost_basis::{FifoMatcher, Lot, SaleMatch};
pub use pit::PitPreview;

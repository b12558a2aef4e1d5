//! Request handlers.

pub mod health;
pub mod salestax;

pub use salestax::{SalesTaxRequest, SalesTaxResponse, SalesTaxState};

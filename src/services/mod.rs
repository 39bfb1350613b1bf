// Pharmacy services
pub mod reports;
pub mod sales;
pub mod stock;
pub mod validation;

pub mod catalogue_medicament;
pub mod medicament;
pub mod purchase_record;
pub mod sale;
pub mod sale_line;
pub mod stock_lot;

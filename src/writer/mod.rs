pub mod bin;
pub mod listing;

// Ledger core
pub mod balance_store;
pub mod effects;
pub mod ledger_engine;
pub mod locks;
pub mod movement_ledger;

// Workflows and collaborators around the ledger
pub mod audit;
pub mod catalog;
pub mod purchase_orders;
pub mod reports;

pub mod activity_log;
pub mod product;
pub mod purchase_order;
pub mod purchase_order_item;
pub mod stock_balance;
pub mod stock_movement;
pub mod warehouse;

pub mod actor;
pub mod request_id;

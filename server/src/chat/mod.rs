pub mod history;
pub mod model;
pub mod store;
pub mod upload;

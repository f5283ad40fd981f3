pub mod audit;
pub mod notification;
pub mod preference;
pub mod sequence;
pub mod user;

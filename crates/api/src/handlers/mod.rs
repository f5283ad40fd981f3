pub mod notification;
pub mod preference;
pub mod presence;
pub mod sequence;

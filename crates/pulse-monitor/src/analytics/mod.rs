pub mod dashboard;
pub mod engagement;
pub mod sentiment;
pub mod trends;

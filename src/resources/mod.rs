pub mod common;
pub mod deployment;
pub mod exec_pod;
pub mod quantity;
pub mod service;
pub mod volume;

pub use common::{API_VERSION, FIELD_MANAGER, KIND, owner_reference, standard_labels};

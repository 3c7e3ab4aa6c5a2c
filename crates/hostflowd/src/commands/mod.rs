pub mod catalog;
pub mod reconcile;
pub mod resource;
pub mod run;

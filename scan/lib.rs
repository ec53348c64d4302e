#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod dispatch;
pub mod ld;
pub mod pipeline;
pub mod results;
pub mod slab;
pub mod statistic;
pub mod types;
pub mod window;

#[path = "../store/mod.rs"]
pub mod store;

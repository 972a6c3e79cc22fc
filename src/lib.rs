pub mod app;
pub mod catalog;
pub mod collab;
pub mod config;
pub mod host;
pub mod orchestration;
pub mod params;
pub mod provider;
pub mod shared;
pub mod working_set;

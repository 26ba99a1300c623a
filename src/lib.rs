pub mod chatfuel;
pub mod config;
pub mod core;
pub mod crud;
pub mod dashboards;
pub mod main_module;
pub mod security;

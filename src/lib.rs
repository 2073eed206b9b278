pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod model;
pub mod push;
pub mod queue;
pub mod schedule;
pub mod tracker;

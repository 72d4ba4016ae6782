pub mod app;
pub mod config;
pub mod core;
pub mod engine;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod player;
pub mod playlist;
pub mod probe;
pub mod progress;
pub mod resolver;
pub mod scheduler;
pub mod sequencer;
pub mod thumbnails;
pub mod ui;

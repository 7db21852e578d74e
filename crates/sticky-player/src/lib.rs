pub mod config;
pub mod engine;
pub mod facade;
pub mod nowplaying;
pub mod overlay;
pub mod platform;
pub mod playlist;
pub mod poller;
pub mod protocol;
pub mod queue;
pub mod state;
pub mod track;

// Module declarations
pub mod activity_log;
pub mod ai_integration;
pub mod app_state;
pub mod capture;
pub mod commands;
pub mod error;
pub mod event;
pub mod pattern_analyzer;
pub mod screenshot_store;
pub mod stats;
pub mod storage;
pub mod tabs;
pub mod trigger;
pub mod utils;

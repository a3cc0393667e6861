pub mod audio;
pub mod config;
pub mod library;
pub mod relocate;
pub mod ui;

pub use audio::{PlayerConfig, SegmentPlayer};
pub use config::Config;
pub use relocate::Relocator;

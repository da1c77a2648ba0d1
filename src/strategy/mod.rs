// Long-setup validation for breakout signals
pub mod long_setup;
pub mod trigger;

pub use long_setup::LongSetupRules;
pub use trigger::{locate_trigger_bar, TriggerMatch, TriggerMiss};

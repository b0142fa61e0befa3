//! Inhibition: a firing source alert hides matching target alerts.

mod engine;

pub use engine::InhibitionEngine;

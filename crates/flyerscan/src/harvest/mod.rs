//! Browser harvester: one exclusive headless session per job that collects
//! flyer image URLs and the page header.

pub mod browser;
#[cfg(feature = "chromium")]
pub mod chromium;
pub mod filter;
pub mod gate;
pub mod harvester;
pub mod login_wall;

pub use browser::{within, BrowserLauncher, BrowserSession, NoBrowser};
#[cfg(feature = "chromium")]
pub use chromium::ChromiumLauncher;
pub use filter::ImageFilter;
pub use gate::{BrowserGate, ExclusiveSession};
pub use harvester::{HarvestResult, HarvestSettings, Harvester};
pub use login_wall::{detect_login_wall, LoginWallDetector};

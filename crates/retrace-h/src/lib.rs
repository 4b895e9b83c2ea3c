pub mod cdp;
pub mod driver;
pub mod inject;
pub mod recording;

pub use cdp::LaunchOptions;
pub use driver::HeadlessDriver;

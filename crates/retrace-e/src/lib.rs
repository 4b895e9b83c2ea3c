pub mod driver;
pub mod webdriver;

pub use driver::EmbeddedDriver;

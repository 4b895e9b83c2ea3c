pub mod capture;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dom;
pub mod driver;
pub mod formatter;
pub mod navigation;
pub mod recorder;
pub mod replay;
pub mod selector;
pub mod service;
pub mod storage;
pub mod template;

pub use retrace_common::error;
pub use retrace_common::protocol;

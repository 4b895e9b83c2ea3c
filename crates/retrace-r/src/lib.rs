pub mod server;

pub use server::{RemoteServer, ServerHandle};

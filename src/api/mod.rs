mod server;
pub mod services;
pub mod shaper;
pub mod state;

pub use server::{router, run};

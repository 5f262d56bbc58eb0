pub mod locks;

pub use locks::{LockRegistry, LockTimeout};

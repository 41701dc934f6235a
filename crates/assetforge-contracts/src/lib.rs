pub mod assets;
pub mod credentials;
pub mod error;
pub mod events;
pub mod runs;

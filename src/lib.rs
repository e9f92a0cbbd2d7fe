pub mod config;
pub mod feed;
pub mod logging;
pub mod model;
pub mod reliability;
pub mod runtime;
pub mod scheduler;
pub mod verify;
pub mod world;

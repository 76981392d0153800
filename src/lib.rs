pub mod codec;
pub mod error;
pub mod models;
pub mod parser;
pub mod player;
pub mod resolver;
pub mod tracker;

pub use error::{Result, VastError};
pub use models::VastDocument;
pub use player::{AdPlayer, PlayerConfig, PlayerEvent, PlayerState};
pub use resolver::{Resolver, ResolverConfig};
pub use tracker::TrackingDispatcher;

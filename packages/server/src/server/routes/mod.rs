// HTTP routes
pub mod artifacts;
pub mod health;
pub mod index;
pub mod jobs;
pub mod stream;

pub use artifacts::*;
pub use health::*;
pub use index::*;
pub use jobs::*;
pub use stream::*;

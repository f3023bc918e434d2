//! CLI command implementations

pub mod config;
pub mod consume;
pub mod inspect;
pub mod publish;
pub mod status;

pub use config::execute as config;
pub use consume::execute as consume;
pub use inspect::execute as inspect;
pub use publish::execute as publish;
pub use status::execute as status;

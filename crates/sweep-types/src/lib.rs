pub mod command;
pub mod errors;
pub mod params;
pub mod run;
pub mod sweep;

pub use command::*;
pub use errors::*;
pub use params::*;
pub use run::*;
pub use sweep::*;

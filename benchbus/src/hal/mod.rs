pub(crate) mod config;
pub(crate) mod equipment;
pub(crate) mod instrument;
pub(crate) mod manager;
pub(crate) mod measurement;
pub(crate) mod multimeter;
pub(crate) mod power_supply;
pub(crate) mod scpi;
pub(crate) mod transport;

pub use config::*;
pub use equipment::*;
pub use instrument::*;
pub use manager::*;
pub use measurement::*;
pub use multimeter::*;
pub use power_supply::*;
pub use transport::*;

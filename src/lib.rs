#![doc = include_str!("../README.md")]

pub mod address;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod packer;
pub mod registry;
pub mod session;
pub mod transform;
pub mod transport;

pub use address::{AddressDescriptor, AddressError, Area, WordLen};
pub use config::{DriverConfig, DRIVER_VERSION};
pub use dispatch::{DispatchItem, DispatchQueue, ERROR_VAR, VERSION_KEY};
pub use driver::{install_fatal_error_hook, Direction, Driver, TransportFactory, ValueSink};
pub use error::DriverError;
pub use registry::{Registry, SubscribedAddress};
pub use session::WriteItem;
pub use transform::{TransformationKind, Value};
pub use transport::{PduItem, S7TcpTransport, Transport, TransportError, ITEM_OK};

// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

use thiserror::Error;

use crate::address::AddressError;
use crate::transform::TransformError;

/// Failures surfaced to the host through the façade operations.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("periphery address `{0}` does not have 1 or 3 `$`-separated tokens")]
    MalformedPeriphAddress(String),
    #[error("periphery address `{0}` has an empty IP token")]
    EmptyIp(String),
    #[error("`{0}`: poll interval is not a decimal integer")]
    BadPollInterval(String),
    #[error("no transformation fits `{0}` and the host supplied none")]
    UndefinedTransformation(String),
    #[error("no session is running for {ip}, dropping the write to {raw}")]
    Unroutable { ip: String, raw: String },
    #[error("write of {got} bytes does not match `{raw}` ({expected} bytes)")]
    WriteSizeMismatch {
        raw: String,
        expected: usize,
        got: usize,
    },
    #[error("unknown control address `{0}`")]
    UnknownControl(String),
}

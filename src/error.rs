/// Error taxonomy for discovery, filtering, and port control.
#[derive(Debug)]
pub enum Error {
    /// Enumeration or `open()` failed at the `nusb` layer.
    UsbError(nusb::Error),
    /// A control transfer failed at the `nusb` layer.
    UsbTransferError(nusb::transfer::TransferError),
    /// A sysfs read or write failed.
    IoError(std::io::Error),
    /// Device class byte was not 0x09 (hub).
    InvalidDeviceClass,
    /// A descriptor read returned fewer bytes than required.
    InvalidRespone,
    /// Port number outside 1..=nports, or outside 1..=MAX_HUB_PORTS.
    InvalidPort,
    /// BOS descriptor absent or carried no Container ID capability.
    BosMissing,
    /// Discovery and filtering left nothing to act on.
    NoActionableHubs,
    /// A write action was requested against more than one physical hub.
    AmbiguousScope,
    /// One or more hub opens/reads failed with an access error, and no
    /// actionable hub survived to compensate.
    PermissionDenied,
    /// Bad command-line option (port range, action token, ...).
    UsageError(String),
}

impl From<nusb::Error> for Error {
    fn from(error: nusb::Error) -> Self {
        Error::UsbError(error)
    }
}

impl From<nusb::transfer::TransferError> for Error {
    fn from(error: nusb::transfer::TransferError) -> Self {
        Error::UsbTransferError(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IoError(error)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(error: std::num::ParseIntError) -> Self {
        Error::UsageError(error.to_string())
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(error: std::num::ParseFloatError) -> Self {
        Error::UsageError(error.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UsbError(e) => write!(f, "{}", e),
            Self::UsbTransferError(e) => write!(f, "{}", e),
            Self::IoError(e) => write!(f, "{}", e),
            Self::InvalidDeviceClass => write!(f, "not a USB hub"),
            Self::InvalidRespone => write!(f, "invalid response"),
            Self::InvalidPort => write!(f, "invalid port"),
            Self::BosMissing => write!(f, "BOS descriptor missing or has no container ID"),
            Self::NoActionableHubs => write!(f, "no compatible hubs detected"),
            Self::AmbiguousScope => write!(
                f,
                "changing port state for multiple hubs at once is not supported; use --location to limit operation to one hub"
            ),
            Self::PermissionDenied => write!(
                f,
                "there were permission problems while accessing USB; check your udev rules"
            ),
            Self::UsageError(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

use std::collections::HashMap;

use mac_address::MacAddress;
use uuid::Uuid;

use crate::error::TransportError;

pub type DeviceAddress = MacAddress;

/// Everything that reaches the session from outside a direct call:
/// transport callbacks and the scan deadline.
///
/// Advertise callbacks carry the attempt number the session handed to
/// [`crate::transport::BeaconTransport::begin_advertising`].
#[derive(Clone, Debug)]
pub enum SessionInput {
    AdvertiseStarted(/* attempt */ u64),
    AdvertiseFailed(/* attempt */ u64, TransportError),
    ScanRecord {
        address: DeviceAddress,
        service_data: HashMap<Uuid, Vec<u8>>,
    },
    ScanFailed(/* host error code */ i32),
    ScanDeadline(/* scan generation */ u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservationEvent {
    pub address: DeviceAddress,
    pub message: String,
}

/// What the front end needs to show after the session handled an input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    AdvertiseStarted,
    AdvertiseFailed(TransportError),
    Observed(ObservationEvent),
    ScanFailed(i32),
    ScanExpired,
}

//! A radio that only hears itself. Useful without Bluetooth hardware.

use async_trait::async_trait;
use log::{debug, warn};
use mac_address::MacAddress;
use uuid::Uuid;

use super::{BeaconTransport, InputSender};
use crate::codec::{BeaconFrame, parse_service_data};
use crate::error::TransportError;
use crate::messages::SessionInput;
use crate::profile::PowerProfile;

/// Locally administered, so it can't collide with a real device.
const LOOPBACK_ADDRESS: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

pub fn loopback_address() -> MacAddress {
    MacAddress::new(LOOPBACK_ADDRESS)
}

pub struct LoopbackTransport {
    inputs: InputSender,
    advertisement: Option<Vec<u8>>,
    scan_filter: Option<Uuid>,
}

impl LoopbackTransport {
    pub fn new(inputs: InputSender) -> Self {
        LoopbackTransport {
            inputs,
            advertisement: None,
            scan_filter: None,
        }
    }

    fn send(&self, input: SessionInput) {
        if self.inputs.send(input).is_err() {
            debug!("Session gone, dropping loopback input");
        }
    }

    // Hears the current advertisement the way a scanner would: from raw bytes.
    fn echo(&self) {
        let (Some(raw), Some(filter)) = (&self.advertisement, self.scan_filter) else {
            return;
        };
        match parse_service_data(raw) {
            Ok(service_data) if service_data.contains_key(&filter) => {
                self.send(SessionInput::ScanRecord {
                    address: loopback_address(),
                    service_data,
                });
            }
            Ok(_) => debug!("Loopback advertisement does not match scan filter"),
            Err(err) => warn!("Could not read back own advertisement: {}", err),
        }
    }
}

#[async_trait]
impl BeaconTransport for LoopbackTransport {
    async fn begin_advertising(
        &mut self,
        attempt: u64,
        frame: &BeaconFrame,
        profile: PowerProfile,
    ) -> anyhow::Result<()> {
        if self.advertisement.is_some() {
            self.send(SessionInput::AdvertiseFailed(
                attempt,
                TransportError::AlreadyStarted,
            ));
            return Ok(());
        }
        debug!("Loopback advertising at {:?}", profile.advertise_mode.interval());
        self.advertisement = Some(frame.advertisement_bytes());
        self.send(SessionInput::AdvertiseStarted(attempt));
        self.echo();
        Ok(())
    }

    async fn end_advertising(&mut self) -> anyhow::Result<()> {
        self.advertisement = None;
        Ok(())
    }

    async fn begin_scanning(&mut self, service_filter: Uuid) -> anyhow::Result<()> {
        self.scan_filter = Some(service_filter);
        self.echo();
        Ok(())
    }

    async fn end_scanning(&mut self) -> anyhow::Result<()> {
        self.scan_filter = None;
        Ok(())
    }
}

//! BlueZ radio: scanning through btleplug, advertising through bluer.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context as _;
use async_trait::async_trait;
use btleplug::api::{Central as _, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use futures::StreamExt as _;
use log::{debug, error, info, warn};
use mac_address::MacAddress;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{BeaconTransport, InputSender, forward_scan_records};
use crate::codec::BeaconFrame;
use crate::error::{SetupError, TransportError};
use crate::messages::SessionInput;
use crate::profile::PowerProfile;

pub struct BluezTransport {
    inputs: InputSender,
    scanner: Adapter,
    // Keeps the D-Bus connection behind `advertiser` alive.
    _session: bluer::Session,
    advertiser: bluer::Adapter,
    advertisement: Option<bluer::adv::AdvertisementHandle>,
    scan_task: Option<JoinHandle<()>>,
    connectable: bool,
}

impl BluezTransport {
    /// Opens the first adapter, powering it on if needed. Fails with a
    /// [`SetupError`] when there is no adapter or it cannot advertise.
    pub async fn connect(inputs: InputSender, connectable: bool) -> anyhow::Result<Self> {
        let manager = Manager::new()
            .await
            .context("Failed to create BLE manager")?;
        let scanner = manager
            .adapters()
            .await
            .context("Failed to get BLE adapters")?
            .into_iter()
            .next()
            .ok_or(SetupError::AdapterNotFound)?;

        let session = bluer::Session::new()
            .await
            .context("Failed to connect to BlueZ")?;
        let advertiser = session
            .default_adapter()
            .await
            .map_err(|_| SetupError::AdapterNotFound)?;

        if !advertiser.is_powered().await.unwrap_or(false) {
            info!("Powering on adapter {}", advertiser.name());
            advertiser
                .set_powered(true)
                .await
                .context("Failed to power on adapter")?;
        }

        let instances = advertiser
            .supported_advertising_instances()
            .await
            .unwrap_or(0);
        if instances == 0 {
            return Err(SetupError::AdvertisingUnsupported.into());
        }

        info!(
            "Using adapter {} ({} advertising instances)",
            advertiser.name(),
            instances
        );

        Ok(BluezTransport {
            inputs,
            scanner,
            _session: session,
            advertiser,
            advertisement: None,
            scan_task: None,
            connectable,
        })
    }

    fn send(&self, input: SessionInput) {
        if let Err(err) = self.inputs.send(input) {
            error!("Error reporting to session: {:?}", err);
        }
    }
}

/// BlueZ reports advertising failures as D-Bus errors.
fn advertise_failure(err: &bluer::Error) -> TransportError {
    match err.kind {
        bluer::ErrorKind::AlreadyExists => TransportError::AlreadyStarted,
        bluer::ErrorKind::NotPermitted => TransportError::TooManyAdvertisers,
        bluer::ErrorKind::InvalidLength => TransportError::DataTooLarge,
        bluer::ErrorKind::NotSupported => TransportError::FeatureUnsupported,
        _ => TransportError::InternalError,
    }
}

#[async_trait]
impl BeaconTransport for BluezTransport {
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

        let interval = profile.advertise_mode.interval();
        let advertisement = bluer::adv::Advertisement {
            advertisement_type: if self.connectable {
                bluer::adv::Type::Peripheral
            } else {
                bluer::adv::Type::Broadcast
            },
            service_uuids: BTreeSet::from([frame.service_id()]),
            service_data: BTreeMap::from([(frame.service_id(), frame.payload().to_vec())]),
            discoverable: Some(true),
            tx_power: Some(profile.tx_power_level.radiated_dbm()),
            min_interval: Some(interval),
            max_interval: Some(interval),
            ..Default::default()
        };
        debug!("{:?}", advertisement);

        match self.advertiser.advertise(advertisement).await {
            Ok(handle) => {
                self.advertisement = Some(handle);
                self.send(SessionInput::AdvertiseStarted(attempt));
            }
            Err(err) => {
                warn!("BlueZ refused advertisement: {}", err);
                self.send(SessionInput::AdvertiseFailed(
                    attempt,
                    advertise_failure(&err),
                ));
            }
        }
        Ok(())
    }

    async fn end_advertising(&mut self) -> anyhow::Result<()> {
        // Dropping the handle unregisters the advertisement.
        if self.advertisement.take().is_some() {
            debug!("Removed advertisement");
        }
        Ok(())
    }

    async fn begin_scanning(&mut self, service_filter: Uuid) -> anyhow::Result<()> {
        let events = self
            .scanner
            .events()
            .await
            .context("Failed to get BLE events")?;
        self.scanner
            .start_scan(ScanFilter {
                services: vec![service_filter],
            })
            .await
            .context("Failed to start BLE scan")?;

        let scanner = self.scanner.clone();
        let records = events.filter_map(move |event| {
            let scanner = scanner.clone();
            async move {
                let CentralEvent::ServiceDataAdvertisement { id, service_data } = event else {
                    return None;
                };
                match scanner.peripheral(&id).await {
                    Ok(peripheral) => Some((
                        MacAddress::new(peripheral.address().into_inner()),
                        service_data,
                    )),
                    Err(err) => {
                        debug!("Lost peripheral {:?}: {}", id, err);
                        None
                    }
                }
            }
        });
        self.scan_task = Some(tokio::spawn(forward_scan_records(
            records,
            self.inputs.clone(),
        )));
        Ok(())
    }

    async fn end_scanning(&mut self) -> anyhow::Result<()> {
        let Some(task) = self.scan_task.take() else {
            return Ok(());
        };
        task.abort();
        self.scanner
            .stop_scan()
            .await
            .context("Failed to stop BLE scan")?;
        Ok(())
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
    }
}


use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::codec::{FrameCodec, SERVICE_UUID};
use crate::error::StartError;
use crate::messages::{DeviceAddress, ObservationEvent, SessionEvent, SessionInput};
use crate::profile::PowerProfile;
use crate::transport::{BeaconTransport, InputReceiver, InputSender};

pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(220);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Advertising,
    Scanning,
    AdvertisingAndScanning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSighting {
    pub address: DeviceAddress,
    pub last_message: String,
}

/// Owns advertising and scanning state for one radio.
///
/// Every mutation happens through `&mut self`, either from a front-end call
/// or from [`BeaconSession::next`], so transport callbacks and operator
/// commands are applied one at a time.
pub struct BeaconSession<T> {
    transport: T,
    codec: FrameCodec,
    service_id: Uuid,
    profile: PowerProfile,
    advertising_active: bool,
    advertise_attempt: u64,
    scanning_active: bool,
    scan_generation: u64,
    scan_timer: Option<JoinHandle<()>>,
    sightings: HashMap<DeviceAddress, RemoteSighting>,
    inputs_tx: InputSender,
    inputs_rx: InputReceiver,
}

impl<T: BeaconTransport> BeaconSession<T> {
    /// `inputs_tx` must be the sender the transport reports through.
    pub fn new(
        transport: T,
        codec: FrameCodec,
        inputs_tx: InputSender,
        inputs_rx: InputReceiver,
    ) -> Self {
        BeaconSession {
            transport,
            codec,
            service_id: SERVICE_UUID,
            profile: PowerProfile::default(),
            advertising_active: false,
            advertise_attempt: 0,
            scanning_active: false,
            scan_generation: 0,
            scan_timer: None,
            sightings: HashMap::new(),
            inputs_tx,
            inputs_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        match (self.advertising_active, self.scanning_active) {
            (false, false) => SessionState::Idle,
            (true, false) => SessionState::Advertising,
            (false, true) => SessionState::Scanning,
            (true, true) => SessionState::AdvertisingAndScanning,
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising_active
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning_active
    }

    /// Profile of the most recent advertise request.
    pub fn profile(&self) -> PowerProfile {
        self.profile
    }

    pub fn capacity(&self) -> usize {
        self.codec.capacity(&self.service_id)
    }

    pub fn sighting(&self, address: &DeviceAddress) -> Option<&RemoteSighting> {
        self.sightings.get(address)
    }

    pub fn sighting_count(&self) -> usize {
        self.sightings.len()
    }

    /// Marks advertising active as soon as the request is submitted. A
    /// failure reported later through [`BeaconSession::next`] rolls it back,
    /// unless a stop or another start superseded this attempt.
    pub async fn start_advertising(
        &mut self,
        message: &str,
        profile: PowerProfile,
    ) -> Result<(), StartError> {
        if self.advertising_active {
            return Err(StartError::AlreadyActive);
        }
        let frame = self.codec.encode(message, self.service_id)?;

        info!("Starting ADV, {}", profile);
        debug!("Advertisement: {:02X?}", frame.advertisement_bytes());

        self.profile = profile;
        self.advertising_active = true;
        self.advertise_attempt += 1;
        let attempt = self.advertise_attempt;
        if let Err(err) = self
            .transport
            .begin_advertising(attempt, &frame, profile)
            .await
        {
            error!("Error submitting advertisement: {:?}", err);
            self.advertising_active = false;
            return Err(StartError::Transport(format!("{err:#}")));
        }
        Ok(())
    }

    /// Always legal. The transport is told to stop even if nothing runs.
    pub async fn stop_advertising(&mut self) {
        info!("Stopping ADV");
        self.advertising_active = false;
        // Callbacks still in flight for the stopped attempt become no-ops.
        self.advertise_attempt += 1;
        if let Err(err) = self.transport.end_advertising().await {
            warn!("Error stopping advertisement: {:?}", err);
        }
    }

    /// Scans until `duration_bound` elapses or [`BeaconSession::stop_scanning`].
    /// Starting again while a scan runs only pushes the deadline out.
    pub async fn start_scanning(&mut self, duration_bound: Duration) -> Result<(), StartError> {
        if !self.scanning_active {
            info!("Starting scan for {:?}", duration_bound);
            self.scanning_active = true;
            if let Err(err) = self.transport.begin_scanning(self.service_id).await {
                error!("Error starting scan: {:?}", err);
                self.scanning_active = false;
                return Err(StartError::Transport(format!("{err:#}")));
            }
        } else {
            debug!("Scan already running, extending by {:?}", duration_bound);
        }
        self.arm_scan_deadline(duration_bound);
        Ok(())
    }

    pub async fn stop_scanning(&mut self) {
        self.disarm_scan_deadline();
        if self.scanning_active {
            info!("Stopping scan");
        }
        self.scanning_active = false;
        if let Err(err) = self.transport.end_scanning().await {
            warn!("Error stopping scan: {:?}", err);
        }
    }

    /// Records a sighting and reports it unless the device repeated the
    /// message it sent last. Undecodable records are dropped.
    pub fn observe(
        &mut self,
        address: DeviceAddress,
        service_data: &HashMap<Uuid, Vec<u8>>,
    ) -> Option<ObservationEvent> {
        let message = match FrameCodec::decode(service_data, &self.service_id) {
            Ok(message) => message,
            Err(err) => {
                debug!("Dropping sighting from {}: {}", address, err);
                return None;
            }
        };

        match self.sightings.entry(address) {
            Entry::Occupied(entry) if entry.get().last_message == message => return None,
            Entry::Occupied(mut entry) => entry.get_mut().last_message = message.clone(),
            Entry::Vacant(entry) => {
                entry.insert(RemoteSighting {
                    address,
                    last_message: message.clone(),
                });
            }
        }
        Some(ObservationEvent { address, message })
    }

    /// Waits for the next transport callback or timer and applies it.
    /// Inputs with nothing to report are consumed without returning.
    ///
    /// Not cancel-safe. Inside `select!` use [`BeaconSession::next_input`]
    /// and apply the input in the branch handler.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            let input = self.next_input().await?;
            if let Some(event) = self.apply(input).await {
                return Some(event);
            }
        }
    }

    /// Cancel-safe.
    pub async fn next_input(&mut self) -> Option<SessionInput> {
        self.inputs_rx.recv().await
    }

    pub async fn apply(&mut self, input: SessionInput) -> Option<SessionEvent> {
        match input {
            SessionInput::AdvertiseStarted(attempt) => {
                if !self.is_current_attempt(attempt) {
                    debug!("Advertisement {} confirmed after stop, ignoring", attempt);
                    return None;
                }
                info!("Advertising confirmed");
                Some(SessionEvent::AdvertiseStarted)
            }
            SessionInput::AdvertiseFailed(attempt, reason) => {
                if !self.is_current_attempt(attempt) {
                    debug!(
                        "Advertisement {} failed after stop ({}), ignoring",
                        attempt, reason
                    );
                    return None;
                }
                error!("{}", reason);
                self.advertising_active = false;
                Some(SessionEvent::AdvertiseFailed(reason))
            }
            SessionInput::ScanRecord {
                address,
                service_data,
            } => {
                if !self.scanning_active {
                    return None;
                }
                self.observe(address, &service_data)
                    .map(SessionEvent::Observed)
            }
            SessionInput::ScanFailed(code) => {
                if !self.scanning_active {
                    debug!("Scan failure {} while not scanning, ignoring", code);
                    return None;
                }
                error!("Scan Failed, Error Code: {}", code);
                self.stop_scanning().await;
                Some(SessionEvent::ScanFailed(code))
            }
            SessionInput::ScanDeadline(generation) => {
                if !self.scanning_active || generation != self.scan_generation {
                    debug!("Stale scan deadline {}, ignoring", generation);
                    return None;
                }
                self.scan_timer = None;
                self.stop_scanning().await;
                Some(SessionEvent::ScanExpired)
            }
        }
    }

    /// Stops everything and forgets every sighting.
    pub async fn shutdown(&mut self) {
        self.stop_scanning().await;
        self.stop_advertising().await;
        self.sightings.clear();
    }

    fn is_current_attempt(&self, attempt: u64) -> bool {
        self.advertising_active && attempt == self.advertise_attempt
    }

    fn arm_scan_deadline(&mut self, bound: Duration) {
        self.disarm_scan_deadline();
        let generation = self.scan_generation;
        let inputs = self.inputs_tx.clone();
        self.scan_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(bound).await;
            // The session may be gone already.
            let _ = inputs.send(SessionInput::ScanDeadline(generation));
        }));
    }

    // Bumping the generation turns a deadline already queued into a no-op.
    fn disarm_scan_deadline(&mut self) {
        if let Some(timer) = self.scan_timer.take() {
            timer.abort();
        }
        self.scan_generation += 1;
    }
}

impl<T> Drop for BeaconSession<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.scan_timer.take() {
            timer.abort();
        }
    }
}

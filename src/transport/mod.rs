//! The radio, seen from the session as a narrow capability.
//!
//! Calls only submit work. Outcomes (advertise success or failure, scan
//! records) come back later as [`SessionInput`]s on the channel the
//! transport was built with.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::{Stream, StreamExt as _};
use log::{debug, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::codec::BeaconFrame;
use crate::messages::{DeviceAddress, SessionInput};
use crate::profile::PowerProfile;

#[cfg(target_os = "linux")]
pub mod bluez;
pub mod loopback;

pub type InputSender = mpsc::UnboundedSender<SessionInput>;
pub type InputReceiver = mpsc::UnboundedReceiver<SessionInput>;

/// Scan failure code reported when the host stops delivering scan events
/// on its own, e.g. the adapter was removed or the Bluetooth daemon restarted.
/// Host stacks use positive codes, so this one can't collide.
pub const SCAN_EVENTS_CLOSED: i32 = -1;

pub fn input_channel() -> (InputSender, InputReceiver) {
    mpsc::unbounded_channel()
}

/// Forwards scan records to the session until `records` ends or the session
/// goes away. A stream that ends by itself is reported as
/// `ScanFailed(SCAN_EVENTS_CLOSED)`. Aborting the task running this future
/// reports nothing.
pub async fn forward_scan_records<S>(records: S, inputs: InputSender)
where
    S: Stream<Item = (DeviceAddress, HashMap<Uuid, Vec<u8>>)>,
{
    futures::pin_mut!(records);
    while let Some((address, service_data)) = records.next().await {
        let record = SessionInput::ScanRecord {
            address,
            service_data,
        };
        if inputs.send(record).is_err() {
            debug!("Session gone, no longer forwarding scan records");
            return;
        }
    }
    warn!("No more BLE events");
    if inputs
        .send(SessionInput::ScanFailed(SCAN_EVENTS_CLOSED))
        .is_err()
    {
        debug!("Session gone, dropping scan failure");
    }
}

#[async_trait]
pub trait BeaconTransport: Send {
    /// Outcomes are reported tagged with `attempt`.
    async fn begin_advertising(
        &mut self,
        attempt: u64,
        frame: &BeaconFrame,
        profile: PowerProfile,
    ) -> anyhow::Result<()>;

    async fn end_advertising(&mut self) -> anyhow::Result<()>;

    /// Deliver records carrying service data for `service_filter` until
    /// [`BeaconTransport::end_scanning`].
    async fn begin_scanning(&mut self, service_filter: Uuid) -> anyhow::Result<()>;

    async fn end_scanning(&mut self) -> anyhow::Result<()>;
}

#[cfg(test)]
pub mod fake {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        BeginAdvertising {
            attempt: u64,
            payload: Vec<u8>,
            profile: PowerProfile,
        },
        EndAdvertising,
        BeginScanning(Uuid),
        EndScanning,
    }

    /// Records every call and lets the test play the host's callbacks.
    #[derive(Clone)]
    pub struct FakeTransport {
        calls: Arc<Mutex<Vec<Call>>>,
        inputs: InputSender,
        refuse: bool,
    }

    impl FakeTransport {
        pub fn new(inputs: InputSender) -> Self {
            FakeTransport {
                calls: Arc::default(),
                inputs,
                refuse: false,
            }
        }

        /// Every begin call fails synchronously.
        pub fn refusing(inputs: InputSender) -> Self {
            FakeTransport {
                refuse: true,
                ..FakeTransport::new(inputs)
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn report(&self, input: SessionInput) {
            self.inputs.send(input).unwrap();
        }

        pub fn inputs(&self) -> InputSender {
            self.inputs.clone()
        }

        fn record(&self, call: Call) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl BeaconTransport for FakeTransport {
        async fn begin_advertising(
            &mut self,
            attempt: u64,
            frame: &BeaconFrame,
            profile: PowerProfile,
        ) -> anyhow::Result<()> {
            if self.refuse {
                anyhow::bail!("adapter went away");
            }
            self.record(Call::BeginAdvertising {
                attempt,
                payload: frame.payload().to_vec(),
                profile,
            })
        }

        async fn end_advertising(&mut self) -> anyhow::Result<()> {
            self.record(Call::EndAdvertising)
        }

        async fn begin_scanning(&mut self, service_filter: Uuid) -> anyhow::Result<()> {
            if self.refuse {
                anyhow::bail!("adapter went away");
            }
            self.record(Call::BeginScanning(service_filter))
        }

        async fn end_scanning(&mut self) -> anyhow::Result<()> {
            self.record(Call::EndScanning)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SERVICE_UUID;

    fn record(last: u8, message: &str) -> (DeviceAddress, HashMap<Uuid, Vec<u8>>) {
        (
            DeviceAddress::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, last]),
            HashMap::from([(SERVICE_UUID, message.as_bytes().to_vec())]),
        )
    }

    #[tokio::test]
    async fn test_closed_event_stream_fails_scan() {
        let (tx, mut rx) = input_channel();
        let records = futures::stream::iter([record(1, "hi"), record(2, "yo")]);

        forward_scan_records(records, tx).await;

        for expected in [1, 2] {
            match rx.try_recv() {
                Ok(SessionInput::ScanRecord { address, .. }) => {
                    assert_eq!(address.bytes()[5], expected)
                }
                other => panic!("expected scan record, got {:?}", other),
            }
        }
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionInput::ScanFailed(SCAN_EVENTS_CLOSED))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forwarding_stops_without_session() {
        let (tx, rx) = input_channel();
        drop(rx);

        // Returns instead of spinning over the remaining records.
        forward_scan_records(futures::stream::iter([record(1, "hi")]), tx).await;
    }

    #[tokio::test]
    async fn test_aborted_forwarding_reports_nothing() {
        let (tx, mut rx) = input_channel();
        let task = tokio::spawn(forward_scan_records(futures::stream::pending(), tx));

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(rx.recv().await.is_none());
    }
}

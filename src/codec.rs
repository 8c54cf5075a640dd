//! Service-data framing for beacon advertisements.
//!
//! A frame is the UTF-8 bytes of the operator's message, carried as the
//! service data of [`SERVICE_UUID`]. There is no frame-type byte, length
//! prefix or checksum: any single advertisement is readable on its own.

use std::collections::HashMap;

use btleplug::api::bleuuid::{BleUuid as _, uuid_from_u16, uuid_from_u32};
use uuid::Uuid;

use crate::error::{DecodeError, EncodeError};

/// Eddystone service, `0000FEAA-0000-1000-8000-00805F9B34FB`.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_feaa_0000_1000_8000_0080_5f9b_34fb);

/// Size of a legacy (non-extended) advertisement PDU payload.
pub const LEGACY_ADVERTISEMENT_BYTES: usize = 31;

/// https://www.bluetooth.com/specifications/assigned-numbers/generic-access-profile/
mod ad_type {
    pub const FLAGS: u8 = 0x01;
    pub const COMPLETE_16_BIT_UUIDS: u8 = 0x03;
    pub const COMPLETE_32_BIT_UUIDS: u8 = 0x05;
    pub const COMPLETE_128_BIT_UUIDS: u8 = 0x07;
    pub const SERVICE_DATA_16_BIT_UUID: u8 = 0x16;
    pub const SERVICE_DATA_32_BIT_UUID: u8 = 0x20;
    pub const SERVICE_DATA_128_BIT_UUID: u8 = 0x21;
}

/// LE General Discoverable, BR/EDR not supported.
const ADVERTISING_FLAGS: u8 = 0x06;

/// Flags element: length, type, value.
const FLAGS_ELEMENT_BYTES: usize = 3;

/// A UUID in the shortest form the advertisement can carry it.
#[derive(Debug, Clone, Copy)]
enum CompactUuid {
    Short16(u16),
    Short32(u32),
    Full(u128),
}

impl CompactUuid {
    fn of(uuid: &Uuid) -> Self {
        if let Some(short) = uuid.to_ble_u16() {
            CompactUuid::Short16(short)
        } else if let Some(short) = uuid.to_ble_u32() {
            CompactUuid::Short32(short)
        } else {
            CompactUuid::Full(uuid.as_u128())
        }
    }

    fn width(&self) -> usize {
        match self {
            CompactUuid::Short16(_) => 2,
            CompactUuid::Short32(_) => 4,
            CompactUuid::Full(_) => 16,
        }
    }

    fn list_type(&self) -> u8 {
        match self {
            CompactUuid::Short16(_) => ad_type::COMPLETE_16_BIT_UUIDS,
            CompactUuid::Short32(_) => ad_type::COMPLETE_32_BIT_UUIDS,
            CompactUuid::Full(_) => ad_type::COMPLETE_128_BIT_UUIDS,
        }
    }

    fn service_data_type(&self) -> u8 {
        match self {
            CompactUuid::Short16(_) => ad_type::SERVICE_DATA_16_BIT_UUID,
            CompactUuid::Short32(_) => ad_type::SERVICE_DATA_32_BIT_UUID,
            CompactUuid::Full(_) => ad_type::SERVICE_DATA_128_BIT_UUID,
        }
    }

    // Multi-byte values go over the air little-endian.
    fn write_le(&self, out: &mut Vec<u8>) {
        match self {
            CompactUuid::Short16(v) => out.extend_from_slice(&v.to_le_bytes()),
            CompactUuid::Short32(v) => out.extend_from_slice(&v.to_le_bytes()),
            CompactUuid::Full(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
}

/// Bytes of a legacy advertisement spent on everything except the payload:
/// flags, the complete service UUID list and the service-data header.
pub fn advertisement_overhead(service_id: &Uuid) -> usize {
    let width = CompactUuid::of(service_id).width();
    FLAGS_ELEMENT_BYTES + (2 + width) + (2 + width)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconFrame {
    service_id: Uuid,
    payload: Vec<u8>,
}

impl BeaconFrame {
    pub fn service_id(&self) -> Uuid {
        self.service_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Service data as the host advertising APIs want it.
    pub fn service_data(&self) -> HashMap<Uuid, Vec<u8>> {
        HashMap::from([(self.service_id, self.payload.clone())])
    }

    /// The raw AD structures of the advertisement: flags, complete service
    /// UUID list, then the service data element.
    pub fn advertisement_bytes(&self) -> Vec<u8> {
        let uuid = CompactUuid::of(&self.service_id);
        let mut out = Vec::with_capacity(advertisement_overhead(&self.service_id) + self.payload.len());

        out.extend_from_slice(&[2, ad_type::FLAGS, ADVERTISING_FLAGS]);

        out.push((1 + uuid.width()) as u8);
        out.push(uuid.list_type());
        uuid.write_le(&mut out);

        out.push((1 + uuid.width() + self.payload.len()) as u8);
        out.push(uuid.service_data_type());
        uuid.write_le(&mut out);
        out.extend_from_slice(&self.payload);

        out
    }
}

/// Converts between message text and beacon frames for a transport with a
/// given maximum advertisement size.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_advertisement_bytes: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(LEGACY_ADVERTISEMENT_BYTES)
    }
}

impl FrameCodec {
    pub fn new(max_advertisement_bytes: usize) -> Self {
        FrameCodec {
            max_advertisement_bytes,
        }
    }

    /// Largest payload that fits next to `service_id` in one advertisement.
    pub fn capacity(&self, service_id: &Uuid) -> usize {
        let width = CompactUuid::of(service_id).width();
        // The service data element length is a single byte.
        let element_limit = u8::MAX as usize - 1 - width;
        self.max_advertisement_bytes
            .saturating_sub(advertisement_overhead(service_id))
            .min(element_limit)
    }

    pub fn encode(&self, message: &str, service_id: Uuid) -> Result<BeaconFrame, EncodeError> {
        let payload = message.as_bytes().to_vec();
        let capacity = self.capacity(&service_id);
        if payload.len() > capacity {
            return Err(EncodeError::PayloadTooLarge {
                size: payload.len(),
                capacity,
            });
        }
        Ok(BeaconFrame {
            service_id,
            payload,
        })
    }

    /// Invalid UTF-8 from foreign devices decodes with replacement characters.
    pub fn decode(
        service_data: &HashMap<Uuid, Vec<u8>>,
        service_id: &Uuid,
    ) -> Result<String, DecodeError> {
        let bytes = service_data
            .get(service_id)
            .ok_or(DecodeError::ServiceIdNotPresent)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Collects every service-data element of a raw advertisement record.
///
/// A zero length byte ends the record (trailing padding). A structure whose
/// declared length runs past the end of `raw` is malformed.
pub fn parse_service_data(raw: &[u8]) -> Result<HashMap<Uuid, Vec<u8>>, DecodeError> {
    let mut service_data = HashMap::new();
    let mut offset = 0;

    while offset < raw.len() {
        let len = raw[offset] as usize;
        if len == 0 {
            break;
        }
        let end = offset + 1 + len;
        if end > raw.len() {
            return Err(DecodeError::MalformedAdvertisement { offset });
        }
        let kind = raw[offset + 1];
        let data = &raw[offset + 2..end];

        let entry = match kind {
            ad_type::SERVICE_DATA_16_BIT_UUID if data.len() >= 2 => {
                let short = u16::from_le_bytes([data[0], data[1]]);
                Some((uuid_from_u16(short), &data[2..]))
            }
            ad_type::SERVICE_DATA_32_BIT_UUID if data.len() >= 4 => {
                let short = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                Some((uuid_from_u32(short), &data[4..]))
            }
            ad_type::SERVICE_DATA_128_BIT_UUID if data.len() >= 16 => {
                let mut full = [0u8; 16];
                full.copy_from_slice(&data[..16]);
                Some((Uuid::from_u128(u128::from_le_bytes(full)), &data[16..]))
            }
            ad_type::SERVICE_DATA_16_BIT_UUID
            | ad_type::SERVICE_DATA_32_BIT_UUID
            | ad_type::SERVICE_DATA_128_BIT_UUID => {
                return Err(DecodeError::MalformedAdvertisement { offset });
            }
            _ => None,
        };

        if let Some((uuid, payload)) = entry {
            service_data.insert(uuid, payload.to_vec());
        }
        offset = end;
    }

    Ok(service_data)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_service_uuid_is_sig_short_form() {
        assert_eq!(
            SERVICE_UUID.to_string().to_uppercase(),
            "0000FEAA-0000-1000-8000-00805F9B34FB"
        );
        assert_eq!(SERVICE_UUID, uuid_from_u16(0xFEAA));
    }

    #[test]
    fn test_legacy_capacity() {
        let codec = FrameCodec::default();
        assert_eq!(advertisement_overhead(&SERVICE_UUID), 11);
        assert_eq!(codec.capacity(&SERVICE_UUID), 20);

        let custom: Uuid = "123e4567-e89b-12d3-a456-426614174000".parse().unwrap();
        assert_eq!(advertisement_overhead(&custom), 39);
        assert_eq!(codec.capacity(&custom), 0);
    }

    #[test]
    fn test_extended_capacity_is_bounded_by_element_length() {
        let codec = FrameCodec::new(1650);
        assert_eq!(codec.capacity(&SERVICE_UUID), 252);
    }

    #[test]
    fn test_round_trip() {
        let codec = FrameCodec::default();
        for message in ["Sample", "", "twenty bytes exactly"] {
            let frame = codec.encode(message, SERVICE_UUID).unwrap();
            let decoded = FrameCodec::decode(&frame.service_data(), &SERVICE_UUID).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let codec = FrameCodec::default();
        let err = codec
            .encode("twenty-one bytes long", SERVICE_UUID)
            .unwrap_err();
        assert_eq!(
            err,
            EncodeError::PayloadTooLarge {
                size: 21,
                capacity: 20
            }
        );
    }

    #[test]
    fn test_encode_counts_bytes_not_chars() {
        let codec = FrameCodec::new(17);
        // 6 bytes available, "héllo" is 6 bytes in UTF-8.
        assert!(codec.encode("héllo", SERVICE_UUID).is_ok());
        assert!(codec.encode("héllo!", SERVICE_UUID).is_err());
    }

    #[test]
    fn test_decode_missing_service() {
        let data = HashMap::from([(uuid_from_u16(0x180F), vec![0x64])]);
        assert_eq!(
            FrameCodec::decode(&data, &SERVICE_UUID),
            Err(DecodeError::ServiceIdNotPresent)
        );
        assert_eq!(
            FrameCodec::decode(&HashMap::new(), &SERVICE_UUID),
            Err(DecodeError::ServiceIdNotPresent)
        );
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let data = HashMap::from([(SERVICE_UUID, vec![b'o', b'k', 0xFF, 0xFE])]);
        let decoded = FrameCodec::decode(&data, &SERVICE_UUID).unwrap();
        assert_eq!(decoded, "ok\u{FFFD}\u{FFFD}");
    }

    #[test]
    fn test_advertisement_bytes() {
        let frame = FrameCodec::default().encode("Hi", SERVICE_UUID).unwrap();
        assert_eq!(
            frame.advertisement_bytes(),
            vec![
                0x02, 0x01, 0x06, // flags
                0x03, 0x03, 0xAA, 0xFE, // complete 16-bit UUIDs
                0x05, 0x16, 0xAA, 0xFE, b'H', b'i', // service data
            ]
        );
    }

    #[test]
    fn test_full_advertisement_fits_legacy_pdu() {
        let frame = FrameCodec::default()
            .encode("twenty bytes exactly", SERVICE_UUID)
            .unwrap();
        assert_eq!(frame.advertisement_bytes().len(), LEGACY_ADVERTISEMENT_BYTES);
    }

    #[test]
    fn test_parse_own_advertisement() {
        let frame = FrameCodec::default().encode("Sample", SERVICE_UUID).unwrap();
        let parsed = parse_service_data(&frame.advertisement_bytes()).unwrap();
        assert_eq!(parsed, frame.service_data());
    }

    #[test]
    fn test_parse_wider_uuids_and_padding() {
        let custom: Uuid = "123e4567-e89b-12d3-a456-426614174000".parse().unwrap();
        let mut raw = vec![17 + 2, 0x21];
        raw.extend_from_slice(&custom.as_u128().to_le_bytes());
        raw.extend_from_slice(&[0xAB, 0xCD]);
        raw.extend_from_slice(&[0x07, 0x20, 0x78, 0x56, 0x34, 0x12, 0x01, 0x02]);
        raw.extend_from_slice(&[0x00, 0x00, 0x00]);

        let parsed = parse_service_data(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&custom], vec![0xAB, 0xCD]);
        assert_eq!(parsed[&uuid_from_u32(0x1234_5678)], vec![0x01, 0x02]);
    }

    #[test]
    fn test_parse_truncated_record() {
        let raw = [0x02, 0x01, 0x06, 0x09, 0x16, 0xAA, 0xFE, b'x'];
        assert_eq!(
            parse_service_data(&raw),
            Err(DecodeError::MalformedAdvertisement { offset: 3 })
        );

        let short_uuid = [0x02, 0x16, 0xAA];
        assert_eq!(
            parse_service_data(&short_uuid),
            Err(DecodeError::MalformedAdvertisement { offset: 0 })
        );
    }

    // Longest prefix of `text` that is at most `max` bytes of whole characters.
    fn prefix(text: &str, max: usize) -> &str {
        let mut end = max.min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }

    fn any_service_id() -> impl Strategy<Value = Uuid> {
        prop_oneof![
            Just(SERVICE_UUID),
            any::<u16>().prop_map(uuid_from_u16),
            any::<u128>().prop_map(Uuid::from_u128),
        ]
    }

    proptest! {
        #[test]
        fn test_every_message_that_fits_round_trips(
            text in any::<String>(),
            service_id in any_service_id(),
            max_advertisement_bytes in LEGACY_ADVERTISEMENT_BYTES..=300,
        ) {
            let codec = FrameCodec::new(max_advertisement_bytes);
            let message = prefix(&text, codec.capacity(&service_id));

            let frame = codec.encode(message, service_id).unwrap();
            prop_assert_eq!(
                FrameCodec::decode(&frame.service_data(), &service_id).unwrap(),
                message
            );

            let raw = frame.advertisement_bytes();
            if advertisement_overhead(&service_id) <= max_advertisement_bytes {
                prop_assert!(raw.len() <= max_advertisement_bytes);
            }
            let heard = parse_service_data(&raw).unwrap();
            prop_assert_eq!(heard.get(&service_id), Some(&message.as_bytes().to_vec()));
        }

        #[test]
        fn test_every_oversized_message_is_rejected(
            head in "\\PC{0,30}",
            extra in 1usize..40,
        ) {
            let codec = FrameCodec::default();
            let capacity = codec.capacity(&SERVICE_UUID);
            let padding = (capacity + extra).saturating_sub(head.len());
            let message = format!("{}{}", head, "x".repeat(padding));

            prop_assert_eq!(
                codec.encode(&message, SERVICE_UUID).err(),
                Some(EncodeError::PayloadTooLarge {
                    size: message.len(),
                    capacity,
                })
            );
        }

        #[test]
        fn test_parsing_arbitrary_bytes_never_panics(
            raw in prop::collection::vec(any::<u8>(), 0..80),
        ) {
            if let Ok(service_data) = parse_service_data(&raw) {
                for payload in service_data.values() {
                    prop_assert!(payload.len() < raw.len());
                }
            }
        }
    }
}

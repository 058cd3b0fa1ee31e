//! Command-mode encoders/decoders: ping, status, history retrieval, bolus
//! delivery, and date/time ([spec] §3, §4.8).

use num_enum::{IntoPrimitive, TryFromPrimitive};
use time::PrimitiveDateTime;

use combo_crypto::crc16_mcrf4xx;

use crate::application::packet::{AppCommand, ApplicationPacket};
use crate::application::timestamp::{decode_packed, encode_packed};
use crate::error::{Error, Result};

const HISTORY_EVENT_LEN: usize = 18;

/// `CMD_GET_BOLUS_STATUS_RESPONSE` / `CMD_DELIVER_BOLUS`'s bolus type byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BolusType {
    Standard = 0x47,
    MultiWave = 0xB7,
}

/// `CMD_GET_BOLUS_STATUS_RESPONSE`'s delivery-state byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BolusDeliveryState {
    NotDelivering = 0x55,
    Delivering = 0x66,
    Delivered = 0x99,
    CancelledByUser = 0xA9,
    AbortedDueToError = 0xAA,
}

/// Decoded `CMD_GET_BOLUS_STATUS_RESPONSE` ([spec] §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BolusDeliveryStatus {
    pub bolus_type: BolusType,
    pub delivery_state: BolusDeliveryState,
    pub remaining_amount_tenths_iu: u16,
}

/// Builds a `CMD_PING` request (no payload).
#[must_use]
pub fn create_ping() -> ApplicationPacket {
    ApplicationPacket {
        command: AppCommand::CmdPing,
        payload: Vec::new(),
    }
}

/// Builds a `CMD_READ_PUMP_STATUS` request (no payload).
#[must_use]
pub fn create_read_pump_status() -> ApplicationPacket {
    ApplicationPacket {
        command: AppCommand::CmdReadPumpStatus,
        payload: Vec::new(),
    }
}

/// Builds a `CMD_READ_DATE_TIME` request (no payload).
#[must_use]
pub fn create_read_date_time() -> ApplicationPacket {
    ApplicationPacket {
        command: AppCommand::CmdReadDateTime,
        payload: Vec::new(),
    }
}

/// Decodes `CMD_READ_DATE_TIME_RESPONSE`: 12 bytes, error(2) at [0..2),
/// year at [2..4), month at 4, day at 5, hour at 6, minute at 7,
/// second at 8, remaining bytes reserved.
pub fn decode_date_time_response(payload: &[u8]) -> Result<PrimitiveDateTime> {
    if payload.len() < 9 {
        return Err(Error::InvalidPayload {
            reason: format!("CMD_READ_DATE_TIME_RESPONSE too short: {} bytes", payload.len()),
        });
    }
    let year = 2000 + u16::from_le_bytes([payload[2], payload[3]]) as i32;
    let month = payload[4];
    let day = payload[5];
    let hour = payload[6];
    let minute = payload[7];
    let second = payload[8];
    let month = time::Month::try_from(month).map_err(|_| Error::PayloadDataCorruption {
        reason: format!("invalid month {month} in CMD_READ_DATE_TIME_RESPONSE"),
    })?;
    let date = time::Date::from_calendar_date(year, month, day).map_err(|_| {
        Error::PayloadDataCorruption {
            reason: format!("invalid date {year}-{month:?}-{day} in CMD_READ_DATE_TIME_RESPONSE"),
        }
    })?;
    let time = time::Time::from_hms(hour, minute, second).map_err(|_| {
        Error::PayloadDataCorruption {
            reason: format!("invalid time {hour}:{minute}:{second} in CMD_READ_DATE_TIME_RESPONSE"),
        }
    })?;
    Ok(PrimitiveDateTime::new(date, time))
}

/// Builds a `CMD_DELIVER_BOLUS` request for a standard bolus of
/// `amount_tenths_iu` tenths of an IU ([spec] §4.8, §8 scenario 6).
#[must_use]
pub fn create_deliver_bolus(amount_tenths_iu: u16) -> ApplicationPacket {
    let mut p = Vec::with_capacity(22);
    p.push(0x55);
    p.push(0x59);
    p.extend_from_slice(&amount_tenths_iu.to_le_bytes());
    p.extend_from_slice(&[0u8; 6]);
    p.extend_from_slice(&(f32::from(amount_tenths_iu)).to_le_bytes());
    p.extend_from_slice(&[0u8; 6]);
    let crc = crc16_mcrf4xx(&p);
    p.extend_from_slice(&crc.to_le_bytes());
    ApplicationPacket {
        command: AppCommand::CmdBolus,
        payload: p,
    }
}

/// Builds a `CMD_CANCEL_BOLUS` request for `bolus_type`.
#[must_use]
pub fn create_cancel_bolus(bolus_type: BolusType) -> ApplicationPacket {
    ApplicationPacket {
        command: AppCommand::CmdBolus,
        payload: vec![bolus_type.into()],
    }
}

/// Whether a `CMD_CANCEL_BOLUS` response (payload byte 2 == 0x48) reports success.
#[must_use]
pub fn cancel_bolus_succeeded(payload: &[u8]) -> bool {
    payload.get(2) == Some(&0x48)
}

/// Decodes `CMD_GET_BOLUS_STATUS_RESPONSE`: 8 bytes, byte 2 = bolus type,
/// byte 3 = delivery state, bytes 4..6 = remaining amount LE u16.
pub fn decode_bolus_status(payload: &[u8]) -> Result<BolusDeliveryStatus> {
    if payload.len() < 6 {
        return Err(Error::PayloadDataCorruption {
            reason: format!("bolus status payload too short: {} bytes", payload.len()),
        });
    }
    let bolus_type = BolusType::try_from(payload[2]).map_err(|_| Error::PayloadDataCorruption {
        reason: format!("unknown bolus type {:#04x}", payload[2]),
    })?;
    let delivery_state =
        BolusDeliveryState::try_from(payload[3]).map_err(|_| Error::PayloadDataCorruption {
            reason: format!("unknown delivery state {:#04x}", payload[3]),
        })?;
    let remaining_amount_tenths_iu = u16::from_le_bytes([payload[4], payload[5]]);
    Ok(BolusDeliveryStatus {
        bolus_type,
        delivery_state,
        remaining_amount_tenths_iu,
    })
}

/// One history event detail, tagged by the wire `event_type_id` ([spec] §3, §4.8).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HistoryEventDetail {
    QuickBolusRequested { amount_tenths_iu: u16 },
    QuickBolusInfused { amount_tenths_iu: u16 },
    StandardBolus {
        amount_tenths_iu: u16,
        requested: bool,
        manual: bool,
    },
    ExtendedBolusStarted {
        total_amount_tenths_iu: u16,
        duration_min: u16,
    },
    ExtendedBolusEnded {
        total_amount_tenths_iu: u16,
        duration_min: u16,
    },
    MultiwaveBolusStarted {
        total_amount_tenths_iu: u16,
        immediate_amount_tenths_iu: u16,
        duration_min: u16,
    },
    MultiwaveBolusEnded {
        total_amount_tenths_iu: u16,
        immediate_amount_tenths_iu: u16,
        duration_min: u16,
    },
    NewDateTimeSet(PrimitiveDateTime),
}

/// One decoded history event ([spec] §3).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistoryEvent {
    pub timestamp: PrimitiveDateTime,
    pub event_counter: u32,
    pub detail: HistoryEventDetail,
}

/// A batch of history events retrieved with `CMD_READ_HISTORY_BLOCK`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryBlock {
    pub num_remaining_events: u16,
    pub more_events_available: bool,
    pub history_gap: bool,
    pub events: Vec<HistoryEvent>,
}

/// Decodes one 18-byte history event record, or `None` if `event_type_id`
/// is not recognized (unknown IDs are skipped, not errors, [spec] §4.8).
fn decode_event(raw: &[u8; HISTORY_EVENT_LEN]) -> Result<Option<HistoryEvent>> {
    let detail_crc = u16::from_le_bytes([raw[10], raw[11]]);
    if crc16_mcrf4xx(&raw[0..10]) != detail_crc {
        return Err(Error::PayloadDataCorruption {
            reason: "history event detail CRC mismatch".into(),
        });
    }
    let counter_crc = u16::from_le_bytes([raw[16], raw[17]]);
    if crc16_mcrf4xx(&raw[12..16]) != counter_crc {
        return Err(Error::PayloadDataCorruption {
            reason: "history event counter CRC mismatch".into(),
        });
    }

    let timestamp = decode_packed(raw[0..4].try_into().expect("4 bytes"))?;
    let detail_bytes: [u8; 4] = raw[4..8].try_into().expect("4 bytes");
    let event_type_id = u16::from_le_bytes([raw[8], raw[9]]);
    let event_counter = u32::from_le_bytes(raw[12..16].try_into().expect("4 bytes"));

    let amount = || u16::from_le_bytes([detail_bytes[0], detail_bytes[1]]);
    let amount2 = || u16::from_le_bytes([detail_bytes[2], detail_bytes[3]]);

    let detail = match event_type_id {
        4 => HistoryEventDetail::QuickBolusRequested {
            amount_tenths_iu: amount(),
        },
        5 => HistoryEventDetail::QuickBolusInfused {
            amount_tenths_iu: amount(),
        },
        6 | 7 | 14 | 15 => HistoryEventDetail::StandardBolus {
            amount_tenths_iu: amount(),
            requested: matches!(event_type_id, 6 | 14),
            manual: matches!(event_type_id, 6 | 7),
        },
        8 => HistoryEventDetail::ExtendedBolusStarted {
            total_amount_tenths_iu: amount(),
            duration_min: amount2(),
        },
        9 => HistoryEventDetail::ExtendedBolusEnded {
            total_amount_tenths_iu: amount(),
            duration_min: amount2(),
        },
        // The wire record has no room for three independent u16 fields;
        // immediate_amount is not separately recoverable from this 4-byte
        // detail region, so it is reported equal to the total amount
        // (see DESIGN.md's Open Question decision for MultiwaveBolus).
        10 => HistoryEventDetail::MultiwaveBolusStarted {
            total_amount_tenths_iu: amount(),
            immediate_amount_tenths_iu: amount(),
            duration_min: amount2(),
        },
        11 => HistoryEventDetail::MultiwaveBolusEnded {
            total_amount_tenths_iu: amount(),
            immediate_amount_tenths_iu: amount(),
            duration_min: amount2(),
        },
        24 => HistoryEventDetail::NewDateTimeSet(decode_packed(detail_bytes)?),
        _ => return Ok(None),
    };

    Ok(Some(HistoryEvent {
        timestamp,
        event_counter,
        detail,
    }))
}

/// Decodes a `CMD_READ_HISTORY_BLOCK_RESPONSE` payload ([spec] §4.8).
pub fn decode_history_block(payload: &[u8]) -> Result<HistoryBlock> {
    if payload.len() < 7 {
        return Err(Error::PayloadDataCorruption {
            reason: format!("history block payload too short: {} bytes", payload.len()),
        });
    }
    let num_remaining_events = u16::from_le_bytes([payload[2], payload[3]]);
    let more_events_available = payload[4] != 0;
    let history_gap = payload[5] != 0;
    let num_events = payload[6] as usize;
    let expected_len = 7 + HISTORY_EVENT_LEN * num_events;
    if payload.len() != expected_len {
        return Err(Error::PayloadDataCorruption {
            reason: format!(
                "history block declares {num_events} events but payload is {} bytes (expected {expected_len})",
                payload.len()
            ),
        });
    }

    let mut events = Vec::with_capacity(num_events);
    for i in 0..num_events {
        let start = 7 + i * HISTORY_EVENT_LEN;
        let raw: [u8; HISTORY_EVENT_LEN] = payload[start..start + HISTORY_EVENT_LEN]
            .try_into()
            .expect("18-byte event record");
        match decode_event(&raw) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(Error::PayloadDataCorruption { reason }) => {
                return Err(Error::PayloadDataCorruption {
                    reason: format!("event index {i}: {reason}"),
                })
            }
            Err(e) => return Err(e),
        }
    }

    Ok(HistoryBlock {
        num_remaining_events,
        more_events_available,
        history_gap,
        events,
    })
}

/// Builds a `CMD_CONFIRM_HISTORY_BLOCK` request.
#[must_use]
pub fn create_confirm_history_block() -> ApplicationPacket {
    ApplicationPacket {
        command: AppCommand::CmdConfirmHistoryBlock,
        payload: vec![1],
    }
}

/// Builds a `CMD_READ_HISTORY_BLOCK` request.
#[must_use]
pub fn create_read_history_block() -> ApplicationPacket {
    ApplicationPacket {
        command: AppCommand::CmdReadHistoryBlock,
        payload: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn encode_event(event_type_id: u16, timestamp: PrimitiveDateTime, detail: [u8; 4], counter: u32) -> Vec<u8> {
        let mut b = Vec::with_capacity(HISTORY_EVENT_LEN);
        b.extend_from_slice(&encode_packed(timestamp).unwrap());
        b.extend_from_slice(&detail);
        b.extend_from_slice(&event_type_id.to_le_bytes());
        let detail_crc = crc16_mcrf4xx(&b[0..10]);
        b.extend_from_slice(&detail_crc.to_le_bytes());
        b.extend_from_slice(&counter.to_le_bytes());
        let counter_crc = crc16_mcrf4xx(&b[12..16]);
        b.extend_from_slice(&counter_crc.to_le_bytes());
        assert_eq!(b.len(), HISTORY_EVENT_LEN);
        b
    }

    #[test]
    fn deliver_bolus_encoding_matches_known_vector() {
        let app = create_deliver_bolus(57);
        let p = &app.payload;
        assert_eq!(p.len(), 22);
        assert_eq!(&p[0..6], &[0x55, 0x59, 0x39, 0x00, 0x00, 0x00]);
        assert_eq!(&p[6..10], &[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&p[10..14], &[0x00, 0x00, 0x64, 0x42]);
        let crc = crc16_mcrf4xx(&p[0..20]);
        assert_eq!(&p[20..22], &crc.to_le_bytes());
    }

    #[test]
    fn decodes_history_block_with_quick_bolus_and_date_time_set() {
        let t1 = datetime!(2020-03-11 11:55:23);
        let t2 = datetime!(2020-03-11 11:55:23);
        let mut payload = vec![0u8, 0, 2, 0, 0, 0, 2];
        payload.extend(encode_event(5, t1, [37, 0, 0, 0], 100));
        payload.extend(encode_event(24, t2, encode_packed(t2).unwrap(), 101));

        let block = decode_history_block(&payload).unwrap();
        assert!(!block.more_events_available);
        assert!(!block.history_gap);
        assert_eq!(block.events.len(), 2);
        assert_eq!(
            block.events[0].detail,
            HistoryEventDetail::QuickBolusInfused {
                amount_tenths_iu: 37
            }
        );
        assert_eq!(
            block.events[1].detail,
            HistoryEventDetail::NewDateTimeSet(t2)
        );
    }

    #[test]
    fn corrupted_detail_crc_is_reported_with_event_index() {
        let t1 = datetime!(2020-03-11 11:55:23);
        let mut payload = vec![0u8, 0, 1, 0, 0, 0, 1];
        let mut event = encode_event(5, t1, [37, 0, 0, 0], 100);
        event[4] ^= 0xFF; // corrupt detail region without updating its CRC
        payload.extend(event);
        match decode_history_block(&payload) {
            Err(Error::PayloadDataCorruption { reason }) => {
                assert!(reason.contains("index 0"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_skipped() {
        let t1 = datetime!(2020-03-11 11:55:23);
        let mut payload = vec![0u8, 0, 1, 0, 0, 0, 1];
        payload.extend(encode_event(255, t1, [0, 0, 0, 0], 1));
        let block = decode_history_block(&payload).unwrap();
        assert!(block.events.is_empty());
    }

    #[test]
    fn num_events_mismatch_is_rejected() {
        let mut payload = vec![0u8, 0, 0, 0, 0, 0, 2];
        payload.extend(encode_event(5, datetime!(2020-01-01 00:00:00), [1, 0, 0, 0], 1));
        assert!(decode_history_block(&payload).is_err());
    }

    #[test]
    fn bolus_status_decode() {
        let payload = vec![0, 0, 0x47, 0x66, 0x0A, 0x00];
        let status = decode_bolus_status(&payload).unwrap();
        assert_eq!(status.bolus_type, BolusType::Standard);
        assert_eq!(status.delivery_state, BolusDeliveryState::Delivering);
        assert_eq!(status.remaining_amount_tenths_iu, 10);
    }

    #[test]
    fn cancel_bolus_success_marker() {
        assert!(cancel_bolus_succeeded(&[0, 0, 0x48]));
        assert!(!cancel_bolus_succeeded(&[0, 0, 0x00]));
    }

    #[test]
    fn read_date_time_response_decode() {
        let mut payload = vec![0u8, 0]; // error code
        payload.push(20); // year offset from 2000
        payload.push(0); // unused byte matching the 2-byte LE year field
        payload.push(3); // month
        payload.push(11); // day
        payload.push(11); // hour
        payload.push(55); // minute
        payload.push(23); // second
        let dt = decode_date_time_response(&payload).unwrap();
        assert_eq!(dt, datetime!(2020-03-11 11:55:23));
    }
}

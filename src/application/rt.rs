//! Remote-terminal mode encoders/decoders: button events, screen rows,
//! and audio/vibration feedback ([spec] §4.9).

use crate::application::packet::{AppCommand, ApplicationPacket};
use crate::error::{Error, Result};

const DISPLAY_PAYLOAD_LEN: usize = 101;

/// Whether `RT_BUTTON_STATUS` reports a change since the previous report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RtButtonChange {
    Unchanged,
    Changed,
}

/// A decoded `RT_BUTTON_STATUS` event. `buttons` is the pump's raw button
/// byte; its bit assignment is not documented in the source material, so it
/// is surfaced unopinionated rather than split into named flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RtButtonStatus {
    pub rt_sequence: u16,
    pub buttons: u8,
    pub changed: RtButtonChange,
}

/// Decodes `RT_BUTTON_STATUS`: `rt_seq(2) buttons(1) changed_flag(1)`.
pub fn decode_button_status(payload: &[u8]) -> Result<RtButtonStatus> {
    if payload.len() != 4 {
        return Err(Error::InvalidPayload {
            reason: format!("RT_BUTTON_STATUS expected 4 bytes, got {}", payload.len()),
        });
    }
    let rt_sequence = u16::from_le_bytes([payload[0], payload[1]]);
    let buttons = payload[2];
    let changed = match payload[3] {
        0xB7 => RtButtonChange::Changed,
        0x48 => RtButtonChange::Unchanged,
        other => {
            return Err(Error::InvalidPayload {
                reason: format!("unknown RT_BUTTON_STATUS changed flag {other:#04x}"),
            })
        }
    };
    Ok(RtButtonStatus {
        rt_sequence,
        buttons,
        changed,
    })
}

/// Builds `RT_BUTTON_CONFIRMATION`, echoing the buttons acted on. The
/// leading RT-sequence placeholder is overwritten by
/// [`crate::application::session`] before the packet is sent.
#[must_use]
pub fn create_button_confirmation(buttons: u8) -> ApplicationPacket {
    ApplicationPacket {
        command: AppCommand::RtButtonConfirmation,
        payload: vec![0, 0, buttons],
    }
}

/// Builds `RT_KEEP_ALIVE`, sent periodically to hold RT mode open.
#[must_use]
pub fn create_keep_alive() -> ApplicationPacket {
    ApplicationPacket {
        command: AppCommand::RtKeepAlive,
        payload: vec![0, 0],
    }
}

/// Who triggered an `RT_DISPLAY` update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RtDisplayReason {
    UpdatedByPump,
    UpdatedByClient,
}

/// A decoded `RT_DISPLAY` screen row.
#[derive(Clone, Debug, PartialEq)]
pub struct RtDisplayUpdate {
    pub rt_sequence: u16,
    pub reason: RtDisplayReason,
    pub index: u8,
    pub row: u8,
    pub pixels: [u8; 96],
}

fn decode_row_code(code: u8) -> Result<u8> {
    match code {
        0x47 => Ok(0),
        0x48 => Ok(1),
        0xB7 => Ok(2),
        0xB8 => Ok(3),
        other => Err(Error::InvalidPayload {
            reason: format!("unknown RT_DISPLAY row code {other:#04x}"),
        }),
    }
}

/// Decodes `RT_DISPLAY`: `rt_seq(2) reason(1) index(1) row(1) pixels(96)`.
pub fn decode_display(payload: &[u8]) -> Result<RtDisplayUpdate> {
    if payload.len() != DISPLAY_PAYLOAD_LEN {
        return Err(Error::InvalidPayload {
            reason: format!(
                "RT_DISPLAY expected {DISPLAY_PAYLOAD_LEN} bytes, got {}",
                payload.len()
            ),
        });
    }
    let rt_sequence = u16::from_le_bytes([payload[0], payload[1]]);
    let reason = match payload[2] {
        0x48 => RtDisplayReason::UpdatedByPump,
        0xB7 => RtDisplayReason::UpdatedByClient,
        other => {
            return Err(Error::InvalidPayload {
                reason: format!("unknown RT_DISPLAY reason {other:#04x}"),
            })
        }
    };
    let index = payload[3];
    let row = decode_row_code(payload[4])?;
    let pixels: [u8; 96] = payload[5..DISPLAY_PAYLOAD_LEN].try_into().expect("96 bytes");
    Ok(RtDisplayUpdate {
        rt_sequence,
        reason,
        index,
        row,
        pixels,
    })
}

fn decode_sequence_identifier(payload: &[u8], what: &str) -> Result<u32> {
    if payload.len() != 6 {
        return Err(Error::InvalidPayload {
            reason: format!("{what} expected 6 bytes, got {}", payload.len()),
        });
    }
    Ok(u32::from_le_bytes(payload[2..6].try_into().expect("4 bytes")))
}

/// Decodes `RT_AUDIO`'s little-endian u32 sequence identifier at bytes [2..6).
pub fn decode_audio(payload: &[u8]) -> Result<u32> {
    decode_sequence_identifier(payload, "RT_AUDIO")
}

/// Decodes `RT_VIBRATION`'s little-endian u32 sequence identifier at bytes [2..6).
pub fn decode_vibration(payload: &[u8]) -> Result<u32> {
    decode_sequence_identifier(payload, "RT_VIBRATION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_button_status_changed() {
        let status = decode_button_status(&[0x01, 0x00, 0x0F, 0xB7]).unwrap();
        assert_eq!(status.rt_sequence, 1);
        assert_eq!(status.buttons, 0x0F);
        assert_eq!(status.changed, RtButtonChange::Changed);
    }

    #[test]
    fn decodes_button_status_unchanged() {
        let status = decode_button_status(&[0, 0, 0, 0x48]).unwrap();
        assert_eq!(status.changed, RtButtonChange::Unchanged);
    }

    #[test]
    fn rejects_unknown_changed_flag() {
        assert!(decode_button_status(&[0, 0, 0, 0x00]).is_err());
    }

    #[test]
    fn button_confirmation_carries_placeholder_sequence() {
        let app = create_button_confirmation(0x09);
        assert_eq!(app.command, AppCommand::RtButtonConfirmation);
        assert_eq!(app.payload, vec![0, 0, 0x09]);
    }

    #[test]
    fn decodes_display_update() {
        let mut payload = vec![0x02, 0x00, 0x48, 0x03, 0xB7];
        payload.extend(vec![0xAA; 96]);
        let row = decode_display(&payload).unwrap();
        assert_eq!(row.rt_sequence, 2);
        assert_eq!(row.reason, RtDisplayReason::UpdatedByPump);
        assert_eq!(row.index, 3);
        assert_eq!(row.row, 2);
        assert_eq!(row.pixels, [0xAA; 96]);
    }

    #[test]
    fn rejects_short_display_payload() {
        assert!(decode_display(&[0, 0, 0x48, 0, 0x47]).is_err());
    }

    #[test]
    fn rejects_unknown_row_code() {
        let mut payload = vec![0, 0, 0x48, 0, 0x00];
        payload.extend(vec![0; 96]);
        assert!(decode_display(&payload).is_err());
    }

    #[test]
    fn decodes_audio_and_vibration_sequence_identifiers() {
        let payload = [0, 0, 0x2A, 0x00, 0x00, 0x00];
        assert_eq!(decode_audio(&payload).unwrap(), 42);
        assert_eq!(decode_vibration(&payload).unwrap(), 42);
    }

    #[test]
    fn keep_alive_has_placeholder_sequence_only() {
        assert_eq!(create_keep_alive().payload, vec![0, 0]);
    }
}

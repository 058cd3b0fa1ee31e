//! Bit-packed date/time layout shared by history events and
//! `CMD_READ_DATE_TIME_RESPONSE` ([spec] §4.8).

use time::{Date, Month, PrimitiveDateTime, Time};

use crate::error::{Error, Result};

fn bits(byte: u8, start: u8, len: u8) -> u32 {
    u32::from((byte >> start) & ((1u8 << len) - 1))
}

/// Decodes the 4-byte bit-packed timestamp used by history events and
/// `NewDateTimeSet`.
pub fn decode_packed(b: [u8; 4]) -> Result<PrimitiveDateTime> {
    let seconds = bits(b[0], 0, 6);
    let minutes = bits(b[0], 6, 2) | (bits(b[1], 0, 4) << 2);
    let hours = bits(b[1], 4, 4) | (bits(b[2], 0, 1) << 4);
    let days = bits(b[2], 1, 5);
    let months = bits(b[2], 6, 2) | (bits(b[3], 0, 2) << 2);
    let years = 2000 + bits(b[3], 2, 6);

    let month = Month::try_from(months as u8).map_err(|_| Error::PayloadDataCorruption {
        reason: format!("invalid month {months} in packed timestamp"),
    })?;
    let date = Date::from_calendar_date(years as i32, month, days as u8).map_err(|_| {
        Error::PayloadDataCorruption {
            reason: format!("invalid date {years}-{months}-{days} in packed timestamp"),
        }
    })?;
    let time = Time::from_hms(hours as u8, minutes as u8, seconds as u8).map_err(|_| {
        Error::PayloadDataCorruption {
            reason: format!("invalid time {hours}:{minutes}:{seconds} in packed timestamp"),
        }
    })?;
    Ok(PrimitiveDateTime::new(date, time))
}

/// Encodes `dt` into the 4-byte bit-packed layout. `dt.year()` must be in
/// `[2000, 2063]`.
pub fn encode_packed(dt: PrimitiveDateTime) -> Result<[u8; 4]> {
    let year = dt.year();
    if !(2000..=2063).contains(&year) {
        return Err(Error::InvalidPayload {
            reason: format!("year {year} out of packable range [2000, 2063]"),
        });
    }
    let years = (year - 2000) as u32;
    let months = u32::from(u8::from(dt.month()));
    let days = u32::from(dt.day());
    let hours = u32::from(dt.hour());
    let minutes = u32::from(dt.minute());
    let seconds = u32::from(dt.second());

    let mut b = [0u8; 4];
    b[0] = (seconds & 0x3F) as u8 | (((minutes & 0x03) as u8) << 6);
    b[1] = ((minutes >> 2) & 0x0F) as u8 | (((hours & 0x0F) as u8) << 4);
    b[2] = ((hours >> 4) & 0x01) as u8 | (((days & 0x1F) as u8) << 1) | (((months & 0x03) as u8) << 6);
    b[3] = ((months >> 2) & 0x03) as u8 | (((years & 0x3F) as u8) << 2);
    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn round_trips_representative_timestamp() {
        let dt = datetime!(2020-03-11 11:55:23);
        let packed = encode_packed(dt).unwrap();
        let decoded = decode_packed(packed).unwrap();
        assert_eq!(decoded, dt);
    }

    #[test]
    fn round_trips_boundary_values() {
        for (y, mo, d, h, mi, s) in [
            (2000, 1, 1, 0, 0, 0),
            (2063, 12, 31, 23, 59, 59),
            (2045, 6, 15, 12, 30, 45),
        ] {
            let dt = PrimitiveDateTime::new(
                Date::from_calendar_date(y, Month::try_from(mo).unwrap(), d).unwrap(),
                Time::from_hms(h, mi, s).unwrap(),
            );
            let packed = encode_packed(dt).unwrap();
            assert_eq!(decode_packed(packed).unwrap(), dt);
        }
    }

    #[test]
    fn rejects_year_outside_packable_range() {
        let dt = datetime!(2064-01-01 00:00:00);
        assert!(encode_packed(dt).is_err());
    }
}

//! Google polyline5 codec, the compact geometry format OSRM returns by
//! default (five decimal places, delta-encoded, zigzag-signed).

use crate::geo::Coordinate;

/// Decoding failure. Encoded input comes off the wire, so corrupt strings
/// must surface as errors rather than panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolylineError {
    /// A byte outside the `?`..`~` encoding alphabet.
    InvalidCharacter { index: usize, byte: u8 },
    /// Input ended in the middle of a varint chunk sequence.
    UnterminatedChunk,
    /// Decoded value does not form a valid WGS84 coordinate.
    OutOfRange,
}

impl std::fmt::Display for PolylineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolylineError::InvalidCharacter { index, byte } => {
                write!(f, "invalid polyline byte 0x{byte:02x} at offset {index}")
            }
            PolylineError::UnterminatedChunk => write!(f, "polyline ends mid-chunk"),
            PolylineError::OutOfRange => write!(f, "polyline coordinate out of range"),
        }
    }
}

impl std::error::Error for PolylineError {}

/// Decode a polyline5 string into coordinates.
pub fn decode(encoded: &str) -> Result<Vec<Coordinate>, PolylineError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while index < bytes.len() {
        let (dlat, next) = decode_value(bytes, index)?;
        let (dlng, next) = decode_value(bytes, next)?;
        lat += dlat;
        lng += dlng;
        index = next;

        let point = Coordinate::new(lat as f64 / 1e5, lng as f64 / 1e5)
            .map_err(|_| PolylineError::OutOfRange)?;
        points.push(point);
    }

    Ok(points)
}

/// Encode coordinates into a polyline5 string.
pub fn encode(points: &[Coordinate]) -> String {
    let mut out = String::new();
    let mut prev_lat: i64 = 0;
    let mut prev_lng: i64 = 0;
    for point in points {
        let lat = scale(point.latitude);
        let lng = scale(point.longitude);
        encode_value(lat - prev_lat, &mut out);
        encode_value(lng - prev_lng, &mut out);
        prev_lat = lat;
        prev_lng = lng;
    }
    out
}

fn decode_value(bytes: &[u8], mut index: usize) -> Result<(i64, usize), PolylineError> {
    let mut result: i64 = 0;
    let mut shift = 0;
    loop {
        let Some(&raw) = bytes.get(index) else {
            return Err(PolylineError::UnterminatedChunk);
        };
        if !(63..127).contains(&raw) {
            return Err(PolylineError::InvalidCharacter { index, byte: raw });
        }
        let chunk = i64::from(raw - 63);
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        index += 1;
        if chunk < 0x20 {
            break;
        }
        // 7 chunks cover any coordinate delta; more means corrupt input
        if shift > 35 {
            return Err(PolylineError::OutOfRange);
        }
    }
    // zigzag: the low bit carries the sign
    let value = if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    };
    Ok((value, index))
}

fn scale(degrees: f64) -> i64 {
    (degrees * 1e5).round() as i64
}

fn encode_value(value: i64, out: &mut String) {
    let mut zigzag = (value << 1) ^ (value >> 63);
    loop {
        let mut chunk = (zigzag & 0x1f) as u8;
        zigzag >>= 5;
        if zigzag != 0 {
            chunk |= 0x20;
        }
        out.push(char::from(chunk + 63));
        if zigzag == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The worked example from Google's encoded-polyline format reference.
    const REFERENCE: &str = "_p~iF~ps|U_ulLnnqC_mqNvxq`@";

    #[test]
    fn decodes_the_reference_polyline() {
        let points = decode(REFERENCE).expect("reference decodes");
        let expected = [(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];

        assert_eq!(points.len(), expected.len());
        for (point, (lat, lng)) in points.iter().zip(expected) {
            assert!((point.latitude - lat).abs() < 1e-9, "lat {}", point.latitude);
            assert!(
                (point.longitude - lng).abs() < 1e-9,
                "lng {}",
                point.longitude
            );
        }
    }

    #[test]
    fn encode_round_trips_the_reference() {
        let points = decode(REFERENCE).expect("reference decodes");
        assert_eq!(encode(&points), REFERENCE);
    }

    #[test]
    fn empty_input_is_an_empty_route() {
        assert_eq!(decode("").expect("empty ok"), Vec::new());
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        // strip the final byte so the last longitude chunk never terminates
        let truncated = &REFERENCE[..REFERENCE.len() - 1];
        assert!(matches!(
            decode(truncated),
            Err(PolylineError::UnterminatedChunk)
        ));
    }

    #[test]
    fn bytes_outside_the_alphabet_are_rejected() {
        assert!(matches!(
            decode("_p~iF~ps|U\n"),
            Err(PolylineError::InvalidCharacter { .. })
        ));
    }

    #[test]
    fn single_point_round_trip() {
        let point = Coordinate::new(13.6929, -89.2182).expect("valid");
        let decoded = decode(&encode(&[point])).expect("round trip");
        assert_eq!(decoded.len(), 1);
        assert!((decoded[0].latitude - 13.6929).abs() < 1e-9);
        assert!((decoded[0].longitude + 89.2182).abs() < 1e-9);
    }
}

//! TPDU wire format: TPKT framing and COTP header encoding/parsing.
//!
//! All integers are big-endian. Frame layouts follow RFC 1006 and
//! ISO 8073 §13; only the class 0 subset (CR, CC, DT, DR, ER) exists here.

use crate::core::constants::*;
use crate::core::{TransportError, TransportResult};

/// Maximum TPDU size for a size parameter (exponent) in `[7, 16]`.
///
/// Equal to `2^param`, except that param 16 maps to 65531 (the RFC 1006
/// ceiling) instead of 65536.
pub fn max_tpdu_size(param: u8) -> usize {
    debug_assert!((MIN_TPDU_SIZE_PARAM..=MAX_TPDU_SIZE_PARAM).contains(&param));
    if param == MAX_TPDU_SIZE_PARAM {
        MAX_TPDU_SIZE_16
    } else {
        1usize << param
    }
}

/// Check that a configured transport selector fits the wire format.
///
/// The parameter length octet and the ISO 8073 cap both bound selectors
/// at well under 256 octets, so an oversized one can never be encoded.
pub(crate) fn validate_tsel(tsel: &Option<Vec<u8>>) -> TransportResult<()> {
    match tsel {
        Some(tsel) if tsel.len() > MAX_TSEL_LENGTH => Err(TransportError::Config(format!(
            "transport selector of {} octets exceeds the {MAX_TSEL_LENGTH}-octet cap",
            tsel.len()
        ))),
        _ => Ok(()),
    }
}

/// Validate a TPKT header and return the total packet length it announces.
pub fn parse_tpkt_header(header: [u8; TPKT_HEADER_SIZE]) -> TransportResult<usize> {
    if header[0] != TPKT_VERSION {
        return Err(TransportError::Syntax(format!(
            "TPKT version {} is not 3",
            header[0]
        )));
    }
    if header[1] != TPKT_RESERVED {
        return Err(TransportError::Syntax(
            "TPKT reserved octet is not 0".into(),
        ));
    }
    let packet_length = u16::from_be_bytes([header[2], header[3]]) as usize;
    if packet_length <= DT_HEADER_SIZE {
        return Err(TransportError::Syntax(format!(
            "TPKT packet length {packet_length} is not greater than 7"
        )));
    }
    Ok(packet_length)
}

/// Encode the TPKT and COTP headers of one DT fragment.
///
/// `payload_len` is the number of payload octets that follow; `last` sets
/// the EOT bit. TPDU-NR is always 0 in class 0.
pub fn encode_dt_header(payload_len: usize, last: bool) -> [u8; DT_HEADER_SIZE] {
    let packet_length = (payload_len + DT_HEADER_SIZE) as u16;
    let [hi, lo] = packet_length.to_be_bytes();
    [
        TPKT_VERSION,
        TPKT_RESERVED,
        hi,
        lo,
        0x02,
        TPDU_DT,
        if last { EOT } else { 0x00 },
    ]
}

/// Encode a complete DR (Disconnect Request) frame.
pub fn encode_dr(dst_ref: u16, src_ref: u16, reason: u8) -> [u8; 11] {
    let [dst_hi, dst_lo] = dst_ref.to_be_bytes();
    let [src_hi, src_lo] = src_ref.to_be_bytes();
    [
        TPKT_VERSION,
        TPKT_RESERVED,
        0x00,
        0x0b,
        0x06,
        TPDU_DR,
        dst_hi,
        dst_lo,
        src_hi,
        src_lo,
        reason,
    ]
}

/// A CR (Connection Request) or CC (Connection Confirm) TPDU.
///
/// The two codes share the fixed-part layout and the variable-part
/// parameters; which selector code means "local" depends on the direction
/// and is mapped by the connection, not here. 0xC1 always carries the
/// calling (active opener's) selector and 0xC2 the called one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTpdu {
    /// TPDU code, [`TPDU_CR`] or [`TPDU_CC`].
    pub code: u8,
    /// Destination reference; 0 in a CR.
    pub dst_ref: u16,
    /// Source reference of the sending entity.
    pub src_ref: u16,
    /// Proposed/negotiated maximum-TPDU-size exponent.
    pub max_tpdu_size_param: Option<u8>,
    /// Calling transport selector (parameter 0xC1).
    pub calling_tsel: Option<Vec<u8>>,
    /// Called transport selector (parameter 0xC2).
    pub called_tsel: Option<Vec<u8>>,
}

impl ConnectTpdu {
    /// Encode as a complete TPKT frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut variable_length = 0;
        if self.max_tpdu_size_param.is_some() {
            variable_length += 3;
        }
        if let Some(tsel) = &self.calling_tsel {
            variable_length += 2 + tsel.len();
        }
        if let Some(tsel) = &self.called_tsel {
            variable_length += 2 + tsel.len();
        }

        // TPKT header + 7 fixed COTP octets + variable part
        let packet_length = TPKT_HEADER_SIZE + DT_HEADER_SIZE + variable_length;
        let mut frame = Vec::with_capacity(packet_length);
        frame.push(TPKT_VERSION);
        frame.push(TPKT_RESERVED);
        frame.extend_from_slice(&(packet_length as u16).to_be_bytes());

        // fixed part; the LI octet does not count itself
        frame.push((6 + variable_length) as u8);
        frame.push(self.code);
        frame.extend_from_slice(&self.dst_ref.to_be_bytes());
        frame.extend_from_slice(&self.src_ref.to_be_bytes());
        frame.push(0x00); // class 0, no options

        if let Some(param) = self.max_tpdu_size_param {
            frame.push(PARAM_TPDU_SIZE);
            frame.push(0x01);
            frame.push(param);
        }
        if let Some(tsel) = &self.calling_tsel {
            frame.push(PARAM_CALLING_TSEL);
            frame.push(tsel.len() as u8);
            frame.extend_from_slice(tsel);
        }
        if let Some(tsel) = &self.called_tsel {
            frame.push(PARAM_CALLED_TSEL);
            frame.push(tsel.len() as u8);
            frame.extend_from_slice(tsel);
        }

        frame
    }

    /// Parse from the packet body, i.e. everything after the TPKT header.
    pub fn decode(body: &[u8]) -> TransportResult<Self> {
        if body.len() < 7 {
            return Err(TransportError::Syntax(
                "handshake TPDU shorter than its fixed part".into(),
            ));
        }
        let length_indicator = body[0] as usize;
        let code = body[1];
        if code != TPDU_CR && code != TPDU_CC {
            return Err(TransportError::Syntax(format!(
                "unexpected TPDU code {code:#04x} during handshake"
            )));
        }
        let dst_ref = u16::from_be_bytes([body[2], body[3]]);
        let src_ref = u16::from_be_bytes([body[4], body[5]]);
        if body[6] != 0 {
            return Err(TransportError::Syntax(
                "class option octet is not 0".into(),
            ));
        }
        if length_indicator < 6 || length_indicator - 6 > body.len() - 7 {
            return Err(TransportError::Syntax(
                "length indicator disagrees with packet length".into(),
            ));
        }

        let mut max_tpdu_size_param = None;
        let mut calling_tsel = None;
        let mut called_tsel = None;

        let mut variable = &body[7..7 + (length_indicator - 6)];
        while !variable.is_empty() {
            if variable.len() < 2 {
                return Err(TransportError::Syntax(
                    "truncated variable-part parameter".into(),
                ));
            }
            let parameter_code = variable[0];
            let parameter_length = variable[1] as usize;
            if variable.len() < 2 + parameter_length {
                return Err(TransportError::Syntax(
                    "variable-part parameter overruns the length indicator".into(),
                ));
            }
            let value = &variable[2..2 + parameter_length];
            match parameter_code {
                PARAM_TPDU_SIZE => {
                    if parameter_length != 1 {
                        return Err(TransportError::Syntax(
                            "maximum TPDU size parameter length is not 1".into(),
                        ));
                    }
                    let param = value[0];
                    if !(MIN_TPDU_SIZE_PARAM..=MAX_TPDU_SIZE_PARAM).contains(&param) {
                        return Err(TransportError::Syntax(format!(
                            "maximum TPDU size parameter {param} is out of bounds"
                        )));
                    }
                    max_tpdu_size_param = Some(param);
                }
                PARAM_CALLING_TSEL => calling_tsel = Some(value.to_vec()),
                PARAM_CALLED_TSEL => called_tsel = Some(value.to_vec()),
                other => {
                    return Err(TransportError::Syntax(format!(
                        "unknown parameter code {other:#04x}"
                    )));
                }
            }
            variable = &variable[2 + parameter_length..];
        }

        Ok(Self {
            code,
            dst_ref,
            src_ref,
            max_tpdu_size_param,
            calling_tsel,
            called_tsel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_tpdu_size_mapping() {
        assert_eq!(max_tpdu_size(7), 128);
        assert_eq!(max_tpdu_size(10), 1024);
        assert_eq!(max_tpdu_size(15), 32768);
        // param 16 hits the RFC 1006 ceiling, not 65536
        assert_eq!(max_tpdu_size(16), 65531);
    }

    #[test]
    fn test_tpkt_header_roundtrip() {
        assert_eq!(parse_tpkt_header([0x03, 0x00, 0x00, 0x0b]).unwrap(), 11);
    }

    #[test]
    fn test_tpkt_header_rejects_bad_version() {
        assert!(matches!(
            parse_tpkt_header([0x02, 0x00, 0x00, 0x0b]),
            Err(TransportError::Syntax(_))
        ));
    }

    #[test]
    fn test_tpkt_header_rejects_reserved() {
        assert!(matches!(
            parse_tpkt_header([0x03, 0x01, 0x00, 0x0b]),
            Err(TransportError::Syntax(_))
        ));
    }

    #[test]
    fn test_tpkt_header_rejects_short_packet() {
        assert!(matches!(
            parse_tpkt_header([0x03, 0x00, 0x00, 0x07]),
            Err(TransportError::Syntax(_))
        ));
    }

    #[test]
    fn test_dt_header_layout() {
        let header = encode_dt_header(125, false);
        assert_eq!(header, [0x03, 0x00, 0x00, 132, 0x02, 0xf0, 0x00]);

        let header = encode_dt_header(50, true);
        assert_eq!(header, [0x03, 0x00, 0x00, 57, 0x02, 0xf0, 0x80]);
    }

    #[test]
    fn test_dr_frame_layout() {
        let frame = encode_dr(0x0102, 0x0304, 0);
        assert_eq!(
            frame,
            [0x03, 0x00, 0x00, 0x0b, 0x06, 0x80, 0x01, 0x02, 0x03, 0x04, 0x00]
        );
    }

    #[test]
    fn test_cr_encoding_matches_wire_image() {
        let cr = ConnectTpdu {
            code: TPDU_CR,
            dst_ref: 0,
            src_ref: 2,
            max_tpdu_size_param: Some(7),
            calling_tsel: Some(vec![0x00, 0x01]),
            called_tsel: None,
        };
        assert_eq!(
            cr.encode(),
            [
                0x03, 0x00, 0x00, 0x12, // TPKT, length 18
                0x0d, 0xe0, // LI 13, CR
                0x00, 0x00, 0x00, 0x02, 0x00, // dst-ref 0, src-ref 2, class 0
                0xc0, 0x01, 0x07, // max TPDU size 2^7
                0xc1, 0x02, 0x00, 0x01, // calling TSel
            ]
        );
    }

    #[test]
    fn test_connect_tpdu_roundtrip() {
        let cc = ConnectTpdu {
            code: TPDU_CC,
            dst_ref: 13,
            src_ref: 65519,
            max_tpdu_size_param: Some(16),
            calling_tsel: Some(vec![0xaa]),
            called_tsel: Some(vec![0x00, 0x01, 0x02]),
        };
        let frame = cc.encode();
        let packet_length = parse_tpkt_header([frame[0], frame[1], frame[2], frame[3]]).unwrap();
        assert_eq!(packet_length, frame.len());
        assert_eq!(ConnectTpdu::decode(&frame[4..]).unwrap(), cc);
    }

    #[test]
    fn test_decode_rejects_unknown_parameter() {
        // fixed part plus a bogus 0xc5 parameter
        let body = [0x09, 0xe0, 0x00, 0x00, 0x00, 0x01, 0x00, 0xc5, 0x01, 0xff];
        assert!(matches!(
            ConnectTpdu::decode(&body),
            Err(TransportError::Syntax(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_class() {
        let body = [0x06, 0xe0, 0x00, 0x00, 0x00, 0x01, 0x01];
        assert!(matches!(
            ConnectTpdu::decode(&body),
            Err(TransportError::Syntax(_))
        ));
    }

    #[test]
    fn test_decode_rejects_out_of_range_size_param() {
        let body = [0x09, 0xe0, 0x00, 0x00, 0x00, 0x01, 0x00, 0xc0, 0x01, 0x06];
        assert!(matches!(
            ConnectTpdu::decode(&body),
            Err(TransportError::Syntax(_))
        ));
    }

    #[test]
    fn test_decode_rejects_data_tpdu_code() {
        let body = [0x02, 0xf0, 0x00, 0x00, 0x00, 0x01, 0x00];
        assert!(matches!(
            ConnectTpdu::decode(&body),
            Err(TransportError::Syntax(_))
        ));
    }

    #[test]
    fn test_decode_rejects_overrunning_parameter() {
        // selector claims 5 value octets but only 1 fits the variable part
        let body = [0x09, 0xe0, 0x00, 0x00, 0x00, 0x01, 0x00, 0xc1, 0x05, 0x00];
        assert!(matches!(
            ConnectTpdu::decode(&body),
            Err(TransportError::Syntax(_))
        ));
    }

    #[test]
    fn test_zero_length_selector_is_valid() {
        let cr = ConnectTpdu {
            code: TPDU_CR,
            dst_ref: 0,
            src_ref: 1,
            max_tpdu_size_param: None,
            calling_tsel: Some(Vec::new()),
            called_tsel: None,
        };
        let frame = cr.encode();
        let decoded = ConnectTpdu::decode(&frame[4..]).unwrap();
        assert_eq!(decoded.calling_tsel, Some(Vec::new()));
    }
}

//! Protocol constants from RFC 1006 and ISO 8073 (class 0).
//!
//! These values are fixed by the protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// TPKT FRAMING (RFC 1006)
// =============================================================================

/// TPKT protocol version.
pub const TPKT_VERSION: u8 = 0x03;

/// Value of the reserved octet in a TPKT header.
pub const TPKT_RESERVED: u8 = 0x00;

/// TPKT header size (version + reserved + packet length).
pub const TPKT_HEADER_SIZE: usize = 4;

// =============================================================================
// TPDU CODES (ISO 8073 §13)
// =============================================================================

/// Connection Request.
pub const TPDU_CR: u8 = 0xe0;

/// Connection Confirm.
pub const TPDU_CC: u8 = 0xd0;

/// Data Transfer.
pub const TPDU_DT: u8 = 0xf0;

/// Disconnect Request.
pub const TPDU_DR: u8 = 0x80;

/// Error.
pub const TPDU_ER: u8 = 0x70;

// =============================================================================
// VARIABLE-PART PARAMETER CODES (CR/CC)
// =============================================================================

/// Proposed/negotiated maximum TPDU size (value is the exponent).
pub const PARAM_TPDU_SIZE: u8 = 0xc0;

/// Calling transport selector (the active opener's TSel).
pub const PARAM_CALLING_TSEL: u8 = 0xc1;

/// Called transport selector (the passive listener's TSel).
pub const PARAM_CALLED_TSEL: u8 = 0xc2;

/// Largest transport selector in octets (ISO 8073).
pub const MAX_TSEL_LENGTH: usize = 32;

// =============================================================================
// TPDU SIZE NEGOTIATION
// =============================================================================

/// Smallest allowed maximum-TPDU-size exponent (2^7 = 128 octets).
pub const MIN_TPDU_SIZE_PARAM: u8 = 7;

/// Largest allowed maximum-TPDU-size exponent.
pub const MAX_TPDU_SIZE_PARAM: u8 = 16;

/// Maximum TPDU size for exponent 16. RFC 1006 caps this at 65531
/// rather than 65536.
pub const MAX_TPDU_SIZE_16: usize = 65531;

/// Header octets per DT TPDU: 4 TPKT octets plus LI, TPDU code and the
/// TPDU-NR/EOT octet.
pub const DT_HEADER_SIZE: usize = 7;

/// Octets reserved from the TPDU size budget for the DT header; the usable
/// payload per fragment is `maxTPduSize - 3`.
pub const DT_PAYLOAD_RESERVE: usize = 3;

/// End-of-transmission bit in the TPDU-NR/EOT octet of a DT TPDU.
pub const EOT: u8 = 0x80;

// =============================================================================
// CONNECTION REFERENCES
// =============================================================================

/// Smallest connection source reference. Some peer implementations reject
/// src-ref 0 as invalid, so the counter never emits it.
pub const SRC_REF_MIN: u16 = 1;

/// Largest connection source reference.
pub const SRC_REF_MAX: u16 = 65519;

// =============================================================================
// DISCONNECT REASONS (DR, class 0)
// =============================================================================

/// Reason "not specified".
pub const DR_REASON_NOT_SPECIFIED: u8 = 0;

/// Largest DR reason code valid for class 0.
pub const DR_REASON_MAX: u8 = 4;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default maximum-TPDU-size exponent (65531 octets, see RFC 1006).
pub const DEFAULT_MAX_TPDU_SIZE_PARAM: u8 = 16;

/// Default wait for the first byte of a new message (zero = unlimited).
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::ZERO;

/// Default wait for each further byte once a message has started arriving.
pub const DEFAULT_MESSAGE_FRAGMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on concurrent server-side connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default TCP accept backlog.
pub const DEFAULT_BACKLOG: u32 = 1024;

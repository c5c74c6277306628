//! Rendezvous capability identifiers.

use uuid::Uuid;

/// Capability announced in proxy init packets for a send-file rendezvous.
pub const CAP_FILE_TRANSFER: Uuid = Uuid::from_u128(0x0946_1343_4c7f_11d1_8222_4445_5354_0000);

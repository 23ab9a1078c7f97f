//! # Control Frame Codec
//!
//! Every mailbox message exchanged by the rendezvous protocol is one fixed
//! 31-byte little-endian frame. Three on-wire variants share the layout and
//! are discriminated positionally by protocol step, never by a tag byte:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0  | 2 | context id |
//! | 2  | 2 | source rank |
//! | 4  | 2 | target rank |
//! | 6  | 4 | tag |
//! | 10 | 4 | received size (reply only) |
//! | 14 | 2 | datatype id |
//! | 16 | 8 | payload byte count |
//! | 24 | 1 | portal port |
//! | 25 | 1 | inbox port |
//! | 26 | 1 | source node |
//! | 27 | 4 | slot id (request) or error code (ack) |
//!
//! A *request-to-send* populates the routing fields and sets the slot id to
//! `-1` for remote transfers or to a slot index for the same-node shortcut; a
//! *confirm* carries the receiver's reply-outbox port in the inbox-port
//! field; an *ack* carries the final error code in the last word.

use crate::substrate::{NodeNum, Port};

/// Size in bytes of one control frame.
pub const FRAME_LEN: usize = 31;

/// Slot id value meaning "no same-node shortcut".
pub const NO_SLOT: i32 = -1;

/// Decoded control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage {
    pub cid: u16,
    pub src: i16,
    pub target: i16,
    pub tag: i32,
    pub received_size: u32,
    pub datatype: i16,
    pub size: u64,
    pub portal_port: Port,
    pub inbox_port: Port,
    pub source_node: NodeNum,
    /// Slot id in a request-to-send, error code in an ack.
    pub word: i32,
}

impl ControlMessage {
    /// Builds a request-to-send header.
    #[allow(clippy::too_many_arguments)]
    pub fn request_to_send(
        cid: u16,
        src: i16,
        target: i16,
        tag: i32,
        datatype: i16,
        size: u64,
        portal_port: Port,
        inbox_port: Port,
        source_node: NodeNum,
    ) -> Self {
        ControlMessage {
            cid,
            src,
            target,
            tag,
            received_size: 0,
            datatype,
            size,
            portal_port,
            inbox_port,
            source_node,
            word: NO_SLOT,
        }
    }

    /// Builds a confirmation carrying the receiver's reply-outbox port.
    pub fn confirm(outbox_port: Port) -> Self {
        ControlMessage {
            inbox_port: outbox_port,
            ..ControlMessage::zeroed()
        }
    }

    /// Builds the final acknowledgement carrying `errcode` and the bytes the
    /// receiver actually consumed.
    pub fn ack(cid: u16, source_node: NodeNum, received_size: u32, errcode: i32) -> Self {
        ControlMessage {
            cid,
            received_size,
            source_node,
            word: errcode,
            ..ControlMessage::zeroed()
        }
    }

    fn zeroed() -> Self {
        ControlMessage {
            cid: 0,
            src: 0,
            target: 0,
            tag: 0,
            received_size: 0,
            datatype: 0,
            size: 0,
            portal_port: 0,
            inbox_port: 0,
            source_node: 0,
            word: 0,
        }
    }

    /// Slot id advertised by a same-node request-to-send.
    pub fn slot_id(&self) -> i32 {
        self.word
    }

    /// Error code carried by an ack.
    pub fn errcode(&self) -> i32 {
        self.word
    }

    /// Encodes the frame into its wire layout.
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[0..2].copy_from_slice(&self.cid.to_le_bytes());
        out[2..4].copy_from_slice(&self.src.to_le_bytes());
        out[4..6].copy_from_slice(&self.target.to_le_bytes());
        out[6..10].copy_from_slice(&self.tag.to_le_bytes());
        out[10..14].copy_from_slice(&self.received_size.to_le_bytes());
        out[14..16].copy_from_slice(&self.datatype.to_le_bytes());
        out[16..24].copy_from_slice(&self.size.to_le_bytes());
        out[24] = self.portal_port;
        out[25] = self.inbox_port;
        out[26] = self.source_node;
        out[27..31].copy_from_slice(&self.word.to_le_bytes());
        out
    }

    /// Decodes a frame, rejecting anything that is not exactly one frame.
    pub fn from_bytes(data: &[u8]) -> Option<ControlMessage> {
        if data.len() != FRAME_LEN {
            return None;
        }
        let le16 = |at: usize| i16::from_le_bytes([data[at], data[at + 1]]);
        let le32 = |at: usize| {
            i32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
        };

        Some(ControlMessage {
            cid: u16::from_le_bytes([data[0], data[1]]),
            src: le16(2),
            target: le16(4),
            tag: le32(6),
            received_size: le32(10) as u32,
            datatype: le16(14),
            size: u64::from_le_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
            portal_port: data[24],
            inbox_port: data[25],
            source_node: data[26],
            word: le32(27),
        })
    }
}

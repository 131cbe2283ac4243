//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flag, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed, truncated or corrupted input.
//! - Encoding the small fixed payloads carried by handshake and control
//!   packets.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |     Flag      |  Total Length |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  (cont.)      |           Payload (0..=1400 bytes) ...        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 9 bytes.
//! seq(4) + checksum(2) + flag(1) + total_length(2)

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 9;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD: usize = 1400;

/// Largest datagram either side will ever send or expect to receive.
pub const MAX_DATAGRAM: usize = 1500;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_CHECKSUM: usize = 4;
const OFF_FLAG: usize = 6;
const OFF_LENGTH: usize = 7;

/// Payload type carried in the `flag` header byte.
///
/// Flags are mutually exclusive: exactly one per packet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Initiator asks for a session: payload is [`SetupRequest`].
    SetupRequest = 1,
    /// Responder accepted the session parameters.
    SetupAck = 2,
    /// A full-sized file chunk.
    Data = 3,
    /// Receiver-ready: cumulative acknowledgment, payload is a sequence.
    Rr = 5,
    /// Selective reject: retransmit one sequence, payload is a sequence.
    Srej = 6,
    /// Initiator names the file it wants: NUL-terminated path.
    FilenameRequest = 7,
    /// Responder could not open the file: payload is an OS error code.
    FilenameError = 8,
    /// Initiator acknowledges a [`Flag::FilenameError`] and leaves.
    EndConnection = 9,
    /// The last (possibly short or empty) file chunk.
    FinalData = 10,
}

impl Flag {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Flag::SetupRequest,
            2 => Flag::SetupAck,
            3 => Flag::Data,
            5 => Flag::Rr,
            6 => Flag::Srej,
            7 => Flag::FilenameRequest,
            8 => Flag::FilenameError,
            9 => Flag::EndConnection,
            10 => Flag::FinalData,
            _ => return None,
        })
    }

    /// `true` for the two flags that carry file bytes.
    pub fn is_data(self) -> bool {
        matches!(self, Flag::Data | Flag::FinalData)
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Flag::SetupRequest => "SETUP",
            Flag::SetupAck => "SETUP-ACK",
            Flag::Data => "DATA",
            Flag::Rr => "RR",
            Flag::Srej => "SREJ",
            Flag::FilenameRequest => "FILENAME",
            Flag::FilenameError => "FILENAME-ERR",
            Flag::EndConnection => "END",
            Flag::FinalData => "FINAL",
        };
        f.write_str(name)
    }
}

/// Fixed-size protocol header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Data sequence for file chunks, control sequence for everything else.
    pub seq: u32,
    /// Internet checksum (RFC 1071) over the entire serialised packet.
    ///
    /// On encode this is computed and written last.
    /// On decode this holds the value found on the wire.
    pub checksum: u16,
    pub flag: Flag,
    /// Header length plus payload length.
    pub length: u16,
}

impl Header {
    /// Build a header for a packet whose payload is `payload_len` bytes.
    /// The checksum is left at zero until [`Packet::encode`].
    pub fn new(seq: u32, flag: Flag, payload_len: usize) -> Self {
        Self {
            seq,
            checksum: 0,
            flag,
            length: (HEADER_LEN + payload_len) as u16,
        }
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet; `payload` must not exceed [`MAX_PAYLOAD`].
    pub fn new(seq: u32, flag: Flag, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD, "payload over {MAX_PAYLOAD} bytes");
        Self {
            header: Header::new(seq, flag, payload.len()),
            payload,
        }
    }

    /// A control packet carrying a single big-endian sequence number
    /// (RR and SREJ).
    pub fn control(control_seq: u32, flag: Flag, target: u32) -> Self {
        Self::new(control_seq, flag, target.to_be_bytes().to_vec())
    }

    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    pub fn flag(&self) -> Flag {
        self.header.flag
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// `header.length` and `header.checksum` are computed from the actual
    /// payload; any values already stored in those fields are ignored.
    pub fn encode(&self) -> Vec<u8> {
        let total = HEADER_LEN + self.payload.len();
        let mut buf = vec![0u8; total];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        // Checksum field is zero while computing the checksum.
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
        buf[OFF_FLAG] = self.header.flag as u8;
        buf[OFF_LENGTH..OFF_LENGTH + 2].copy_from_slice(&(total as u16).to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the checksum over the whole datagram does not fold to zero,
    /// - the `length` field disagrees with `buf.len()`, or
    /// - the flag byte is not a known [`Flag`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }
        // The stored checksum is part of the sum, so an intact datagram
        // checksums to zero.
        if internet_checksum(buf) != 0 {
            return Err(PacketError::ChecksumFailed);
        }

        let seq = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let checksum = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);
        let length = u16::from_be_bytes([buf[OFF_LENGTH], buf[OFF_LENGTH + 1]]);

        if length as usize != buf.len() {
            return Err(PacketError::LengthMismatch);
        }
        let flag = Flag::from_u8(buf[OFF_FLAG]).ok_or(PacketError::UnknownFlag(buf[OFF_FLAG]))?;

        Ok(Packet {
            header: Header {
                seq,
                checksum,
                flag,
                length,
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// Decode, collapsing every failure into `None`.
    ///
    /// A corrupted datagram must drive the same recovery path as a lost one,
    /// so callers above the framing layer never see *why* a packet vanished.
    pub fn verify_and_unwrap(buf: &[u8]) -> Option<Self> {
        match Self::decode(buf) {
            Ok(pkt) => Some(pkt),
            Err(e) => {
                log::debug!("[packet] dropped {} byte datagram: {e}", buf.len());
                None
            }
        }
    }

    /// The sequence carried in an RR or SREJ payload.
    pub fn control_target(&self) -> Option<u32> {
        read_be_u32(&self.payload)
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    BufferTooShort,
    /// `length` field does not match the datagram size.
    LengthMismatch,
    /// Flag byte outside the known set.
    UnknownFlag(u8),
    /// Checksum did not fold to zero.
    ChecksumFailed,
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::BufferTooShort => write!(f, "buffer too short to contain a header"),
            PacketError::LengthMismatch => write!(f, "length field does not match datagram size"),
            PacketError::UnknownFlag(b) => write!(f, "unknown flag byte {b}"),
            PacketError::ChecksumFailed => write!(f, "checksum verification failed"),
        }
    }
}

impl std::error::Error for PacketError {}

// ---------------------------------------------------------------------------
// Handshake payloads
// ---------------------------------------------------------------------------

/// Session parameters requested by the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupRequest {
    pub window_size: i32,
    pub chunk_size: i32,
}

impl SetupRequest {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.window_size.to_be_bytes());
        buf.extend_from_slice(&self.chunk_size.to_be_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() != Self::LEN {
            return None;
        }
        Some(Self {
            window_size: read_be_u32(&payload[..4])? as i32,
            chunk_size: read_be_u32(&payload[4..])? as i32,
        })
    }
}

/// FILENAME_REQUEST payload: the name followed by a NUL terminator.
pub fn encode_filename(name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(name.len() + 1);
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    buf
}

/// Inverse of [`encode_filename`]; bytes after the first NUL are ignored.
pub fn decode_filename(payload: &[u8]) -> Option<String> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    if end == 0 {
        return None;
    }
    String::from_utf8(payload[..end].to_vec()).ok()
}

/// FILENAME_ERROR payload: the responder's OS error code.
pub fn encode_error_code(code: i32) -> Vec<u8> {
    code.to_be_bytes().to_vec()
}

pub fn decode_error_code(payload: &[u8]) -> Option<i32> {
    read_be_u32(payload).map(|v| v as i32)
}

fn read_be_u32(bytes: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(arr))
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  Over a buffer that already holds its own checksum
/// (at an even offset) the result is zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte: pad with a zero on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    // Fold 32-bit sum into 16 bits.
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = Packet::new(42, Flag::Data, b"hello".to_vec());
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.seq(), 42);
        assert_eq!(decoded.flag(), Flag::Data);
        assert_eq!(decoded.header.length as usize, HEADER_LEN + 5);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn length_field_counts_header() {
        let bytes = Packet::new(1, Flag::FinalData, vec![7u8; 500]).encode();
        let len_field = u16::from_be_bytes([bytes[OFF_LENGTH], bytes[OFF_LENGTH + 1]]);
        assert_eq!(len_field as usize, HEADER_LEN + 500);
        assert_eq!(bytes.len(), HEADER_LEN + 500);
    }

    #[test]
    fn intact_packet_checksums_to_zero() {
        let bytes = Packet::new(9, Flag::Srej, vec![1, 2, 3]).encode();
        assert_eq!(internet_checksum(&bytes), 0);
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::BufferTooShort));
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::BufferTooShort)
        );
    }

    #[test]
    fn decode_truncated_payload_is_rejected() {
        let mut bytes = Packet::new(0, Flag::Data, b"data".to_vec()).encode();
        bytes.pop();
        assert!(Packet::decode(&bytes).is_err());
        assert!(Packet::verify_and_unwrap(&bytes).is_none());
    }

    #[test]
    fn every_single_bit_flip_is_rejected() {
        let bytes = Packet::new(0x0102_0304, Flag::FinalData, b"payload!".to_vec()).encode();
        for byte in 0..bytes.len() {
            if (OFF_CHECKSUM..OFF_CHECKSUM + 2).contains(&byte) {
                continue;
            }
            for bit in 0..8 {
                let mut corrupt = bytes.clone();
                corrupt[byte] ^= 1 << bit;
                assert!(
                    Packet::verify_and_unwrap(&corrupt).is_none(),
                    "flip of byte {byte} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let mut bytes = Packet::new(0, Flag::Data, vec![]).encode();
        // Rewrite the flag and patch the checksum so only the flag is wrong.
        bytes[OFF_FLAG] = 4;
        bytes[OFF_CHECKSUM] = 0;
        bytes[OFF_CHECKSUM + 1] = 0;
        let csum = internet_checksum(&bytes);
        bytes[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(Packet::decode(&bytes), Err(PacketError::UnknownFlag(4)));
    }

    #[test]
    fn seq_big_endian_on_wire() {
        let bytes = Packet::new(0x0102_0304, Flag::Rr, vec![]).encode();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(bytes[OFF_FLAG], 5);
    }

    #[test]
    fn control_packet_carries_target() {
        let pkt = Packet::control(77, Flag::Rr, 4);
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.seq(), 77);
        assert_eq!(decoded.control_target(), Some(4));
    }

    #[test]
    fn setup_request_payload() {
        let req = SetupRequest {
            window_size: 4,
            chunk_size: 1000,
        };
        let bytes = req.encode();
        assert_eq!(bytes, [0, 0, 0, 4, 0, 0, 0x03, 0xe8]);
        assert_eq!(SetupRequest::decode(&bytes), Some(req));
        assert_eq!(SetupRequest::decode(&bytes[..7]), None);
    }

    #[test]
    fn filename_is_nul_terminated() {
        let bytes = encode_filename("notes.txt");
        assert_eq!(bytes.last(), Some(&0));
        assert_eq!(decode_filename(&bytes).as_deref(), Some("notes.txt"));
        assert_eq!(decode_filename(b"\0"), None);
    }

    #[test]
    fn error_code_payload() {
        assert_eq!(decode_error_code(&encode_error_code(2)), Some(2));
        assert_eq!(decode_error_code(&[0, 1]), None);
    }

    #[test]
    fn odd_length_checksum_pads_right() {
        // 0x0100 + 0x0000 -> !0x0100
        assert_eq!(internet_checksum(&[0x01]), !0x0100);
    }
}

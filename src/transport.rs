// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! Blocking S7 transport bound to one PLC.
//!
//! `S7TcpTransport` speaks ISO-on-TCP (RFC 1006) with the TSAP-addressed
//! connection setup the S7-200 requires, negotiates the PDU size, and then
//! exchanges S7comm read-var/write-var jobs. Multi-variable jobs carry up to
//! N item specs per telegram; payloads larger than the negotiated PDU go
//! through the chunked single-area calls instead.
//!
//! The session engine only sees the [`Transport`] trait, so tests can swap in
//! a scripted implementation.

use std::io;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::address::{AddressDescriptor, Area, WordLen};

// ISO / TPKT framing
const ISO_ID: u8 = 0x03; // RFC 1006 ID
const TPKT_ISO_LEN: usize = 7; // TPKT + COTP data header
const ISO_CR_LEN: usize = 22; // connection request telegram size
const ISO_CONN_REQ: u8 = 0xE0;
const ISO_CONN_OK: u8 = 0xD0;
const EOT: u8 = 0x80; // end of transmission flag

// S7 protocol
const S7_ID: u8 = 0x32;
const PDU_LEN_REQ: u16 = 240; // what an S7-200 will grant
const ISO_PN_REQ_LEN: usize = 25;
const ISO_PN_RES_LEN: usize = 27;
const S7_FN_READ: u8 = 0x04;
const S7_FN_WRITE: u8 = 0x05;
const S7_HEADER_LEN: usize = 10; // request header
const S7_ACK_HEADER_LEN: usize = 12; // response header incl. error class/code
const ITEM_SPEC_LEN: usize = 12;

// Transport sizes used in data parts
const TS_RES_BIT: u8 = 0x03;
const TS_RES_BYTE: u8 = 0x04;

/// Per-item success marker in multi-var responses.
pub const ITEM_OK: u8 = 0xFF;
const RES_INVALID_ADDRESS: u8 = 0x05;
const RES_NOT_FOUND: u8 = 0x0A;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("not connected")]
    NotConnected,
    #[error("TCP connection failed")]
    TcpConnectionFailed,
    #[error("ISO-on-TCP connection failed")]
    IsoConnectionFailed,
    #[error("fragmented ISO packet")]
    IsoFragmentedPacket,
    #[error("invalid ISO header")]
    IsoInvalidHeader,
    #[error("invalid ISO telegram")]
    IsoInvalidTelegram,
    #[error("S7 PDU negotiation failed")]
    PduNegotiationFailed,
    #[error("request does not fit the negotiated PDU")]
    RequestTooLarge,
    #[error("S7 resource not found in the CPU")]
    NotFound,
    #[error("S7 invalid address")]
    InvalidAddress,
    #[error("S7 unspecified error")]
    Unspecified,
}

/// One variable of a multi-var job, the moral equivalent of snap7's
/// `TS7DataItem` with the buffer owned instead of pointed at.
#[derive(Debug, Clone)]
pub struct PduItem {
    pub area: Area,
    pub word_len: WordLen,
    pub db_number: u16,
    /// Wire start: a bit index for `Bit` accesses, a byte index otherwise.
    pub start: u32,
    pub amount: u16,
    pub data: Vec<u8>,
}

impl PduItem {
    /// Builds an item sized for `descriptor`, with a zeroed buffer ready for
    /// a read.
    pub fn from_descriptor(descriptor: &AddressDescriptor) -> PduItem {
        PduItem {
            area: descriptor.area,
            word_len: descriptor.word_len,
            db_number: descriptor.db_number,
            start: descriptor.wire_start(),
            amount: descriptor.amount,
            data: vec![0; descriptor.size_bytes()],
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.word_len.bytes_per_element() * self.amount as usize
    }

    /// 24-bit address field of the item spec: everything except bit accesses
    /// is addressed in bits.
    fn wire_address(&self) -> u32 {
        match self.word_len {
            WordLen::Bit => self.start,
            _ => self.start << 3,
        }
    }
}

/// The S7 client surface the session engine consumes.
pub trait Transport: Send {
    fn connect(&mut self) -> Result<(), TransportError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;

    /// Reads every item of one multi-var job. Returns the per-item S7 return
    /// codes ([`ITEM_OK`] on success); item buffers are filled in place.
    fn read_multi(&mut self, items: &mut [PduItem]) -> Result<Vec<u8>, TransportError>;

    /// Writes every item of one multi-var job. Returns the per-item codes.
    fn write_multi(&mut self, items: &[PduItem]) -> Result<Vec<u8>, TransportError>;

    /// Single-variable read, chunked over the negotiated PDU. Fallback for
    /// payloads too large for a multi-var item.
    fn read_area(&mut self, item: &mut PduItem) -> Result<(), TransportError>;

    /// Single-variable write, chunked over the negotiated PDU.
    fn write_area(&mut self, item: &PduItem) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> Result<(), TransportError> {
        (**self).connect()
    }
    fn disconnect(&mut self) {
        (**self).disconnect()
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    fn read_multi(&mut self, items: &mut [PduItem]) -> Result<Vec<u8>, TransportError> {
        (**self).read_multi(items)
    }
    fn write_multi(&mut self, items: &[PduItem]) -> Result<Vec<u8>, TransportError> {
        (**self).write_multi(items)
    }
    fn read_area(&mut self, item: &mut PduItem) -> Result<(), TransportError> {
        (**self).read_area(item)
    }
    fn write_area(&mut self, item: &PduItem) -> Result<(), TransportError> {
        (**self).write_area(item)
    }
}

/// Checks the TPKT + COTP data header of an incoming telegram and returns
/// the number of S7 bytes still to be read.
///
/// A PLC rarely sends garbage, but leftovers of a fragmented transmission
/// can sit in the buffer, so the header is verified before trusting the
/// length field.
fn check_iso_packet(pdu_length: u16, iso_packet: &[u8; TPKT_ISO_LEN]) -> Result<usize, TransportError> {
    //  TPKT
    //      [0]    RFC 1006 ID          0x03
    //      [1]    Reserved             0x00
    //      [2-3]  Telegram length      variable
    //  COTP
    //      [4]    Length               0x02
    //      [5]    PDU Type             0xF0
    //      [6]    EOT                  0x80
    if iso_packet[0] != ISO_ID || iso_packet[4] != 0x02 || iso_packet[5] != 0xF0 {
        return Err(TransportError::IsoInvalidHeader);
    }
    if iso_packet[6] != EOT {
        return Err(TransportError::IsoFragmentedPacket);
    }

    let telegram_length = BigEndian::read_u16(&iso_packet[2..4]) as usize;
    if telegram_length <= TPKT_ISO_LEN || telegram_length - TPKT_ISO_LEN > pdu_length as usize {
        return Err(TransportError::IsoInvalidTelegram);
    }
    Ok(telegram_length - TPKT_ISO_LEN)
}

/// Blocking ISO-on-TCP S7 client bound to one IP and one TSAP pair.
pub struct S7TcpTransport {
    ip: String,
    port: u16,
    local_tsap: u16,
    remote_tsap: u16,
    co_timeout: Duration,
    rd_timeout: Duration,
    wr_timeout: Duration,
    stream: Option<TcpStream>,
    pdu_length: u16,
    max_rd_pdu_data: u16,
    max_wr_pdu_data: u16,
}

impl S7TcpTransport {
    /// A transport for `ip` using the given local/remote TSAPs. The client
    /// starts disconnected; the S7 port (102) and the operation timeouts can
    /// be adjusted before `connect`.
    pub fn new(ip: &str, local_tsap: u16, remote_tsap: u16) -> S7TcpTransport {
        S7TcpTransport {
            ip: ip.to_owned(),
            port: 102,
            local_tsap,
            remote_tsap,
            co_timeout: Duration::from_millis(3000),
            rd_timeout: Duration::from_millis(1000),
            wr_timeout: Duration::from_millis(500),
            stream: None,
            pdu_length: 0,
            max_rd_pdu_data: 0,
            max_wr_pdu_data: 0,
        }
    }

    pub fn set_connection_port(&mut self, port: u16) {
        if port > 0 {
            self.port = port;
        }
    }

    pub fn set_timeouts(&mut self, connect: Duration, read: Duration, write: Duration) {
        self.co_timeout = connect;
        self.rd_timeout = read;
        self.wr_timeout = write;
    }

    /// PDU length granted by the CPU, 0 while disconnected.
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Reads the TPKT/COTP header and then the S7 body of one telegram.
    fn receive_telegram(&mut self) -> Result<Vec<u8>, TransportError> {
        let pdu_length = self.pdu_length;
        let stream = self.stream()?;

        let mut iso_packet = [0u8; TPKT_ISO_LEN];
        stream.read_exact(&mut iso_packet)?;
        let s7_len = check_iso_packet(pdu_length, &iso_packet)?;

        let mut body = vec![0u8; s7_len];
        stream.read_exact(&mut body)?;
        Ok(body)
    }

    /// TPKT + COTP + S7 request header + parameters (+ data) in one buffer.
    fn build_request(function: u8, params: &[u8], data: &[u8]) -> Vec<u8> {
        let total = TPKT_ISO_LEN + S7_HEADER_LEN + 2 + params.len() + data.len();
        let mut telegram = Vec::with_capacity(total);

        // TPKT
        telegram.push(ISO_ID);
        telegram.push(0x00);
        telegram.extend_from_slice(&[0u8; 2]);
        BigEndian::write_u16(&mut telegram[2..4], total as u16);
        // COTP data header
        telegram.extend_from_slice(&[0x02, 0xF0, EOT]);
        // S7 header: job, redundancy id, PDU reference, parameter length,
        // data length
        telegram.push(S7_ID);
        telegram.push(0x01);
        telegram.extend_from_slice(&[0x00, 0x00]);
        telegram.extend_from_slice(&[0x05, 0x00]);
        let mut tmp = [0u8; 2];
        // parameters are the function byte plus everything in `params`
        BigEndian::write_u16(&mut tmp, (1 + params.len()) as u16);
        telegram.extend_from_slice(&tmp);
        BigEndian::write_u16(&mut tmp, data.len() as u16);
        telegram.extend_from_slice(&tmp);
        // parameters
        telegram.push(function);
        telegram.extend_from_slice(params);
        telegram.extend_from_slice(data);
        telegram
    }

    /// The 12-byte variable specification of one item.
    fn push_item_spec(params: &mut Vec<u8>, item: &PduItem) {
        params.push(0x12); // var spec
        params.push(0x0A); // length of the rest of the spec
        params.push(0x10); // syntax id: S7ANY
        params.push(item.word_len.code());
        let mut tmp = [0u8; 2];
        BigEndian::write_u16(&mut tmp, item.amount);
        params.extend_from_slice(&tmp);
        BigEndian::write_u16(&mut tmp, item.db_number);
        params.extend_from_slice(&tmp);
        params.push(item.area.code());
        let address = item.wire_address();
        params.push(((address >> 16) & 0xFF) as u8);
        params.push(((address >> 8) & 0xFF) as u8);
        params.push((address & 0xFF) as u8);
    }

    fn map_item_code(code: u8) -> TransportError {
        match code {
            RES_NOT_FOUND => TransportError::NotFound,
            RES_INVALID_ADDRESS => TransportError::InvalidAddress,
            _ => TransportError::Unspecified,
        }
    }
}

impl Transport for S7TcpTransport {
    /// TCP connect, ISO connection request with the TSAP pair, then S7 PDU
    /// negotiation.
    fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect();

        let addr = format!("{}:{}", self.ip, self.port);
        let target = addr
            .to_socket_addrs()?
            .next()
            .ok_or(TransportError::TcpConnectionFailed)?;
        let mut stream = TcpStream::connect_timeout(&target, self.co_timeout)?;
        stream.set_read_timeout(Some(self.rd_timeout))?;
        stream.set_write_timeout(Some(self.wr_timeout))?;
        stream.set_nodelay(true)?;

        // ISO-on-TCP handshake
        let mut iso_cr = [0u8; ISO_CR_LEN];
        iso_cr[0] = ISO_ID;
        BigEndian::write_u16(&mut iso_cr[2..4], ISO_CR_LEN as u16);
        iso_cr[4] = 0x11; // COTP header length
        iso_cr[5] = ISO_CONN_REQ;
        iso_cr[9] = 0x01; // source reference
        iso_cr[11] = 0xC0; // PDU max length parameter
        iso_cr[12] = 0x01;
        iso_cr[13] = 0x0A;
        iso_cr[14] = 0xC1; // source TSAP
        iso_cr[15] = 0x02;
        BigEndian::write_u16(&mut iso_cr[16..18], self.local_tsap);
        iso_cr[18] = 0xC2; // destination TSAP
        iso_cr[19] = 0x02;
        BigEndian::write_u16(&mut iso_cr[20..22], self.remote_tsap);

        stream.write_all(&iso_cr)?;
        let mut iso_resp = [0u8; ISO_CR_LEN];
        let size_resp = stream.read(&mut iso_resp)?;
        if size_resp < ISO_CR_LEN || iso_resp[5] != ISO_CONN_OK {
            return Err(TransportError::IsoConnectionFailed);
        }

        // S7 PDU negotiation telegram (ISO and COTP headers included)
        let mut s7_pn = [0u8; ISO_PN_REQ_LEN];
        s7_pn[..23].copy_from_slice(&[
            ISO_ID, 0x00, 0x00, 0x19, 0x02, 0xF0, EOT, S7_ID, 0x01, 0x00, 0x00, 0x04, 0x00,
            0x00, 0x08, 0x00, 0x00, 0xF0, 0x00, 0x00, 0x01, 0x00, 0x01,
        ]);
        BigEndian::write_u16(&mut s7_pn[23..25], PDU_LEN_REQ);
        stream.write_all(&s7_pn)?;

        let mut pn_resp = [0u8; ISO_PN_RES_LEN];
        let size_pn = stream.read(&mut pn_resp)?;
        if size_pn < ISO_PN_RES_LEN || pn_resp[0] != ISO_ID || pn_resp[7] != S7_ID || pn_resp[17] != 0x00 {
            return Err(TransportError::PduNegotiationFailed);
        }
        self.pdu_length = BigEndian::read_u16(&pn_resp[25..27]);
        if self.pdu_length == 0 {
            return Err(TransportError::PduNegotiationFailed);
        }
        self.max_rd_pdu_data = self.pdu_length - 18; // response frame header
        self.max_wr_pdu_data = self.pdu_length - 28; // request frame header

        log::debug!(
            "{}: connected, TSAP {:#06x}/{:#06x}, PDU {} bytes",
            self.ip,
            self.local_tsap,
            self.remote_tsap,
            self.pdu_length
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Safe to call while disconnected. On a low-level error the caller is
    /// expected to disconnect and reconnect, as SCADA clients do.
    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            self.pdu_length = 0;
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn read_multi(&mut self, items: &mut [PduItem]) -> Result<Vec<u8>, TransportError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut params = Vec::with_capacity(1 + items.len() * ITEM_SPEC_LEN);
        params.push(items.len() as u8);
        for item in items.iter() {
            Self::push_item_spec(&mut params, item);
        }
        let request = Self::build_request(S7_FN_READ, &params, &[]);
        if request.len() - TPKT_ISO_LEN > self.pdu_length as usize {
            return Err(TransportError::RequestTooLarge);
        }
        self.stream()?.write_all(&request)?;

        let body = self.receive_telegram()?;
        // ack-data header + function/count
        if body.len() < S7_ACK_HEADER_LEN + 2 || body[0] != S7_ID {
            return Err(TransportError::IsoInvalidTelegram);
        }
        let count = body[S7_ACK_HEADER_LEN + 1] as usize;
        if count != items.len() {
            return Err(TransportError::IsoInvalidTelegram);
        }

        // data section: return code, transport size, length, payload; items
        // padded to even offsets except the last
        let mut codes = Vec::with_capacity(items.len());
        let mut pos = S7_ACK_HEADER_LEN + 2;
        for (i, item) in items.iter_mut().enumerate() {
            if pos + 4 > body.len() {
                return Err(TransportError::IsoInvalidTelegram);
            }
            let code = body[pos];
            pos += 4;
            if code == ITEM_OK {
                let size = item.size_bytes();
                if pos + size > body.len() {
                    return Err(TransportError::IsoInvalidTelegram);
                }
                item.data.clear();
                item.data.extend_from_slice(&body[pos..pos + size]);
                pos += size;
                if size % 2 == 1 && i + 1 < count {
                    pos += 1;
                }
            }
            codes.push(code);
        }
        Ok(codes)
    }

    fn write_multi(&mut self, items: &[PduItem]) -> Result<Vec<u8>, TransportError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut params = Vec::with_capacity(1 + items.len() * ITEM_SPEC_LEN);
        params.push(items.len() as u8);
        for item in items {
            Self::push_item_spec(&mut params, item);
        }

        // data parts: transport header + payload per item, even-padded
        // between items
        let mut data = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let payload = &item.data;
            let (transport, bits) = match item.word_len {
                WordLen::Bit => (TS_RES_BIT, 1u16),
                _ => (TS_RES_BYTE, (payload.len() << 3) as u16),
            };
            data.push(0x00);
            data.push(transport);
            let mut tmp = [0u8; 2];
            BigEndian::write_u16(&mut tmp, bits);
            data.extend_from_slice(&tmp);
            data.extend_from_slice(payload);
            if payload.len() % 2 == 1 && i + 1 < items.len() {
                data.push(0x00);
            }
        }

        let request = Self::build_request(S7_FN_WRITE, &params, &data);
        if request.len() - TPKT_ISO_LEN > self.pdu_length as usize {
            return Err(TransportError::RequestTooLarge);
        }
        self.stream()?.write_all(&request)?;

        let body = self.receive_telegram()?;
        if body.len() < S7_ACK_HEADER_LEN + 2 + items.len() || body[0] != S7_ID {
            return Err(TransportError::IsoInvalidTelegram);
        }
        let count = body[S7_ACK_HEADER_LEN + 1] as usize;
        if count != items.len() {
            return Err(TransportError::IsoInvalidTelegram);
        }
        Ok(body[S7_ACK_HEADER_LEN + 2..S7_ACK_HEADER_LEN + 2 + count].to_vec())
    }

    fn read_area(&mut self, item: &mut PduItem) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let elem_size = item.word_len.bytes_per_element();
        let per_chunk = (self.max_rd_pdu_data as usize / elem_size).max(1) as u16;
        let total = item.size_bytes();
        item.data.resize(total, 0);

        let mut done: u16 = 0;
        while done < item.amount {
            let elems = (item.amount - done).min(per_chunk);
            let mut chunk = PduItem {
                start: item.start + u32::from(done) * elem_size as u32,
                amount: elems,
                data: Vec::new(),
                ..*item
            };

            let mut params = Vec::with_capacity(1 + ITEM_SPEC_LEN);
            params.push(1);
            Self::push_item_spec(&mut params, &chunk);
            let request = Self::build_request(S7_FN_READ, &params, &[]);
            self.stream()?.write_all(&request)?;

            let body = self.receive_telegram()?;
            if body.len() < S7_ACK_HEADER_LEN + 2 + 4 || body[0] != S7_ID {
                return Err(TransportError::IsoInvalidTelegram);
            }
            let code = body[S7_ACK_HEADER_LEN + 2];
            if code != ITEM_OK {
                return Err(Self::map_item_code(code));
            }
            let payload_at = S7_ACK_HEADER_LEN + 2 + 4;
            let size = elems as usize * elem_size;
            if body.len() < payload_at + size {
                return Err(TransportError::IsoInvalidTelegram);
            }
            chunk.data.extend_from_slice(&body[payload_at..payload_at + size]);

            let offset = done as usize * elem_size;
            item.data[offset..offset + size].copy_from_slice(&chunk.data);
            done += elems;
        }
        Ok(())
    }

    fn write_area(&mut self, item: &PduItem) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let elem_size = item.word_len.bytes_per_element();
        let per_chunk = (self.max_wr_pdu_data as usize / elem_size).max(1) as u16;

        let mut done: u16 = 0;
        while done < item.amount {
            let elems = (item.amount - done).min(per_chunk);
            let offset = done as usize * elem_size;
            let size = elems as usize * elem_size;
            let payload = &item.data[offset..offset + size];

            let chunk = PduItem {
                start: item.start + u32::from(done) * elem_size as u32,
                amount: elems,
                data: payload.to_vec(),
                ..*item
            };

            let codes = self.write_multi(std::slice::from_ref(&chunk))?;
            if codes.first().copied() != Some(ITEM_OK) {
                return Err(Self::map_item_code(codes.first().copied().unwrap_or(0)));
            }
            done += elems;
        }
        Ok(())
    }
}

impl Drop for S7TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressDescriptor;

    #[test]
    fn item_from_descriptor_sizes_its_buffer() {
        let d = AddressDescriptor::parse("VB100.12").unwrap();
        let item = PduItem::from_descriptor(&d);
        assert_eq!(item.data.len(), 12);
        assert_eq!(item.amount, 12);
        assert_eq!(item.start, 100);
    }

    #[test]
    fn bit_items_address_bits() {
        let d = AddressDescriptor::parse("V255.3").unwrap();
        let item = PduItem::from_descriptor(&d);
        assert_eq!(item.wire_address(), 255 * 8 + 3);

        let d = AddressDescriptor::parse("VW100").unwrap();
        let item = PduItem::from_descriptor(&d);
        assert_eq!(item.wire_address(), 100 << 3);
    }

    #[test]
    fn iso_header_validation() {
        let good = [ISO_ID, 0, 0, 30, 0x02, 0xF0, EOT];
        assert_eq!(check_iso_packet(240, &good).unwrap(), 23);

        let bad_id = [0x04, 0, 0, 30, 0x02, 0xF0, EOT];
        assert!(matches!(
            check_iso_packet(240, &bad_id),
            Err(TransportError::IsoInvalidHeader)
        ));

        let fragmented = [ISO_ID, 0, 0, 30, 0x02, 0xF0, 0x00];
        assert!(matches!(
            check_iso_packet(240, &fragmented),
            Err(TransportError::IsoFragmentedPacket)
        ));

        let oversized = [ISO_ID, 0, 1, 0, 0x02, 0xF0, EOT];
        assert!(matches!(
            check_iso_packet(240, &oversized),
            Err(TransportError::IsoInvalidTelegram)
        ));
    }

    #[test]
    fn read_request_layout() {
        let d = AddressDescriptor::parse("VW1984").unwrap();
        let item = PduItem::from_descriptor(&d);
        let mut params = vec![1u8];
        S7TcpTransport::push_item_spec(&mut params, &item);
        let request = S7TcpTransport::build_request(S7_FN_READ, &params, &[]);

        assert_eq!(request.len(), 31); // classic single-var read telegram
        assert_eq!(BigEndian::read_u16(&request[2..4]) as usize, request.len());
        assert_eq!(request[7], S7_ID);
        assert_eq!(BigEndian::read_u16(&request[13..15]), 14); // parameter length
        assert_eq!(BigEndian::read_u16(&request[15..17]), 0); // no data section
        assert_eq!(request[17], S7_FN_READ);
        assert_eq!(request[18], 1); // item count
        assert_eq!(request[22], WordLen::Word.code());
        assert_eq!(BigEndian::read_u16(&request[23..25]), 1); // amount
        assert_eq!(BigEndian::read_u16(&request[25..27]), 1); // DB number
        assert_eq!(request[27], Area::DataBlock.code());
        // 24-bit bit-address of byte 1984
        let addr = ((request[28] as u32) << 16) | ((request[29] as u32) << 8) | request[30] as u32;
        assert_eq!(addr, 1984 << 3);
    }

    #[test]
    fn operations_require_a_connection() {
        let mut t = S7TcpTransport::new("192.0.2.1", 0x1000, 0x1001);
        let d = AddressDescriptor::parse("VW0").unwrap();
        let mut items = [PduItem::from_descriptor(&d)];
        assert!(matches!(
            t.read_multi(&mut items),
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            t.write_multi(&items),
            Err(TransportError::NotConnected)
        ));
        assert!(!t.is_connected());
        t.disconnect(); // harmless while disconnected
    }
}

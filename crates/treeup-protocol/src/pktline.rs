//! Pkt-line framing.
//!
//! Every record is prefixed with a 4-hex-digit length that includes the
//! length field itself. `0000` is a flush packet, `0001` a delimiter,
//! `0002` a response-end packet (all v2).

use std::io::{Read, Write};

use crate::ProtocolError;

/// Maximum data per packet (65520 total minus the 4-byte header).
pub const MAX_PKT_DATA_LEN: usize = 65516;

/// One frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Vec<u8>),
    Flush,
    Delimiter,
    ResponseEnd,
}

/// Pkt-line reader over any byte source.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read one frame, or `None` at a clean end of input.
    pub fn try_read_pkt(&mut self) -> Result<Option<PktLine>, ProtocolError> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = self.reader.read(&mut len_buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ProtocolError::InvalidPktLine(
                    "input ends inside a pkt-line length".into(),
                ));
            }
            filled += n;
        }

        let len_str = std::str::from_utf8(&len_buf).map_err(|_| {
            ProtocolError::InvalidPktLine(format!("invalid length bytes: {len_buf:?}"))
        })?;
        let len = usize::from_str_radix(len_str, 16).map_err(|_| {
            ProtocolError::InvalidPktLine(format!("invalid length: {len_str:?}"))
        })?;

        match len {
            0 => Ok(Some(PktLine::Flush)),
            1 => Ok(Some(PktLine::Delimiter)),
            2 => Ok(Some(PktLine::ResponseEnd)),
            3 => Err(ProtocolError::InvalidPktLine(
                "length 3 is invalid (minimum data packet is 4)".into(),
            )),
            _ => {
                let data_len = len - 4;
                if data_len > MAX_PKT_DATA_LEN {
                    return Err(ProtocolError::InvalidPktLine(format!(
                        "packet too long: {data_len} bytes"
                    )));
                }
                let mut data = vec![0u8; data_len];
                self.reader.read_exact(&mut data).map_err(|_| {
                    ProtocolError::InvalidPktLine("input ends inside a pkt-line".into())
                })?;
                Ok(Some(PktLine::Data(data)))
            }
        }
    }

    /// Read one frame; end of input is an error.
    pub fn read_pkt(&mut self) -> Result<PktLine, ProtocolError> {
        self.try_read_pkt()?.ok_or_else(|| {
            ProtocolError::InvalidPktLine("unexpected end of pkt-line stream".into())
        })
    }
}

/// Pkt-line writer.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write one data packet, exactly as given.
    pub fn write_line(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > MAX_PKT_DATA_LEN {
            return Err(ProtocolError::InvalidPktLine(format!(
                "data too long for one pkt-line: {} bytes",
                data.len()
            )));
        }
        write!(self.writer, "{:04x}", data.len() + 4)?;
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Write a flush packet (0000).
    pub fn write_flush(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(b"0000")?;
        Ok(())
    }

    /// Write a delimiter packet (0001).
    pub fn write_delimiter(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(b"0001")?;
        Ok(())
    }
}

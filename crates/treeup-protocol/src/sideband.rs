//! Extraction of the pack stream from a v2 fetch response.
//!
//! The response is a sequence of pkt-line sections (`shallow-info`,
//! `acknowledgments`, `packfile`). Inside the packfile section every data
//! frame is sideband-multiplexed: the first byte selects pack data (1),
//! progress chatter (2), or a fatal server message (3).

use std::io::Cursor;

use crate::pktline::{PktLine, PktLineReader};
use crate::ProtocolError;

const BAND_PACK: u8 = 1;
const BAND_PROGRESS: u8 = 2;
const BAND_ERROR: u8 = 3;

/// Concatenate the pack bytes out of a fetch response body.
pub fn extract_pack(body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut reader = PktLineReader::new(Cursor::new(body));
    let mut pack = Vec::new();
    let mut in_packfile = false;

    while let Some(pkt) = reader.try_read_pkt()? {
        let frame = match pkt {
            PktLine::Data(frame) => frame,
            _ => continue,
        };

        if !in_packfile {
            if trim_newline(&frame) == b"packfile" {
                in_packfile = true;
            }
            continue;
        }

        let Some((&band, payload)) = frame.split_first() else {
            continue;
        };
        match band {
            BAND_PACK => pack.extend_from_slice(payload),
            BAND_PROGRESS => {}
            BAND_ERROR => {
                return Err(ProtocolError::ServerError(
                    String::from_utf8_lossy(trim_newline(payload)).into_owned(),
                ));
            }
            other => {
                return Err(ProtocolError::Protocol(format!(
                    "unknown sideband {other}"
                )));
            }
        }
    }

    if pack.is_empty() {
        return Err(ProtocolError::Protocol(
            "fetch response contains no pack data".into(),
        ));
    }
    Ok(pack)
}

fn trim_newline(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\n') => &line[..line.len() - 1],
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::PktLineWriter;

    fn band_frame(band: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![band];
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn reassembles_pack_from_sideband() {
        let mut writer = PktLineWriter::new(Vec::new());
        writer.write_line(b"shallow-info\n").unwrap();
        writer
            .write_line(format!("shallow {}\n", "11".repeat(20)).as_bytes())
            .unwrap();
        writer.write_delimiter().unwrap();
        writer.write_line(b"packfile\n").unwrap();
        writer.write_line(&band_frame(1, b"PACKdata")).unwrap();
        writer.write_line(&band_frame(2, b"progress noise\n")).unwrap();
        writer.write_line(&band_frame(1, b"more")).unwrap();
        writer.write_flush().unwrap();

        let pack = extract_pack(&writer.into_inner()).unwrap();
        assert_eq!(pack, b"PACKdatamore");
    }

    #[test]
    fn error_band_is_fatal() {
        let mut writer = PktLineWriter::new(Vec::new());
        writer.write_line(b"packfile\n").unwrap();
        writer.write_line(&band_frame(3, b"access denied\n")).unwrap();
        writer.write_flush().unwrap();

        assert!(matches!(
            extract_pack(&writer.into_inner()).unwrap_err(),
            ProtocolError::ServerError(msg) if msg == "access denied"
        ));
    }

    #[test]
    fn response_without_pack_is_error() {
        let mut writer = PktLineWriter::new(Vec::new());
        writer.write_line(b"acknowledgments\n").unwrap();
        writer.write_line(b"NAK\n").unwrap();
        writer.write_flush().unwrap();

        assert!(extract_pack(&writer.into_inner()).is_err());
    }
}

//! Sideband demultiplexing.
//!
//! With side-band negotiated, each data packet carries a band byte:
//! 1 = payload, 2 = progress chatter, 3 = fatal remote error.

use std::io::Read;

use ugit_utils::progress::ProgressSink;

use crate::pktline::{PktLine, PktLineReader};
use crate::ProtocolError;

pub const BAND_DATA: u8 = 1;
pub const BAND_PROGRESS: u8 = 2;
pub const BAND_ERROR: u8 = 3;

/// Drain a sideband-multiplexed stream until flush, forwarding progress and
/// returning the payload bytes.
pub fn demux<R: Read>(
    reader: &mut PktLineReader<R>,
    progress: &ProgressSink,
) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = Vec::new();
    loop {
        match reader.read_pkt()? {
            PktLine::Data(data) => {
                let Some((&band, rest)) = data.split_first() else {
                    continue;
                };
                match band {
                    BAND_DATA => {
                        payload.extend_from_slice(rest);
                        progress.report("Receiving objects", payload.len() as u64, None);
                    }
                    BAND_PROGRESS => {
                        tracing::debug!(
                            remote = %String::from_utf8_lossy(rest).trim_end(),
                            "remote progress"
                        );
                    }
                    BAND_ERROR => {
                        return Err(ProtocolError::Remote(
                            String::from_utf8_lossy(rest).trim_end().to_string(),
                        ));
                    }
                    other => {
                        return Err(ProtocolError::Remote(format!(
                            "unknown sideband {other}"
                        )));
                    }
                }
            }
            PktLine::Flush | PktLine::ResponseEnd => break,
            PktLine::Delimiter => continue,
        }
    }
    Ok(payload)
}

/// Read a raw (non-multiplexed) stream to EOF.
pub fn read_raw<R: Read>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::PktLineWriter;
    use std::io::Cursor;

    #[test]
    fn payload_reassembled_across_packets() {
        let mut buf = Vec::new();
        {
            let mut w = PktLineWriter::new(&mut buf);
            w.write_line(&[BAND_DATA, b'P', b'A']).unwrap();
            w.write_line(&[BAND_PROGRESS, b'h', b'i']).unwrap();
            w.write_line(&[BAND_DATA, b'C', b'K']).unwrap();
            w.write_flush().unwrap();
        }
        let mut reader = PktLineReader::new(Cursor::new(buf));
        let payload = demux(&mut reader, &ProgressSink::discard()).unwrap();
        assert_eq!(payload, b"PACK");
    }

    #[test]
    fn error_band_aborts() {
        let mut buf = Vec::new();
        {
            let mut w = PktLineWriter::new(&mut buf);
            let mut line = vec![BAND_ERROR];
            line.extend_from_slice(b"access denied\n");
            w.write_line(&line).unwrap();
        }
        let mut reader = PktLineReader::new(Cursor::new(buf));
        let err = demux(&mut reader, &ProgressSink::discard()).unwrap_err();
        assert!(matches!(err, ProtocolError::Remote(msg) if msg == "access denied"));
    }
}

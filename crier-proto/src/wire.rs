//! Async record I/O over a reliable byte stream.
//!
//! `read_record` reads exactly one header and exactly the advertised payload;
//! a peer close mid-record surfaces as an I/O error, never a partial record.
//! `write_record` writes the header and payload in full.

use crate::{encode_record, Record, Result, RECORD_HEADER_LEN};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one complete record from the stream.
pub async fn read_record<S>(stream: &mut S) -> Result<Record>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; RECORD_HEADER_LEN];
    stream.read_exact(&mut header).await?;

    let record_type = u16::from_be_bytes([header[0], header[1]]);
    let length = u16::from_be_bytes([header[2], header[3]]) as usize;

    let payload = if length > 0 {
        let mut buf = vec![0u8; length];
        stream.read_exact(&mut buf).await?;
        Bytes::from(buf)
    } else {
        Bytes::new()
    };

    Ok(Record {
        record_type,
        payload,
    })
}

/// Write one complete record to the stream.
pub async fn write_record<S>(stream: &mut S, record: &Record) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let buf = encode_record(record);
    stream.write_all(&buf).await?;
    Ok(())
}

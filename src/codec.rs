//! Append-only result log framing.
//!
//! Each record is a big-endian u32 payload length followed by the JSON
//! serialization of one [`Sample`]. The framing is self-delimiting, so a
//! decoder over the same stream reconstructs the exact sequence. The
//! supervisor serializes concurrent users before anything reaches the
//! encoder, so the codec itself is single-writer.

use std::io::Read;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Error;
use crate::sample::Sample;

pub struct SampleEncoder<W> {
    out: W,
    written: u64,
}

impl<W: AsyncWrite + Unpin> SampleEncoder<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn encode(&mut self, sample: &Sample) -> Result<(), Error> {
        let payload = serde_json::to_vec(sample)
            .map_err(|err| Error::Encode(std::io::Error::other(err)))?;
        self.out
            .write_u32(payload.len() as u32)
            .await
            .map_err(Error::Encode)?;
        self.out.write_all(&payload).await.map_err(Error::Encode)?;
        self.written += 1;
        Ok(())
    }

    /// Flush buffered records and release the writer.
    pub async fn close(mut self) -> Result<(), Error> {
        self.out.flush().await.map_err(Error::Encode)?;
        self.out.shutdown().await.map_err(Error::Encode)
    }
}

pub struct SampleDecoder<R> {
    src: R,
}

impl<R: Read> SampleDecoder<R> {
    pub fn new(src: R) -> Self {
        Self { src }
    }

    fn read_frame(&mut self) -> Result<Option<Sample>, Error> {
        let mut len = [0u8; 4];
        match self.src.read_exact(&mut len) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(Error::Decode(err.to_string())),
        }
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        self.src
            .read_exact(&mut payload)
            .map_err(|err| Error::Decode(format!("truncated record: {err}")))?;
        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|err| Error::Decode(err.to_string()))
    }
}

impl<R: Read> Iterator for SampleDecoder<R> {
    type Item = Result<Sample, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_frame().transpose()
    }
}

/// Decode every record from every source, in source order.
pub fn collect<R: Read>(sources: impl IntoIterator<Item = R>) -> Result<Vec<Sample>, Error> {
    let mut samples = Vec::new();
    for src in sources {
        for record in SampleDecoder::new(src) {
            samples.push(record?);
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::DateTime;

    use super::*;

    fn sample(secs: i64, code: u16) -> Sample {
        Sample {
            code,
            timestamp: DateTime::from_timestamp(secs, 123_456_789).unwrap(),
            latency: Duration::from_micros(1500),
            bytes_out: 10,
            bytes_in: 20,
            error: if code == 0 { "connection refused".into() } else { String::new() },
            method: "GET".into(),
            url: "http://host/a".into(),
        }
    }

    #[tokio::test]
    async fn round_trips_a_sequence() {
        let originals = vec![sample(0, 200), sample(1, 0), sample(2, 503)];
        let mut buf = Vec::new();
        let mut enc = SampleEncoder::new(&mut buf);
        for s in &originals {
            enc.encode(s).await.unwrap();
        }
        assert_eq!(enc.written(), 3);
        enc.close().await.unwrap();

        let decoded: Vec<Sample> = SampleDecoder::new(buf.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, originals);
    }

    #[tokio::test]
    async fn truncated_stream_is_a_decode_error() {
        let mut buf = Vec::new();
        let mut enc = SampleEncoder::new(&mut buf);
        enc.encode(&sample(0, 200)).await.unwrap();
        buf.truncate(buf.len() - 1);

        let results: Vec<_> = SampleDecoder::new(buf.as_slice()).collect();
        assert!(matches!(results.last(), Some(Err(Error::Decode(_)))));
    }

    #[tokio::test]
    async fn collect_concatenates_sources() {
        let mut a = Vec::new();
        let mut enc = SampleEncoder::new(&mut a);
        enc.encode(&sample(0, 200)).await.unwrap();
        enc.close().await.unwrap();

        let mut b = Vec::new();
        let mut enc = SampleEncoder::new(&mut b);
        enc.encode(&sample(1, 200)).await.unwrap();
        enc.close().await.unwrap();

        let all = collect(vec![a.as_slice(), b.as_slice()]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].timestamp, DateTime::from_timestamp(1, 123_456_789).unwrap());
    }
}

//! One-pass STORED zip writer.
//!
//! Members are sent as they are read from disk, each followed by a data
//! descriptor carrying its CRC. Sizes come from file metadata up front, so
//! the total archive length is known before the first byte goes out. The
//! central directory closes the stream.

use bytes::{BufMut, Bytes, BytesMut};
use futures::channel::mpsc;
use futures::SinkExt;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::io::AsyncReadExt;

use geonode_storage::{ByteStream, StorageError};

use crate::error::{AssetError, AssetResult};

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

const LOCAL_HEADER_LEN: u64 = 30;
const DATA_DESCRIPTOR_LEN: u64 = 16;
const CENTRAL_HEADER_LEN: u64 = 46;
const END_OF_CENTRAL_DIRECTORY_LEN: u64 = 22;

const VERSION: u16 = 20;
/// Sizes and CRC follow the data; names are UTF-8.
const FLAGS: u16 = 0x0008 | 0x0800;
const STORED: u16 = 0;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct Member {
    name: String,
    path: PathBuf,
    size: u64,
    dos_time: u16,
    dos_date: u16,
}

/// Members with their sizes resolved, ready to stream.
#[derive(Debug)]
pub struct ZipPlan {
    members: Vec<Member>,
    length: u64,
    latest: SystemTime,
}

impl ZipPlan {
    /// Stat every `(entry name, path)`. Archives needing zip64 records are
    /// refused.
    pub fn new(entries: Vec<(String, PathBuf)>) -> AssetResult<Self> {
        if entries.len() > u16::MAX as usize {
            return Err(too_large());
        }
        let mut members = Vec::with_capacity(entries.len());
        let mut latest = SystemTime::UNIX_EPOCH;
        let mut length = END_OF_CENTRAL_DIRECTORY_LEN;
        let mut central_size: u64 = 0;
        for (name, path) in entries {
            let metadata = std::fs::metadata(&path)?;
            let modified = metadata.modified()?;
            latest = latest.max(modified);
            let (dos_time, dos_date) = dos_date_time(modified);
            let name_len = name.len() as u64;
            if metadata.len() >= u32::MAX as u64 || name_len > u16::MAX as u64 {
                return Err(too_large());
            }
            length += LOCAL_HEADER_LEN + name_len + metadata.len() + DATA_DESCRIPTOR_LEN;
            central_size += CENTRAL_HEADER_LEN + name_len;
            members.push(Member {
                name,
                path,
                size: metadata.len(),
                dos_time,
                dos_date,
            });
        }
        length += central_size;
        if length >= u32::MAX as u64 {
            return Err(too_large());
        }
        Ok(Self {
            members,
            length,
            latest,
        })
    }

    /// Exact byte length of the archive.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Newest member modification time.
    pub fn latest(&self) -> SystemTime {
        self.latest
    }

    /// Stream the archive. A member whose size changed since planning ends
    /// the stream with an error.
    pub fn into_stream(self) -> ByteStream {
        let (mut tx, rx) = mpsc::channel::<Result<Bytes, StorageError>>(4);
        tokio::spawn(async move {
            if let Err(e) = write_archive(self.members, &mut tx).await {
                tracing::warn!(error = %e, "Zip stream aborted");
                let _ = tx.send(Err(e)).await;
            }
        });
        Box::pin(rx)
    }
}

type Sender = mpsc::Sender<Result<Bytes, StorageError>>;

struct Written {
    crc: u32,
    offset: u32,
}

async fn send(tx: &mut Sender, bytes: Bytes) -> Result<(), StorageError> {
    tx.send(Ok(bytes))
        .await
        .map_err(|_| StorageError::DownloadFailed("download receiver dropped".to_string()))
}

async fn write_archive(members: Vec<Member>, tx: &mut Sender) -> Result<(), StorageError> {
    let mut offset: u64 = 0;
    let mut written = Vec::with_capacity(members.len());

    for member in &members {
        send(tx, local_header(member)).await?;
        let header_offset = offset;
        offset += LOCAL_HEADER_LEN + member.name.len() as u64;

        let mut file = tokio::fs::File::open(&member.path).await?;
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = member.size;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let read = file.read(&mut buf[..want]).await?;
            if read == 0 {
                return Err(size_changed(member));
            }
            hasher.update(&buf[..read]);
            remaining -= read as u64;
            send(tx, Bytes::copy_from_slice(&buf[..read])).await?;
        }
        if file.read(&mut buf[..1]).await? != 0 {
            return Err(size_changed(member));
        }
        offset += member.size;

        let crc = hasher.finalize();
        send(tx, data_descriptor(crc, member.size as u32)).await?;
        offset += DATA_DESCRIPTOR_LEN;
        written.push(Written {
            crc,
            offset: header_offset as u32,
        });
    }

    let central_offset = offset as u32;
    let mut central = BytesMut::new();
    for (member, done) in members.iter().zip(&written) {
        central_header(&mut central, member, done);
    }
    let central_size = central.len() as u32;
    central.put_u32_le(END_OF_CENTRAL_DIRECTORY_SIGNATURE);
    central.put_u16_le(0);
    central.put_u16_le(0);
    central.put_u16_le(members.len() as u16);
    central.put_u16_le(members.len() as u16);
    central.put_u32_le(central_size);
    central.put_u32_le(central_offset);
    central.put_u16_le(0);
    send(tx, central.freeze()).await
}

fn local_header(member: &Member) -> Bytes {
    let mut out = BytesMut::with_capacity(LOCAL_HEADER_LEN as usize + member.name.len());
    out.put_u32_le(LOCAL_HEADER_SIGNATURE);
    out.put_u16_le(VERSION);
    out.put_u16_le(FLAGS);
    out.put_u16_le(STORED);
    out.put_u16_le(member.dos_time);
    out.put_u16_le(member.dos_date);
    // CRC and sizes are in the data descriptor.
    out.put_u32_le(0);
    out.put_u32_le(0);
    out.put_u32_le(0);
    out.put_u16_le(member.name.len() as u16);
    out.put_u16_le(0);
    out.put_slice(member.name.as_bytes());
    out.freeze()
}

fn data_descriptor(crc: u32, size: u32) -> Bytes {
    let mut out = BytesMut::with_capacity(DATA_DESCRIPTOR_LEN as usize);
    out.put_u32_le(DATA_DESCRIPTOR_SIGNATURE);
    out.put_u32_le(crc);
    out.put_u32_le(size);
    out.put_u32_le(size);
    out.freeze()
}

fn central_header(out: &mut BytesMut, member: &Member, done: &Written) {
    out.put_u32_le(CENTRAL_HEADER_SIGNATURE);
    out.put_u16_le(VERSION);
    out.put_u16_le(VERSION);
    out.put_u16_le(FLAGS);
    out.put_u16_le(STORED);
    out.put_u16_le(member.dos_time);
    out.put_u16_le(member.dos_date);
    out.put_u32_le(done.crc);
    out.put_u32_le(member.size as u32);
    out.put_u32_le(member.size as u32);
    out.put_u16_le(member.name.len() as u16);
    out.put_u16_le(0);
    out.put_u16_le(0);
    out.put_u16_le(0);
    out.put_u16_le(0);
    out.put_u32_le(0);
    out.put_u32_le(done.offset);
    out.put_slice(member.name.as_bytes());
}

/// MS-DOS time and date fields. Times before 1980 are clamped.
fn dos_date_time(modified: SystemTime) -> (u16, u16) {
    let stamp = time::OffsetDateTime::from(modified);
    if stamp.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let year = (stamp.year() - 1980).min(127) as u16;
    let time = ((stamp.hour() as u16) << 11) | ((stamp.minute() as u16) << 5) | (stamp.second() as u16 / 2);
    let date = (year << 9) | ((u8::from(stamp.month()) as u16) << 5) | stamp.day() as u16;
    (time, date)
}

fn too_large() -> AssetError {
    AssetError::Archive("Archive is too large to stream".to_string())
}

fn size_changed(member: &Member) -> StorageError {
    StorageError::DownloadFailed(format!("{} changed while being zipped", member.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Read;
    use tempfile::tempdir;

    #[tokio::test]
    async fn archive_matches_the_planned_length() {
        let dir = tempdir().unwrap();
        let mut entries = Vec::new();
        for (name, content) in [("a.shp", vec![7u8; 150_000]), ("styles/a.sld", b"<sld/>".to_vec())] {
            let path = dir.path().join(name.replace('/', "_"));
            std::fs::write(&path, &content).unwrap();
            entries.push((name.to_string(), path));
        }

        let plan = ZipPlan::new(entries).unwrap();
        let length = plan.length();
        let chunks: Vec<Bytes> = plan.into_stream().try_collect().await.unwrap();
        assert!(chunks.len() > 2);
        let bytes = chunks.concat();
        assert_eq!(bytes.len() as u64, length);

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut member = archive.by_name("a.shp").unwrap();
        let mut content = Vec::new();
        member.read_to_end(&mut content).unwrap();
        assert_eq!(content, vec![7u8; 150_000]);
        drop(member);
        let mut style = String::new();
        archive.by_name("styles/a.sld").unwrap().read_to_string(&mut style).unwrap();
        assert_eq!(style, "<sld/>");
    }

    #[tokio::test]
    async fn shrinking_member_fails_the_stream() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, b"x,y\n1,2\n").unwrap();
        let plan = ZipPlan::new(vec![("a.csv".to_string(), path.clone())]).unwrap();
        std::fs::write(&path, b"x").unwrap();

        let result: Result<Vec<Bytes>, _> = plan.into_stream().try_collect().await;
        assert!(matches!(result, Err(StorageError::DownloadFailed(_))));
    }

    #[test]
    fn dos_fields_are_packed() {
        let stamp = time::Date::from_calendar_date(2024, time::Month::March, 15)
            .unwrap()
            .with_hms(13, 45, 30)
            .unwrap()
            .assume_utc();
        assert_eq!(
            dos_date_time(stamp.into()),
            ((13 << 11) | (45 << 5) | 15, (44 << 9) | (3 << 5) | 15)
        );
        assert_eq!(dos_date_time(SystemTime::UNIX_EPOCH), (0, (1 << 5) | 1));
    }
}

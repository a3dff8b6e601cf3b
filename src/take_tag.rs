//! Provenance stamp for finished mixdowns.
//!
//! A RIFF `LIST/INFO` chunk is inserted ahead of the `data` chunk with two
//! fields: `ISFT` names the software, and `ICMT` carries
//! `KARA:take=<uuid>;recorded=<utc>;voice_md5=<hex>;source=<reference>`.
//! The voice hash covers only the PCM payload of the normalized take, so
//! re-tagging never changes it.

use chrono::Utc;
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use uuid::Uuid;

const TAG_PREFIX: &str = "KARA:";
const MAX_WAV_SIZE: u64 = 4 * 1024 * 1024 * 1024;
const MAX_INFO_SIZE: u32 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct TakeTag {
    pub take_id: String,
    pub recorded_at: String,
    pub voice_md5: String,
    pub source: String,
    pub software: String,
}

impl TakeTag {
    /// A fresh tag for a take made just now.
    pub fn new(voice_md5: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            take_id: Uuid::new_v4().to_string(),
            recorded_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            voice_md5: voice_md5.into(),
            source: source.into(),
            software: format!("kara-studio-v{}", env!("CARGO_PKG_VERSION")),
        }
    }

    fn comment(&self) -> String {
        // ';' separates fields, so it cannot appear inside a value
        let source = self.source.replace(';', "%3B");
        format!(
            "{TAG_PREFIX}take={};recorded={};voice_md5={};source={source}",
            self.take_id, self.recorded_at, self.voice_md5
        )
    }

    fn from_comment(comment: &str, software: String) -> Option<Self> {
        let body = comment.strip_prefix(TAG_PREFIX)?;
        let mut tag = Self {
            take_id: String::new(),
            recorded_at: String::new(),
            voice_md5: String::new(),
            source: String::new(),
            software,
        };

        for part in body.split(';') {
            if let Some((key, value)) = part.split_once('=') {
                match key {
                    "take" => tag.take_id = value.to_string(),
                    "recorded" => tag.recorded_at = value.to_string(),
                    "voice_md5" => tag.voice_md5 = value.to_string(),
                    "source" => tag.source = value.replace("%3B", ";"),
                    _ => {}
                }
            }
        }

        Some(tag)
    }
}

/// Tag `mix_path` in place with a new take id and the hash of `voice_path`.
pub fn stamp(mix_path: &Path, voice_path: &Path, source: &str) -> Result<TakeTag, Box<dyn Error>> {
    let tag = TakeTag::new(data_md5(voice_path)?, source);

    let staging = mix_path.with_extension("wav.tagging");
    write(mix_path, &staging, &tag)?;
    fs::rename(&staging, mix_path)?;

    log::info!("Tagged {} as take {}", mix_path.display(), tag.take_id);
    Ok(tag)
}

/// MD5 of the `data` chunk payload.
pub fn data_md5(path: &Path) -> Result<String, Box<dyn Error>> {
    let mut reader = open_wave(path)?;

    while let Some((id, size)) = next_chunk(&mut reader)? {
        if &id == b"data" {
            let mut context = md5::Context::new();
            let mut buffer = [0u8; 8192];
            let mut remaining = size as usize;

            while remaining > 0 {
                let want = remaining.min(buffer.len());
                let n = reader.read(&mut buffer[..want])?;
                if n == 0 {
                    return Err("Unexpected end of file in data chunk".into());
                }
                context.consume(&buffer[..n]);
                remaining -= n;
            }
            return Ok(format!("{:x}", context.finalize()));
        }
        skip_chunk(&mut reader, size)?;
    }

    Err("Data chunk not found".into())
}

/// Read the stamp back. `Ok(None)` for WAVs without one.
pub fn read(path: &Path) -> Result<Option<TakeTag>, Box<dyn Error>> {
    let mut reader = open_wave(path)?;

    while let Some((id, size)) = next_chunk(&mut reader)? {
        if &id == b"LIST" && size >= 4 {
            let mut list_type = [0u8; 4];
            reader.read_exact(&mut list_type)?;
            if &list_type == b"INFO" {
                return parse_info(&mut reader, size - 4);
            }
            // Same parity as `size`, so the pad byte is still skipped
            skip_chunk(&mut reader, size - 4)?;
        } else {
            skip_chunk(&mut reader, size)?;
        }
    }

    Ok(None)
}

/// Copy `input` to `output` with any existing INFO list replaced by `tag`.
///
/// Chunks ahead of `data` are buffered; the audio itself is streamed.
pub fn write(input: &Path, output: &Path, tag: &TakeTag) -> Result<(), Box<dyn Error>> {
    let len = fs::metadata(input)?.len();
    let mut reader = open_wave(input)?;
    let mut before_data = Vec::new();

    loop {
        let Some((id, size)) = next_chunk(&mut reader)? else {
            return Err("Data chunk not found".into());
        };
        if &id == b"data" {
            reader.seek(SeekFrom::Current(-8))?;
            break;
        }

        let padded = size as u64 + (size % 2) as u64;
        if padded > MAX_INFO_SIZE as u64 {
            return Err(format!(
                "{} chunk too large: {size} bytes",
                String::from_utf8_lossy(&id)
            )
            .into());
        }
        let mut body = vec![0u8; padded as usize];
        reader.read_exact(&mut body)?;

        let is_info = &id == b"LIST" && body.starts_with(b"INFO");
        if !is_info {
            before_data.extend(&id);
            before_data.extend(&size.to_le_bytes());
            before_data.extend(body);
        }
    }

    let data_len = len - reader.stream_position()?;
    let info = info_chunk(tag);
    let riff_size = 4 + before_data.len() as u64 + info.len() as u64 + data_len;
    let riff_size = u32::try_from(riff_size).map_err(|_| "Tagged file would exceed 4 GiB")?;

    let mut writer = BufWriter::new(File::create(output)?);
    writer.write_all(b"RIFF")?;
    writer.write_all(&riff_size.to_le_bytes())?;
    writer.write_all(b"WAVE")?;
    writer.write_all(&before_data)?;
    writer.write_all(&info)?;
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    Ok(())
}

fn info_chunk(tag: &TakeTag) -> Vec<u8> {
    let mut fields = Vec::new();
    push_field(&mut fields, b"ISFT", tag.software.as_bytes());
    push_field(&mut fields, b"ICMT", tag.comment().as_bytes());

    let mut chunk = Vec::with_capacity(fields.len() + 12);
    chunk.extend(b"LIST");
    chunk.extend(&((fields.len() + 4) as u32).to_le_bytes());
    chunk.extend(b"INFO");
    chunk.extend(fields);
    chunk
}

fn push_field(out: &mut Vec<u8>, id: &[u8; 4], value: &[u8]) {
    out.extend(id);
    out.extend(&(value.len() as u32).to_le_bytes());
    out.extend(value);
    if value.len() % 2 == 1 {
        out.push(0);
    }
}

fn parse_info(reader: &mut impl Read, size: u32) -> Result<Option<TakeTag>, Box<dyn Error>> {
    if size > MAX_INFO_SIZE {
        return Err(format!("INFO chunk too large: {size} bytes").into());
    }

    let mut software = String::new();
    let mut comment = None;
    let mut consumed = 0u32;

    while consumed + 8 <= size {
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let field_size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if field_size > size - consumed - 8 {
            return Err("Invalid INFO field size".into());
        }

        let mut value = vec![0u8; field_size as usize];
        reader.read_exact(&mut value)?;
        let text = String::from_utf8_lossy(&value)
            .trim_end_matches('\0')
            .to_string();

        match &header[0..4] {
            b"ISFT" => software = text,
            b"ICMT" if text.starts_with(TAG_PREFIX) => comment = Some(text),
            _ => {}
        }

        consumed += 8 + field_size;
        if field_size % 2 == 1 && consumed < size {
            let mut pad = [0u8; 1];
            reader.read_exact(&mut pad)?;
            consumed += 1;
        }
    }

    Ok(comment.and_then(|c| TakeTag::from_comment(&c, software)))
}

fn open_wave(path: &Path) -> Result<BufReader<File>, Box<dyn Error>> {
    let len = fs::metadata(path)?.len();
    if len > MAX_WAV_SIZE {
        return Err(format!("File too large: {len} bytes").into());
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut header = [0u8; 12];
    reader.read_exact(&mut header)?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err("Not a RIFF WAVE file".into());
    }
    Ok(reader)
}

/// Chunk id and size, or `None` at end of file.
fn next_chunk(reader: &mut impl Read) -> Result<Option<([u8; 4], u32)>, Box<dyn Error>> {
    let mut header = [0u8; 8];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let id = [header[0], header[1], header[2], header[3]];
    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    Ok(Some((id, size)))
}

fn skip_chunk(reader: &mut impl Seek, size: u32) -> Result<(), Box<dyn Error>> {
    let padded = size as i64 + (size % 2) as i64;
    reader.seek(SeekFrom::Current(padded))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_wav(path: &Path, value: i16) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..200 {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_stamp_and_read() {
        let dir = tempdir().unwrap();
        let mix = dir.path().join("karaoke_mix.wav");
        let voice = dir.path().join("Voice.wav");
        create_test_wav(&mix, 100);
        create_test_wav(&voice, 7);

        let tag = stamp(&mix, &voice, "asset:song.mp3").unwrap();
        let back = read(&mix).unwrap().unwrap();

        assert_eq!(back, tag);
        assert_eq!(back.voice_md5, data_md5(&voice).unwrap());
        assert!(back.software.starts_with("kara-studio-v"));
    }

    #[test]
    fn test_stamp_keeps_audio_readable() {
        let dir = tempdir().unwrap();
        let mix = dir.path().join("mix.wav");
        let voice = dir.path().join("voice.wav");
        create_test_wav(&mix, 1234);
        create_test_wav(&voice, 0);
        let before = data_md5(&mix).unwrap();

        stamp(&mix, &voice, "/music/song.mp3").unwrap();

        assert_eq!(data_md5(&mix).unwrap(), before);
        let mut reader = hound::WavReader::open(&mix).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert!(reader.samples::<i16>().all(|s| s.unwrap() == 1234));
    }

    #[test]
    fn test_restamp_replaces_tag() {
        let dir = tempdir().unwrap();
        let mix = dir.path().join("mix.wav");
        let voice = dir.path().join("voice.wav");
        create_test_wav(&mix, 1);
        create_test_wav(&voice, 2);

        let first = stamp(&mix, &voice, "a").unwrap();
        let size_after_first = fs::metadata(&mix).unwrap().len();
        let second = stamp(&mix, &voice, "b").unwrap();

        assert_ne!(first.take_id, second.take_id);
        assert_eq!(read(&mix).unwrap().unwrap().source, "b");
        assert_eq!(fs::metadata(&mix).unwrap().len(), size_after_first);
    }

    #[test]
    fn test_source_with_separator() {
        let dir = tempdir().unwrap();
        let mix = dir.path().join("mix.wav");
        let voice = dir.path().join("voice.wav");
        create_test_wav(&mix, 1);
        create_test_wav(&voice, 2);

        stamp(&mix, &voice, "https://example.com/a;b.mp3").unwrap();
        assert_eq!(
            read(&mix).unwrap().unwrap().source,
            "https://example.com/a;b.mp3"
        );
    }

    #[test]
    fn test_data_md5_spans_multiple_reads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        let mut expected = md5::Context::new();
        for i in 0..10_000i32 {
            let sample = (i % 3000) as i16;
            writer.write_sample(sample).unwrap();
            expected.consume(sample.to_le_bytes());
        }
        writer.finalize().unwrap();

        assert_eq!(data_md5(&path).unwrap(), format!("{:x}", expected.finalize()));
    }

    #[test]
    fn test_write_requires_data_chunk() {
        let dir = tempdir().unwrap();
        let headless = dir.path().join("headless.wav");
        let mut bytes = Vec::new();
        bytes.extend(b"RIFF");
        bytes.extend(&4u32.to_le_bytes());
        bytes.extend(b"WAVE");
        fs::write(&headless, bytes).unwrap();

        let tag = TakeTag::new("00", "song");
        assert!(write(&headless, &dir.path().join("out.wav"), &tag).is_err());
    }

    #[test]
    fn test_untagged_and_invalid_files() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.wav");
        create_test_wav(&plain, 0);
        assert_eq!(read(&plain).unwrap(), None);

        let junk = dir.path().join("junk.wav");
        fs::write(&junk, b"definitely not riff").unwrap();
        assert!(read(&junk).is_err());
        assert!(data_md5(&junk).is_err());
    }
}

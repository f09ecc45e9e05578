//! Binary wire primitives for the snapshot body
//!
//! Everything in the compressed body is little-endian; strings are
//! u16-length-prefixed UTF-8. These helpers keep the table codecs in
//! `store.rs` and `incidental.rs` free of byte twiddling.

use std::io::{self, Read, Write};

/// Upper bound on any single length-prefixed string, as a corruption guard
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Upper bound on any single length-prefixed blob (16 MiB). Entity and
/// incidental payloads are small JSON documents; anything near this limit is
/// a corrupt length field, not data.
pub const MAX_BLOB_LEN: usize = 16 * 1024 * 1024;

pub fn write_u8<W: Write + ?Sized>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub fn write_u16<W: Write + ?Sized>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u32<W: Write + ?Sized>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_i32<W: Write + ?Sized>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_i64<W: Write + ?Sized>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32<W: Write + ?Sized>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f64<W: Write + ?Sized>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_bool<W: Write + ?Sized>(w: &mut W, v: bool) -> io::Result<()> {
    write_u8(w, v as u8)
}

pub fn write_str<W: Write + ?Sized>(w: &mut W, s: &str) -> io::Result<()> {
    if s.len() > MAX_STRING_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string of {} bytes exceeds wire limit", s.len()),
        ));
    }
    write_u16(w, s.len() as u16)?;
    w.write_all(s.as_bytes())
}

/// Length-prefixed opaque byte blob (u32 length)
pub fn write_blob<W: Write + ?Sized>(w: &mut W, blob: &[u8]) -> io::Result<()> {
    if blob.len() > MAX_BLOB_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("blob of {} bytes exceeds wire limit", blob.len()),
        ));
    }
    write_u32(w, blob.len() as u32)?;
    w.write_all(blob)
}

pub fn read_u8<R: Read + ?Sized>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u16<R: Read + ?Sized>(r: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32<R: Read + ?Sized>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_i32<R: Read + ?Sized>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn read_i64<R: Read + ?Sized>(r: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn read_f32<R: Read + ?Sized>(r: &mut R) -> io::Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

pub fn read_f64<R: Read + ?Sized>(r: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

pub fn read_bool<R: Read + ?Sized>(r: &mut R) -> io::Result<bool> {
    Ok(read_u8(r)? != 0)
}

pub fn read_str<R: Read + ?Sized>(r: &mut R) -> io::Result<String> {
    let len = read_u16(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad utf8: {}", e)))
}

pub fn read_blob<R: Read + ?Sized>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(r)? as usize;
    if len > MAX_BLOB_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("blob length {} exceeds wire limit", len),
        ));
    }
    // Read through `take` so a truncated stream fails without first
    // allocating the full declared length.
    let mut buf = Vec::new();
    (&mut *r).take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("blob truncated: wanted {} bytes, got {}", len, buf.len()),
        ));
    }
    Ok(buf)
}

/// Skip over a length-prefixed blob without materializing it
pub fn skip_blob<R: Read + ?Sized>(r: &mut R) -> io::Result<()> {
    let len = read_u32(r)? as u64;
    io::copy(&mut r.take(len), &mut io::sink()).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_scalar_roundtrip() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0xDEAD_BEEF).unwrap();
        write_i32(&mut buf, -42).unwrap();
        write_f64(&mut buf, 1.5).unwrap();
        write_bool(&mut buf, true).unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_u32(&mut r).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_i32(&mut r).unwrap(), -42);
        assert_eq!(read_f64(&mut r).unwrap(), 1.5);
        assert!(read_bool(&mut r).unwrap());
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = Vec::new();
        write_str(&mut buf, "c_0_4_-2").unwrap();
        write_str(&mut buf, "").unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_str(&mut r).unwrap(), "c_0_4_-2");
        assert_eq!(read_str(&mut r).unwrap(), "");
    }

    #[test]
    fn test_blob_skip() {
        let mut buf = Vec::new();
        write_blob(&mut buf, &[1, 2, 3, 4]).unwrap();
        write_u8(&mut buf, 9).unwrap();

        let mut r = Cursor::new(buf);
        skip_blob(&mut r).unwrap();
        assert_eq!(read_u8(&mut r).unwrap(), 9);
    }

    #[test]
    fn test_blob_roundtrip_through_dyn_writer() {
        let mut buf = Vec::new();
        {
            let w: &mut dyn std::io::Write = &mut buf;
            write_blob(w, &[7, 8, 9]).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        let r: &mut dyn Read = &mut cursor;
        assert_eq!(read_blob(r).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_oversized_blob_length_rejected() {
        let mut buf = Vec::new();
        write_u32(&mut buf, u32::MAX).unwrap();
        let err = read_blob(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_blob_fails_without_filling() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 1024).unwrap();
        buf.extend_from_slice(&[0u8; 16]); // far short of the declared length
        let err = read_blob(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_truncated_string_fails() {
        let mut buf = Vec::new();
        write_u16(&mut buf, 10).unwrap(); // claims 10 bytes, provides none
        assert!(read_str(&mut Cursor::new(buf)).is_err());
    }
}

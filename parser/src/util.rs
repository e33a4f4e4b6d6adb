use std::io::Read;

use anyhow::Result;

pub fn u1(r: &mut impl Read) -> Result<u8> {
    let mut buf = [0; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn u2(r: &mut impl Read) -> Result<u16> {
    let mut buf = [0; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

pub fn u4(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub fn i8(r: &mut impl Read) -> Result<i64> {
    let mut buf = [0; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

pub fn i4(r: &mut impl Read) -> Result<i32> {
    let mut buf = [0; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub fn f4(r: &mut impl Read) -> Result<f32> {
    let mut buf = [0; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_be_bytes(buf))
}

pub fn f8(r: &mut impl Read) -> Result<f64> {
    let mut buf = [0; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_be_bytes(buf))
}

/// Class files store modified UTF-8; anything std rejects is decoded lossily.
pub fn utf8(r: &mut impl Read, length: usize) -> Result<String> {
    let buf = vec(r, length)?;
    Ok(match String::from_utf8(buf) {
        Ok(s) => s,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    })
}

pub fn vec(r: &mut impl Read, length: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; length];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn big_endian() {
        let mut r = Cursor::new(vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x07, 0xff]);
        assert_eq!(u2(&mut r).unwrap(), 0x0102);
        assert_eq!(u4(&mut r).unwrap(), 7);
        assert_eq!(u1(&mut r).unwrap(), 0xff);
        assert!(u1(&mut r).is_err());
    }

    #[test]
    fn lossy_utf8() {
        let mut r = Cursor::new(vec![b'a', 0xc0, 0x80, b'b']);
        let s = utf8(&mut r, 4).unwrap();
        assert!(s.starts_with('a'));
        assert!(s.ends_with('b'));
    }
}

//! GGUF header parser.
//!
//! Only the key/value section is read; tensor infos and tensor data are never touched.
//!
//! # Format
//! ```text
//! [4 bytes: magic "GGUF"]
//! [u32: version (2 or 3)]
//! [u64: tensor_count]
//! [u64: kv_count]
//! kv_count × { key: gguf_string, value_type: u32, value }
//! ```
//! A `gguf_string` is a `u64` byte length followed by UTF-8 bytes. All integers are
//! little-endian.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

const MAGIC: [u8; 4] = *b"GGUF";

/// Longest string we are willing to allocate for (chat templates are a few KiB).
const MAX_STRING: u64 = 4 << 20;
const MAX_KV: u64 = 1 << 20;
const MAX_ARRAY_DEPTH: usize = 4;

/// Keys lifted out of a GGUF header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub architecture: Option<String>,
    pub context_length: Option<u64>,
    pub chat_template: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bool,
    String,
    Array,
    U64,
    I64,
    F64,
}

impl ValueType {
    fn from_u32(v: u32) -> io::Result<Self> {
        Ok(match v {
            0 => Self::U8,
            1 => Self::I8,
            2 => Self::U16,
            3 => Self::I16,
            4 => Self::U32,
            5 => Self::I32,
            6 => Self::F32,
            7 => Self::Bool,
            8 => Self::String,
            9 => Self::Array,
            10 => Self::U64,
            11 => Self::I64,
            12 => Self::F64,
            other => return Err(invalid(format!("unknown GGUF value type {other}"))),
        })
    }

    /// Byte width of fixed-size scalars.
    fn width(self) -> Option<u64> {
        match self {
            Self::U8 | Self::I8 | Self::Bool => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::U32 | Self::I32 | Self::F32 => Some(4),
            Self::U64 | Self::I64 | Self::F64 => Some(8),
            Self::String | Self::Array => None,
        }
    }
}

pub fn read_header(path: &Path) -> io::Result<GgufHeader> {
    let file = File::open(path)?;
    parse(&mut BufReader::new(file))
}

/// Parse the key/value section from any seekable byte source.
pub fn parse<R: Read + SkipBytes>(r: &mut R) -> io::Result<GgufHeader> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid("not a GGUF file"));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if !(2..=3).contains(&version) {
        return Err(invalid(format!("unsupported GGUF version {version}")));
    }
    let _tensor_count = r.read_u64::<LittleEndian>()?;
    let kv_count = r.read_u64::<LittleEndian>()?;
    if kv_count > MAX_KV {
        return Err(invalid(format!("implausible kv count {kv_count}")));
    }

    let mut header = GgufHeader {
        version,
        ..GgufHeader::default()
    };
    // `{arch}.context_length` may precede `general.architecture`; resolve at the end.
    let mut context_lengths: HashMap<String, u64> = HashMap::new();

    for _ in 0..kv_count {
        let key = read_string(r)?;
        let ty = ValueType::from_u32(r.read_u32::<LittleEndian>()?)?;

        if key == "general.architecture" && ty == ValueType::String {
            header.architecture = Some(read_string(r)?);
        } else if key == "tokenizer.chat_template" && ty == ValueType::String {
            header.chat_template = Some(read_string(r)?);
        } else if let Some(prefix) = key.strip_suffix(".context_length") {
            match read_uint(r, ty)? {
                Some(n) => {
                    context_lengths.insert(prefix.to_string(), n);
                }
                None => skip_value(r, ty, 0)?,
            }
        } else {
            skip_value(r, ty, 0)?;
        }
    }

    header.context_length = match &header.architecture {
        Some(arch) => context_lengths.get(arch).copied(),
        None => None,
    }
    .or_else(|| context_lengths.values().copied().max());

    Ok(header)
}

/// Forward skipping without reading. `BufReader` keeps its buffer when the jump is short.
pub trait SkipBytes {
    fn skip(&mut self, n: u64) -> io::Result<()>;
}

impl<R: io::Read + io::Seek> SkipBytes for BufReader<R> {
    fn skip(&mut self, n: u64) -> io::Result<()> {
        let n = i64::try_from(n).map_err(|_| invalid("skip distance overflows"))?;
        self.seek_relative(n)
    }
}

impl SkipBytes for io::Cursor<Vec<u8>> {
    fn skip(&mut self, n: u64) -> io::Result<()> {
        let pos = self.position().saturating_add(n);
        if pos > self.get_ref().len() as u64 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.set_position(pos);
        Ok(())
    }
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u64::<LittleEndian>()?;
    if len > MAX_STRING {
        return Err(invalid(format!("string of {len} bytes exceeds limit")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Integer values as `u64`; `None` (nothing consumed) for other types.
fn read_uint<R: Read>(r: &mut R, ty: ValueType) -> io::Result<Option<u64>> {
    Ok(Some(match ty {
        ValueType::U8 => r.read_u8()? as u64,
        ValueType::U16 => r.read_u16::<LittleEndian>()? as u64,
        ValueType::U32 => r.read_u32::<LittleEndian>()? as u64,
        ValueType::U64 => r.read_u64::<LittleEndian>()?,
        ValueType::I32 => r.read_i32::<LittleEndian>()?.max(0) as u64,
        ValueType::I64 => r.read_i64::<LittleEndian>()?.max(0) as u64,
        _ => return Ok(None),
    }))
}

fn skip_value<R: Read + SkipBytes>(r: &mut R, ty: ValueType, depth: usize) -> io::Result<()> {
    if let Some(w) = ty.width() {
        return r.skip(w);
    }
    match ty {
        ValueType::String => {
            let len = r.read_u64::<LittleEndian>()?;
            r.skip(len)
        }
        ValueType::Array => {
            if depth >= MAX_ARRAY_DEPTH {
                return Err(invalid("GGUF arrays nested too deeply"));
            }
            let elem = ValueType::from_u32(r.read_u32::<LittleEndian>()?)?;
            let count = r.read_u64::<LittleEndian>()?;
            match elem.width() {
                Some(w) => {
                    let total = count
                        .checked_mul(w)
                        .ok_or_else(|| invalid("array size overflows"))?;
                    r.skip(total)
                }
                None => {
                    for _ in 0..count {
                        skip_value(r, elem, depth + 1)?;
                    }
                    Ok(())
                }
            }
        }
        _ => Ok(()),
    }
}

fn invalid<E: Into<Box<dyn std::error::Error + Send + Sync>>>(msg: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::{Cursor, Write};

    /// Minimal GGUF writer for fixtures.
    pub(crate) struct Fixture {
        buf: Vec<u8>,
        kv: u64,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            Self {
                buf: Vec::new(),
                kv: 0,
            }
        }

        fn key(&mut self, k: &str, ty: u32) {
            put_string(&mut self.buf, k);
            self.buf.write_u32::<LittleEndian>(ty).unwrap();
            self.kv += 1;
        }

        pub(crate) fn string(mut self, k: &str, v: &str) -> Self {
            self.key(k, 8);
            put_string(&mut self.buf, v);
            self
        }

        pub(crate) fn u32(mut self, k: &str, v: u32) -> Self {
            self.key(k, 4);
            self.buf.write_u32::<LittleEndian>(v).unwrap();
            self
        }

        pub(crate) fn f32(mut self, k: &str, v: f32) -> Self {
            self.key(k, 6);
            self.buf.write_f32::<LittleEndian>(v).unwrap();
            self
        }

        pub(crate) fn string_array(mut self, k: &str, items: &[&str]) -> Self {
            self.key(k, 9);
            self.buf.write_u32::<LittleEndian>(8).unwrap();
            self.buf.write_u64::<LittleEndian>(items.len() as u64).unwrap();
            for s in items {
                put_string(&mut self.buf, s);
            }
            self
        }

        pub(crate) fn i32_array(mut self, k: &str, items: &[i32]) -> Self {
            self.key(k, 9);
            self.buf.write_u32::<LittleEndian>(5).unwrap();
            self.buf.write_u64::<LittleEndian>(items.len() as u64).unwrap();
            for v in items {
                self.buf.write_i32::<LittleEndian>(*v).unwrap();
            }
            self
        }

        pub(crate) fn bytes(&self, version: u32) -> Vec<u8> {
            let mut out = Vec::new();
            out.write_all(&MAGIC).unwrap();
            out.write_u32::<LittleEndian>(version).unwrap();
            out.write_u64::<LittleEndian>(0).unwrap();
            out.write_u64::<LittleEndian>(self.kv).unwrap();
            out.extend_from_slice(&self.buf);
            out
        }
    }

    fn put_string(buf: &mut Vec<u8>, s: &str) {
        buf.write_u64::<LittleEndian>(s.len() as u64).unwrap();
        buf.extend_from_slice(s.as_bytes());
    }

    fn parse_bytes(bytes: Vec<u8>) -> io::Result<GgufHeader> {
        parse(&mut Cursor::new(bytes))
    }

    #[test]
    fn reads_known_keys_and_skips_the_rest() {
        let bytes = Fixture::new()
            .string("general.architecture", "llama")
            .string_array("tokenizer.ggml.tokens", &["<s>", "</s>", "hello"])
            .i32_array("tokenizer.ggml.token_type", &[1, 1, 1])
            .f32("llama.rope.freq_base", 10000.0)
            .u32("llama.context_length", 8192)
            .string("tokenizer.chat_template", "{{ messages }}")
            .bytes(3);
        let h = parse_bytes(bytes).unwrap();
        assert_eq!(h.version, 3);
        assert_eq!(h.architecture.as_deref(), Some("llama"));
        assert_eq!(h.context_length, Some(8192));
        assert_eq!(h.chat_template.as_deref(), Some("{{ messages }}"));
    }

    #[test]
    fn context_length_before_architecture_is_resolved() {
        let bytes = Fixture::new()
            .u32("qwen2.context_length", 32768)
            .u32("other.context_length", 99)
            .string("general.architecture", "qwen2")
            .bytes(2);
        let h = parse_bytes(bytes).unwrap();
        assert_eq!(h.context_length, Some(32768));
        assert_eq!(h.chat_template, None);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        assert!(parse_bytes(b"GGML\x03\0\0\0".to_vec()).is_err());
        assert!(parse_bytes(Fixture::new().bytes(1)).is_err());
        assert!(parse_bytes(Fixture::new().bytes(4)).is_err());
    }

    #[test]
    fn truncated_header_is_an_error_not_a_panic() {
        let mut bytes = Fixture::new()
            .string("general.architecture", "llama")
            .string("tokenizer.chat_template", "abcdef")
            .bytes(3);
        bytes.truncate(bytes.len() - 3);
        assert!(parse_bytes(bytes).is_err());
    }

    #[test]
    fn oversized_string_length_is_rejected() {
        let mut bytes = Fixture::new().bytes(3);
        // Patch kv_count to 1 and append a key with an absurd length.
        bytes[16..24].copy_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(parse_bytes(bytes).is_err());
    }
}

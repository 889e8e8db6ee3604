use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::error::ValueError;

/// Primary key of a stored document: 24 lowercase hex characters.
///
/// Generated ids encode 4 bytes of unix seconds, 5 bytes of per-process randomness and a 3 byte
/// counter seeded randomly, so ids minted by one process sort roughly by creation time.
#[derive(PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct DocumentId(String);

struct Generator {
    process: [u8; 5],
    counter: AtomicU32,
}

static GENERATOR: OnceLock<Generator> = OnceLock::new();

fn generator() -> &'static Generator {
    GENERATOR.get_or_init(|| {
        // the low 80 bits of a ulid are random
        let random = Ulid::new().random().to_be_bytes();
        let mut process = [0u8; 5];
        process.copy_from_slice(&random[6..11]);
        Generator { process, counter: AtomicU32::new(u32::from_be_bytes([0, random[11], random[12], random[13]])) }
    })
}

impl DocumentId {
    pub const LEN: usize = 24;

    pub fn new() -> Self {
        let generator = generator();
        let seconds = SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs() as u32).unwrap_or(0);
        let count = generator.counter.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&generator.process);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);

        let mut id = String::with_capacity(Self::LEN);
        for byte in bytes {
            let _ = write!(id, "{byte:02x}");
        }
        DocumentId(id)
    }

    pub fn as_str(&self) -> &str { &self.0 }

    /// Seconds since the unix epoch at which the id was generated.
    pub fn timestamp(&self) -> u32 { u32::from_str_radix(&self.0[..8], 16).unwrap_or(0) }

    pub fn is_valid(candidate: &str) -> bool {
        candidate.len() == Self::LEN && candidate.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl Default for DocumentId {
    fn default() -> Self { Self::new() }
}

impl FromStr for DocumentId {
    type Err = ValueError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::is_valid(s) {
            Ok(DocumentId(s.to_owned()))
        } else {
            Err(ValueError::InvalidId(s.to_owned()))
        }
    }
}

impl TryFrom<String> for DocumentId {
    type Error = ValueError;
    fn try_from(id: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&id) {
            Ok(DocumentId(id))
        } else {
            Err(ValueError::InvalidId(id))
        }
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self { id.0 }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str { &self.0 }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "DocumentId({})", self.0) }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> { serializer.serialize_str(&self.0) }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        DocumentId::try_from(id).map_err(serde::de::Error::custom)
    }
}

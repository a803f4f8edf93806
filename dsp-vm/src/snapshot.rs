//! Savestate structures.
//!
//! Every stateful entity dumps into a serde struct; the whole bundle is
//! versioned and encoded with bincode. Memory windows carry a SHA-256
//! digest that is verified on restore. The active engine's identity is
//! stored ahead of its state so the matching ucode can be instantiated
//! before deserialization.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::hle::base::ReplyCallback;
use crate::sched::EventId;

/// Version identifier for snapshot compatibility checks.
pub const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot version mismatch: got {got}, expected {expected}")]
    VersionMismatch { got: String, expected: String },

    #[error("snapshot references unknown ucode identity {0:#010x}")]
    UnknownUcode(u32),

    #[error("no low-level engine registered for identity {0:#010x}")]
    NoFallbackEngine(u32),

    #[error("{bank} window {slot} digest mismatch")]
    DigestMismatch { bank: &'static str, slot: usize },

    #[error("snapshot encoding failed: {0}")]
    Encode(String),

    #[error("snapshot decoding failed: {0}")]
    Decode(String),
}

/// Full emulator snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub sched: SchedSnapshot,
    pub port: PortSnapshot,
    pub wram: WramSnapshot,
    pub mic: MicSnapshot,
    pub i2s: I2sSnapshot,
}

impl Snapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snap: Snapshot =
            bincode::deserialize(bytes).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        if snap.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                got: snap.version,
                expected: SNAPSHOT_VERSION.to_string(),
            });
        }
        Ok(snap)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedSnapshot {
    pub now: u64,
    pub seq: u64,
    pub entries: Vec<(EventId, u64, u64, u32)>,
}

/// MMIO front-end state, with the engine snapshot nested behind its
/// identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub timestamp: u64,
    pub rst_released: bool,
    pub padr: u16,
    pub pcfg: u16,
    pub psts: u16,
    pub psem: u16,
    pub pmask: u16,
    pub pclear: u16,
    pub cmd: [u16; 3],
    pub rep: [u16; 3],
    pub dma_fifo: Vec<u16>,
    pub dma_len: i32,
    pub ucode: Option<UcodeSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UcodeSnapshot {
    /// `(class << 16) | (version & 0xFFFF)`, read before the state.
    pub id: u32,
    pub base: UcodeBaseState,
    pub var: UcodeVar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UcodeBaseState {
    pub exit: bool,
    pub cmd_reg: [u16; 3],
    pub cmd_written: [bool; 3],
    pub reply_reg: [u16; 3],
    pub reply_written: [bool; 3],
    pub reply_cb: [Option<ReplyCallback>; 3],
    pub sem_in: u16,
    pub sem_out: u16,
    pub sem_mask: u16,
    pub audio_playing: bool,
    pub audio_halve: bool,
    pub audio_addr: u32,
    pub audio_len: u32,
    pub audio_fifo: Vec<i16>,
    pub mic_sampling: bool,
    pub mic_fifo: Vec<i16>,
}

/// Per-variant ucode state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UcodeVar {
    Aac {
        cmd_state: u8,
        cmd_index: u16,
        cmd_param_count: u16,
        cmd_params: Vec<u16>,
        init_stage: u8,
    },
    G711 {
        cmd_state: u8,
        cmd_params: Vec<u16>,
    },
    Graphics {
        cmd_state: u8,
        cmd_index: u16,
        cmd_params: Vec<u16>,
    },
    /// Opaque state blob of an external low-level engine.
    Lle(Vec<u8>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WramSnapshot {
    pub prog: Vec<MemWindowSnapshot>,
    pub data: Vec<MemWindowSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemWindowSnapshot {
    pub hash: String,
    pub data: Option<Vec<u8>>,
}

impl MemWindowSnapshot {
    pub fn from_window(window: Option<&[u8]>) -> Self {
        match window {
            Some(bytes) => Self {
                hash: sha256_hex(bytes),
                data: Some(bytes.to_vec()),
            },
            None => Self {
                hash: String::new(),
                data: None,
            },
        }
    }

    /// Window contents, after digest verification.
    pub fn verified(
        &self,
        bank: &'static str,
        slot: usize,
    ) -> Result<Option<Vec<u8>>, SnapshotError> {
        match &self.data {
            Some(bytes) => {
                if sha256_hex(bytes) != self.hash {
                    return Err(SnapshotError::DigestMismatch { bank, slot });
                }
                Ok(Some(bytes.clone()))
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicSnapshot {
    pub open_mask: u8,
    pub cycle_count: u32,
    pub cur_sample: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct I2sSnapshot {
    pub snd_ex_cnt: u16,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_verification_catches_corruption() {
        let window = vec![0xAAu8; 64];
        let mut snap = MemWindowSnapshot::from_window(Some(&window));
        assert!(snap.verified("data", 0).is_ok());

        snap.data.as_mut().unwrap()[0] = 0xBB;
        assert!(matches!(
            snap.verified("data", 0),
            Err(SnapshotError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn unmapped_window_roundtrips() {
        let snap = MemWindowSnapshot::from_window(None);
        assert_eq!(snap.verified("prog", 3).unwrap(), None);
    }

    #[test]
    fn version_check_on_decode() {
        let snap = Snapshot {
            version: "0.9".to_string(),
            sched: SchedSnapshot { now: 0, seq: 0, entries: vec![] },
            port: PortSnapshot {
                timestamp: 0,
                rst_released: false,
                padr: 0,
                pcfg: 0,
                psts: 0,
                psem: 0,
                pmask: 0,
                pclear: 0,
                cmd: [0; 3],
                rep: [0; 3],
                dma_fifo: vec![],
                dma_len: 0,
                ucode: None,
            },
            wram: WramSnapshot { prog: vec![], data: vec![] },
            mic: MicSnapshot { open_mask: 0, cycle_count: 0, cur_sample: 0 },
            i2s: I2sSnapshot { snd_ex_cnt: 0 },
        };
        let bytes = snap.to_bytes().unwrap();
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(SnapshotError::VersionMismatch { .. })
        ));
    }
}

//! Replay recorder collaborator.
//!
//! The room settle path emits one game-end record per finished round; the
//! recorder turns each player's entry into a `.phirarec` file under
//! `<base>/<userId>/<chartId>/<timestamp>.phirarec`.
//!
//! File header, current form: magic `"PM"` as u16 LE, then chart id, user
//! id, and record id as u32 LE. Two older forms remain readable: a 4-byte
//! `"PHIR"` magic with the same id triple, and a legacy headerless layout
//! that starts directly at the id triple. New files are always written in
//! the `"PM"` form.

use std::{collections::HashMap, io::Write, path::PathBuf, time::SystemTime};

use cadenza_proto::RoomId;

/// `"PM"` magic, written little-endian (`0x4d 0x50` on disk).
pub const MAGIC_PM: u16 = u16::from_le_bytes(*b"MP");

/// Older 4-byte magic.
pub const MAGIC_PHIR: &[u8; 4] = b"PHIR";

/// One player's outcome within a settled round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayRecord {
    /// Uploaded record id reported by the client.
    pub record_id: i32,
    /// Final score.
    pub score: i32,
    /// Accuracy in `[0, 1]`.
    pub accuracy: f32,
    /// Whether the run was a full combo.
    pub full_combo: bool,
}

/// Aggregated outcome of one settled round, handed to the recorder hook.
#[derive(Debug, Clone, PartialEq)]
pub struct GameEndRecord {
    /// Room the round was played in.
    pub room: RoomId,
    /// Chart that was played.
    pub chart_id: i32,
    /// Outcome per finishing player (aborted players are absent).
    pub records: HashMap<i32, PlayRecord>,
}

/// Parsed replay file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayHeader {
    /// Chart id.
    pub chart_id: u32,
    /// User id.
    pub user_id: u32,
    /// Record id.
    pub record_id: u32,
}

/// Game-end sink.
///
/// Invoked outside the server mutex, once per settled round.
pub trait ReplayRecorder: Send + Sync + 'static {
    /// Persist one settled round.
    fn on_game_end(&self, record: &GameEndRecord);
}

/// Recorder that drops everything (replay disabled).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl ReplayRecorder for NullRecorder {
    fn on_game_end(&self, _record: &GameEndRecord) {}
}

/// File-based recorder.
#[derive(Debug, Clone)]
pub struct FileRecorder {
    base: PathBuf,
}

impl FileRecorder {
    /// Recorder rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn write_one(&self, chart_id: i32, user_id: i32, rec: &PlayRecord) -> std::io::Result<PathBuf> {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let dir = self.base.join(user_id.to_string()).join(chart_id.to_string());
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{timestamp}.phirarec"));

        let mut buf = Vec::with_capacity(2 + 4 * 3 + 9);
        buf.extend_from_slice(&MAGIC_PM.to_le_bytes());
        buf.extend_from_slice(&(chart_id as u32).to_le_bytes());
        buf.extend_from_slice(&(user_id as u32).to_le_bytes());
        buf.extend_from_slice(&(rec.record_id as u32).to_le_bytes());
        buf.extend_from_slice(&rec.score.to_le_bytes());
        buf.extend_from_slice(&rec.accuracy.to_le_bytes());
        buf.push(u8::from(rec.full_combo));

        let mut file = std::fs::File::create(&path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(path)
    }
}

impl ReplayRecorder for FileRecorder {
    fn on_game_end(&self, record: &GameEndRecord) {
        for (user_id, rec) in &record.records {
            match self.write_one(record.chart_id, *user_id, rec) {
                Ok(path) => {
                    tracing::debug!(room = %record.room, user = *user_id, ?path, "replay written");
                },
                Err(err) => {
                    tracing::error!(
                        room = %record.room,
                        user = *user_id,
                        "replay write failed: {err}"
                    );
                },
            }
        }
    }
}

/// Parse a replay file header, accepting all three known layouts.
pub fn parse_header(bytes: &[u8]) -> Option<ReplayHeader> {
    let triple = |b: &[u8]| -> Option<ReplayHeader> {
        if b.len() < 12 {
            return None;
        }
        Some(ReplayHeader {
            chart_id: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            user_id: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            record_id: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
        })
    };

    if bytes.len() >= 2 && u16::from_le_bytes([bytes[0], bytes[1]]) == MAGIC_PM {
        return triple(&bytes[2..]);
    }
    if bytes.len() >= 4 && &bytes[..4] == MAGIC_PHIR {
        return triple(&bytes[4..]);
    }
    // Legacy headerless layout.
    triple(bytes)
}

// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Equal-temperament pitch arithmetic.
//!
//! Note names are a pitch class (`A`-`G`), any number of accidentals (`#` or `b`)
//! and an octave number. Pitch numbers are MIDI-like: `C4` is 60, `A4` is 69.

use std::collections::BTreeSet;

/// Number of semitones in an octave.
pub const SEMITONES_PER_OCTAVE: i32 = 12;

/// Default bound for the nearest-sample search (8 octaves).
pub const DEFAULT_SEARCH_BOUND: u32 = 96;

/// Sharp spellings used when converting pitch numbers back to names.
const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Errors produced by pitch arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoteError {
    #[error("invalid note format: '{0}'")]
    InvalidNoteFormat(String),

    #[error("no sample within {bound} semitones of pitch {target}")]
    NoSampleWithinRange { target: i32, bound: u32 },
}

/// The outcome of a nearest-sample search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearestSample {
    /// The available pitch that was chosen.
    pub pitch: i32,
    /// How far the chosen sample must be transposed to reach the target
    /// (`target - chosen`).
    pub semitone_offset: i32,
}

/// Parses a note name such as `C#4`, `Bb3` or `C-1` into a pitch number.
pub fn to_pitch_number(note: &str) -> Result<i32, NoteError> {
    let invalid = || NoteError::InvalidNoteFormat(note.to_string());

    let mut chars = note.char_indices().peekable();
    let (_, letter) = chars.next().ok_or_else(invalid)?;
    let mut semitone = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(invalid()),
    };

    let mut octave_start = note.len();
    while let Some(&(idx, c)) = chars.peek() {
        match c {
            '#' => semitone += 1,
            'b' => semitone -= 1,
            _ => {
                octave_start = idx;
                break;
            }
        }
        chars.next();
    }

    let octave_str = &note[octave_start..];
    let digits = octave_str.strip_prefix('-').unwrap_or(octave_str);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let octave: i32 = octave_str.parse().map_err(|_| invalid())?;

    octave
        .checked_add(1)
        .and_then(|o| o.checked_mul(SEMITONES_PER_OCTAVE))
        .and_then(|p| p.checked_add(semitone))
        .ok_or_else(invalid)
}

/// Converts a pitch number back to a note name, spelled with sharps.
pub fn pitch_to_note_name(pitch: i32) -> String {
    let octave = pitch.div_euclid(SEMITONES_PER_OCTAVE) - 1;
    let class = pitch.rem_euclid(SEMITONES_PER_OCTAVE) as usize;
    format!("{}{}", PITCH_CLASS_NAMES[class], octave)
}

/// Finds the closest available pitch within the default search bound.
pub fn nearest_available(
    target: i32,
    available: &BTreeSet<i32>,
) -> Result<NearestSample, NoteError> {
    nearest_available_within(target, available, DEFAULT_SEARCH_BOUND)
}

/// Searches outward from `target` (0, +1, -1, +2, -2, ...) up to `bound` semitones.
/// When `target + n` and `target - n` are both available the higher pitch wins.
pub fn nearest_available_within(
    target: i32,
    available: &BTreeSet<i32>,
    bound: u32,
) -> Result<NearestSample, NoteError> {
    // Nothing lies beyond the farthest available pitch.
    let (Some(&lowest), Some(&highest)) = (available.first(), available.last()) else {
        return Err(NoteError::NoSampleWithinRange { target, bound });
    };
    let farthest = (i64::from(target) - i64::from(lowest))
        .abs()
        .max((i64::from(highest) - i64::from(target)).abs());
    let max_distance = i32::try_from(farthest.min(i64::from(bound))).unwrap_or(i32::MAX);
    for distance in 0..=max_distance {
        let above = target.checked_add(distance);
        let below = target.checked_sub(distance);
        if above.is_none() && below.is_none() {
            break;
        }
        let candidates = [(above, -distance), (below, distance)];
        for (candidate, semitone_offset) in candidates {
            if let Some(pitch) = candidate.filter(|p| available.contains(p)) {
                return Ok(NearestSample {
                    pitch,
                    semitone_offset,
                });
            }
        }
    }

    Err(NoteError::NoSampleWithinRange { target, bound })
}

/// Playback-rate multiplier that transposes a sample by `offset` semitones.
pub fn semitone_offset_to_rate(offset: f64) -> f64 {
    2f64.powf(offset / SEMITONES_PER_OCTAVE as f64)
}

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::error::Result;
use crate::types::Trigger;
use crate::DEFAULT_TRIGGER_SFREQ;

/// Metadata header of a trigger stream
///
/// Lines of the form `# key=value` become entries; every other `#` line is
/// kept verbatim in [`Preamble::strings`]. Entries keep insertion order, and
/// setting an existing key replaces its value in place.
///
/// # Examples
///
/// ```rust
/// use avgq::Preamble;
///
/// let mut preamble = Preamble::new();
/// preamble.append("# Sfreq=250");
/// preamble.append("# recorded with amplifier A");
/// assert_eq!(preamble.get("Sfreq"), Some("250"));
/// assert_eq!(preamble.sfreq(), Some(250.0));
/// assert_eq!(preamble.strings().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preamble {
    entries: Vec<(String, String)>,
    strings: Vec<String>,
}

impl Preamble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one `#`-prefixed line
    pub fn append(&mut self, line: &str) {
        match parse_preamble_entry(line) {
            Some((name, value)) => self.set(name, value),
            None => self.strings.push(line.to_string()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Sampling frequency from the `Sfreq` entry, if present and numeric
    pub fn sfreq(&self) -> Option<f64> {
        self.get("Sfreq").and_then(|v| v.trim().parse().ok())
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of preamble lines, entries and free strings together
    pub fn len(&self) -> usize {
        self.entries.len() + self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.strings.is_empty()
    }
}

impl fmt::Display for Preamble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.strings {
            writeln!(f, "{}", line)?;
        }
        for (key, value) in &self.entries {
            writeln!(f, "# {}={}", key, value)?;
        }
        Ok(())
    }
}

// "# name=value"，值截止到下一个 '='
fn parse_preamble_entry(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('#')?.trim_start();
    let (name, rest) = rest.split_once('=')?;
    let value = rest.split('=').next().unwrap_or("");
    let name = name.trim();
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name, value))
}

/// What a single line contributed to a trigger stream
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Trigger(Trigger),
    Preamble,
    Skipped,
    /// A record with code `0`: the stream ends here
    End,
}

/// Line-oriented trigger list codec
///
/// Reads and writes `position\tcode[\tdescription]` records preceded by an
/// optional [`Preamble`]. Positions may carry a `s` or `ms` suffix, converted
/// to sample points with the preamble's `Sfreq`. A record whose code is `0`
/// ends the stream, so several streams can be read back to back from one
/// source by calling [`TriggerFile::read_lines`] again.
///
/// # Examples
///
/// ```rust
/// use avgq::{TriggerFile, Trigger};
///
/// let text = "#Sfreq=100\n50\t1\tA\n1.5s\t-1\tB\n0\t0\n";
/// let trgfile = TriggerFile::parse(text.lines());
///
/// assert_eq!(trgfile.preamble.get("Sfreq"), Some("100"));
/// assert_eq!(trgfile.triggers(), &[
///     Trigger::new(50.0, 1).with_description("A"),
///     Trigger::new(150.0, -1).with_description("B"),
/// ]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TriggerFile {
    pub preamble: Preamble,
    triggers: Vec<Trigger>,
    description_codes: Option<HashMap<String, i32>>,
    unknown_descriptions: HashMap<String, i32>,
    start_datetime: Option<NaiveDateTime>,
}

impl TriggerFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing trigger list
    pub fn from_triggers(triggers: Vec<Trigger>) -> Self {
        let mut trgfile = Self::new();
        trgfile.triggers = triggers;
        trgfile
    }

    /// Parses all records from a sequence of lines
    pub fn parse<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut trgfile = Self::new();
        trgfile.read_lines(lines);
        trgfile
    }

    /// Opens and parses a trigger file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut trgfile = Self::new();
        trgfile.read_from(BufReader::new(file))?;
        Ok(trgfile)
    }

    /// Translates descriptions to codes on every following read
    ///
    /// Descriptions missing from the map keep their code and are collected
    /// in [`TriggerFile::unknown_descriptions`].
    pub fn set_description_codes(&mut self, codes: HashMap<String, i32>) {
        self.description_codes = Some(codes);
        self.unknown_descriptions.clear();
    }

    pub fn unknown_descriptions(&self) -> &HashMap<String, i32> {
        &self.unknown_descriptions
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn into_triggers(self) -> Vec<Trigger> {
        self.triggers
    }

    pub fn push(&mut self, trigger: Trigger) {
        self.triggers.push(trigger);
    }

    /// Reads records until the end of the lines or an end-of-stream record
    ///
    /// Returns the number of triggers added.
    pub fn read_lines<I, S>(&mut self, lines: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.triggers.len();
        for line in lines {
            match self.parse_line(line.as_ref()) {
                LineOutcome::Trigger(trigger) => self.triggers.push(trigger),
                LineOutcome::End => break,
                LineOutcome::Preamble | LineOutcome::Skipped => {}
            }
        }
        self.triggers.len() - before
    }

    /// Reads records from a buffered reader, see [`TriggerFile::read_lines`]
    pub fn read_from<R: BufRead>(&mut self, reader: R) -> Result<usize> {
        let before = self.triggers.len();
        for line in reader.lines() {
            match self.parse_line(&line?) {
                LineOutcome::Trigger(trigger) => self.triggers.push(trigger),
                LineOutcome::End => break,
                LineOutcome::Preamble | LineOutcome::Skipped => {}
            }
        }
        Ok(self.triggers.len() - before)
    }

    /// Classifies a single line, updating the preamble as a side effect
    ///
    /// Malformed records are skipped, never reported as errors.
    pub fn parse_line(&mut self, line: &str) -> LineOutcome {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return LineOutcome::Skipped;
        }
        if line.starts_with('#') {
            self.preamble.append(line);
            return LineOutcome::Preamble;
        }

        let mut fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 {
            // 退回到任意空白分隔
            fields = line.split_whitespace().collect();
        }
        if fields.len() < 2 {
            debug!("Skipping trigger record with fewer than 2 fields: {:?}", line);
            return LineOutcome::Skipped;
        }

        let code = fields[1].trim();
        if code == "0" {
            return LineOutcome::End;
        }
        let description = if fields.len() > 2 {
            Some(fields[2..].join("\t"))
        } else {
            None
        };

        // write_crossings -x 输出形如 Lat[ms]=123
        let mut point = fields[0].trim();
        if let Some((_, after)) = point.rsplit_once('=') {
            point = after;
        }

        let sfreq = self.preamble.sfreq();
        let (point, factor) = if let Some(p) = point.strip_suffix("ms") {
            (p, sfreq.map_or(1.0, |sf| sf / 1000.0))
        } else if let Some(p) = point.strip_suffix('s') {
            (p, sfreq.unwrap_or(1.0))
        } else {
            (point, 1.0)
        };

        let position = match point.trim().parse::<f64>() {
            Ok(p) => p * factor,
            Err(_) => {
                debug!("Skipping trigger record with invalid position: {:?}", line);
                return LineOutcome::Skipped;
            }
        };
        let code = match code.parse::<i32>() {
            Ok(c) => c,
            Err(_) => {
                debug!("Skipping trigger record with invalid code: {:?}", line);
                return LineOutcome::Skipped;
            }
        };

        LineOutcome::Trigger(self.translate(Trigger {
            position,
            code,
            description,
        }))
    }

    fn translate(&mut self, mut trigger: Trigger) -> Trigger {
        let Some(codes) = &self.description_codes else {
            return trigger;
        };
        if let Some(description) = &trigger.description {
            match codes.get(description) {
                Some(&code) => trigger.code = code,
                None => {
                    self.unknown_descriptions.insert(description.clone(), trigger.code);
                }
            }
        }
        trigger
    }

    /// Writes the preamble followed by the given records
    ///
    /// No end-of-stream record is written.
    pub fn write_tuples<W: Write>(&self, triggers: &[Trigger], out: &mut W) -> Result<()> {
        write!(out, "{}", self.preamble)?;
        for trigger in triggers {
            writeln!(out, "{}", format_record(trigger))?;
        }
        Ok(())
    }

    /// Writes the preamble and this file's own records
    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        self.write_tuples(&self.triggers, out)
    }

    pub fn set_start_datetime(&mut self, start: NaiveDateTime) {
        self.start_datetime = Some(start);
    }

    /// Triggers with positions mapped to wall-clock time
    ///
    /// Uses the preamble's `Sfreq` (100 Hz if absent) and the configured
    /// start time (2013-01-01 00:00:00 if unset).
    pub fn triggers_abstime(&self) -> Vec<(NaiveDateTime, i32, Option<String>)> {
        let start = self.start_datetime.unwrap_or_else(default_start_datetime);
        let sfreq = self.preamble.sfreq().unwrap_or(DEFAULT_TRIGGER_SFREQ);
        self.triggers
            .iter()
            .map(|t| {
                let micros = (t.position / sfreq * 1_000_000.0).round() as i64;
                (start + Duration::microseconds(micros), t.code, t.description.clone())
            })
            .collect()
    }
}

impl fmt::Display for TriggerFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.preamble)?;
        for trigger in &self.triggers {
            writeln!(f, "{}", format_record(trigger))?;
        }
        Ok(())
    }
}

/// Formats one record as `position\tcode[\tdescription]`
pub fn format_record(trigger: &Trigger) -> String {
    match &trigger.description {
        Some(description) => format!("{}\t{}\t{}", trigger.position, trigger.code, description),
        None => format!("{}\t{}", trigger.position, trigger.code),
    }
}

fn default_start_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2013, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Sub-sample trigger position
///
/// The engine reads at integer points, so a fractional position is split
/// into the rounded point and the remainder in units of `1/upsample`.
/// Halves round away from zero, so 10.5 splits into point 11 and a
/// remainder of `-upsample/2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighresTrigger {
    pub point: i64,
    pub subpoint: i64,
    pub upsample: i64,
}

impl HighresTrigger {
    pub fn from_position(value: f64, upsample: i64) -> Self {
        let readpoint = value.round();
        HighresTrigger {
            point: readpoint as i64,
            subpoint: (upsample as f64 * (value - readpoint)).round() as i64,
            upsample,
        }
    }

    /// Recovers a trigger written by [`HighresTrigger::as_trigger`]
    pub fn from_trigger(trigger: &Trigger, upsample: i64) -> Self {
        let subpoint = trigger
            .description
            .as_deref()
            .and_then(|d| d.trim().parse().ok())
            .unwrap_or(0);
        HighresTrigger {
            point: trigger.position.round() as i64,
            subpoint,
            upsample,
        }
    }

    pub fn float_value(&self) -> f64 {
        self.point as f64 + self.subpoint as f64 / self.upsample as f64
    }

    /// Code-1 trigger carrying the sub-point in its description
    pub fn as_trigger(&self) -> Trigger {
        Trigger::new(self.point as f64, 1).with_description(self.subpoint.to_string())
    }
}

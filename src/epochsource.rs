use tracing::debug;

use crate::error::{AvgQError, Result};
use crate::file::{AvgQFile, GetEpochArgs};
use crate::process::ScriptSink;
use crate::trgfile::format_record;
use crate::types::{TimeSpec, TriggerPoint};
use crate::utils::branch_line;

/// Something that tells the engine where epochs come from
///
/// A source contributes to a script in two phases: [`EpochSource::send`]
/// writes its request lines into the script body, and
/// [`EpochSource::send_trigpoints`] writes the data the engine then reads
/// from its own input. The second phase only starts after the whole script,
/// terminator included, has been sent.
pub trait EpochSource {
    /// Reads epochs around the given points instead of stored triggers
    fn set_trigpoints(&mut self, points: Vec<TriggerPoint>) -> Result<()>;

    fn set_trigpoint(&mut self, point: TriggerPoint) -> Result<()> {
        self.set_trigpoints(vec![point])
    }

    /// Writes the request lines and branch lines
    fn send(&mut self, sink: &mut dyn ScriptSink) -> Result<()>;

    /// Writes the deferred trigger (or sample) stream, if any
    fn send_trigpoints(&mut self, sink: &mut dyn ScriptSink) -> Result<()>;
}

/// Where a file source takes its trigger positions from
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TriggerSource {
    /// Triggers stored in the data file
    #[default]
    None,
    /// An external trigger file
    File(String),
    /// Explicit points streamed after the script
    Points(Vec<TriggerPoint>),
}

/// Epochs read from a data file
///
/// # Examples
///
/// ```rust
/// use avgq::{AvgQFile, EpochSource, FileEpochSource, TriggerPoint};
///
/// let mut source = FileEpochSource::new(AvgQFile::new("rec.cnt")?, 0, 100);
/// source.branch = Some("baseline_subtract\nscale_by 0.5".to_string());
/// source.set_trigpoints(vec![TriggerPoint::from(1000), TriggerPoint::from(2000)])?;
///
/// let mut script: Vec<u8> = Vec::new();
/// source.send(&mut script)?;
/// source.send_trigpoints(&mut script)?;
/// assert_eq!(
///     String::from_utf8(script).unwrap(),
///     "read_synamps -R stdin rec.cnt 0 100\n>baseline_subtract\n>scale_by 0.5\n1000\t1\n2000\t1\n0\t0\n"
/// );
/// # Ok::<(), avgq::AvgQError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileEpochSource {
    pub infile: AvgQFile,
    pub beforetrig: TimeSpec,
    pub aftertrig: TimeSpec,
    pub continuous: bool,
    pub fromepoch: Option<i64>,
    pub epochs: Option<i64>,
    pub offset: Option<TimeSpec>,
    pub triglist: Option<String>,
    pub trigtransfer: bool,
    /// Script lines applied only to epochs from this source
    pub branch: Option<String>,
    trigger_source: TriggerSource,
}

impl FileEpochSource {
    pub fn new(
        infile: AvgQFile,
        beforetrig: impl Into<TimeSpec>,
        aftertrig: impl Into<TimeSpec>,
    ) -> Self {
        FileEpochSource {
            infile,
            beforetrig: beforetrig.into(),
            aftertrig: aftertrig.into(),
            continuous: false,
            fromepoch: None,
            epochs: None,
            offset: None,
            triglist: None,
            trigtransfer: false,
            branch: None,
            trigger_source: TriggerSource::None,
        }
    }

    /// Source for a file name, guessing the format
    pub fn open(
        filename: &str,
        beforetrig: impl Into<TimeSpec>,
        aftertrig: impl Into<TimeSpec>,
    ) -> Result<Self> {
        Ok(Self::new(AvgQFile::new(filename)?, beforetrig, aftertrig))
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Reads triggers from an external trigger file
    ///
    /// Fails if explicit trigger points are already set.
    pub fn set_trigfile(&mut self, path: impl Into<String>) -> Result<()> {
        if matches!(self.trigger_source, TriggerSource::Points(_)) {
            return Err(AvgQError::ConflictingTriggerSource);
        }
        self.trigger_source = TriggerSource::File(path.into());
        Ok(())
    }

    pub fn trigger_source(&self) -> &TriggerSource {
        &self.trigger_source
    }

    /// Falls back to the triggers stored in the data file
    pub fn clear_trigger_source(&mut self) {
        self.trigger_source = TriggerSource::None;
    }

    fn trigfile(&self) -> Option<String> {
        match &self.trigger_source {
            TriggerSource::None => None,
            TriggerSource::File(path) => Some(path.clone()),
            TriggerSource::Points(_) => Some("stdin".to_string()),
        }
    }

    fn getepoch_args(&self) -> GetEpochArgs {
        GetEpochArgs {
            beforetrig: self.beforetrig,
            aftertrig: self.aftertrig,
            continuous: self.continuous,
            fromepoch: self.fromepoch,
            epochs: self.epochs,
            offset: self.offset,
            triglist: self.triglist.clone(),
            trigfile: self.trigfile(),
            trigtransfer: self.trigtransfer,
        }
    }

    /// One request per point for epoched containers; position N reads epoch N+1
    ///
    /// Fractional positions are truncated, so 2.5 reads epoch 3.
    fn epoch_number_requests(&self, points: &[TriggerPoint]) -> Result<String> {
        let mut script = String::new();
        for point in points {
            let position = point.position_points().ok_or_else(|| {
                AvgQError::Unsupported(format!(
                    "epoch numbers must be plain points, got {:?}",
                    point
                ))
            })?;
            let mut args = GetEpochArgs::new(self.beforetrig, self.aftertrig);
            args.offset = self.offset;
            args.fromepoch = Some((position + 1.0).trunc() as i64);
            args.epochs = Some(1);
            script.push_str(&self.infile.getepoch(&args));
        }
        Ok(script)
    }
}

impl EpochSource for FileEpochSource {
    fn set_trigpoints(&mut self, points: Vec<TriggerPoint>) -> Result<()> {
        if matches!(self.trigger_source, TriggerSource::File(_)) {
            return Err(AvgQError::ConflictingTriggerSource);
        }
        self.trigger_source = TriggerSource::Points(points);
        Ok(())
    }

    fn send(&mut self, sink: &mut dyn ScriptSink) -> Result<()> {
        let requests = match &self.trigger_source {
            TriggerSource::Points(points) if self.infile.format.is_epoched() => {
                Some(self.epoch_number_requests(points)?)
            }
            _ => None,
        };
        match requests {
            Some(requests) => {
                sink.write_script(&requests)?;
                // 点已转换为逐个读取请求，只消费一次
                self.trigger_source = TriggerSource::None;
            }
            None => sink.write_script(&self.infile.getepoch(&self.getepoch_args()))?,
        }

        if let Some(branch) = &self.branch {
            let lines: String = branch
                .lines()
                .filter_map(branch_line)
                .map(|line| line + "\n")
                .collect();
            sink.write_script(&lines)?;
        }
        Ok(())
    }

    fn send_trigpoints(&mut self, sink: &mut dyn ScriptSink) -> Result<()> {
        let TriggerSource::Points(points) = &self.trigger_source else {
            return Ok(());
        };
        debug!("Sending {} trigger points for {}", points.len(), self.infile);

        let mut stream = String::new();
        for point in points {
            match point {
                TriggerPoint::Full(trigger) => stream.push_str(&format_record(trigger)),
                TriggerPoint::Bare(position) => stream.push_str(&format!("{}\t1", position)),
            }
            stream.push('\n');
        }
        stream.push_str("0\t0\n");
        sink.write_script(&stream)
    }
}
